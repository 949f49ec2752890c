use std::borrow::Cow;

use regex::Regex;
use semver::Version;

use crate::{
    context::{Condition, ConditionOperator, ConditionValue, RuleType, SegmentRule},
    hashing::PercentageHasher,
    Error, EvaluationContext, Result, Value,
};

/// Condition values ending with this suffix compare strings as semantic versions.
const SEMVER_SUFFIX: &str = ":semver";

impl SegmentRule {
    /// Return `true` if the context matches the rule.
    ///
    /// Conditions are combined with the rule's quantifier (an empty condition list matches).
    /// Nested rules must all match as well.
    pub(crate) fn matches(
        &self,
        context: &EvaluationContext,
        segment_key: &str,
        hasher: &impl PercentageHasher,
    ) -> Result<bool> {
        let conditions_match = self.conditions.is_empty()
            || self.rule_type.evaluate(
                self.conditions
                    .iter()
                    .map(|condition| condition.matches(context, segment_key, hasher)),
            )?;
        if !conditions_match {
            return Ok(false);
        }

        RuleType::All.evaluate(
            self.rules
                .iter()
                .map(|rule| rule.matches(context, segment_key, hasher)),
        )
    }
}

impl RuleType {
    /// Combine condition results lazily, stopping at the first result that decides the outcome.
    pub(crate) fn evaluate(self, results: impl IntoIterator<Item = Result<bool>>) -> Result<bool> {
        match self {
            RuleType::All => {
                for result in results {
                    if !result? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            RuleType::Any | RuleType::None => {
                let mut any_matched = false;
                for result in results {
                    if result? {
                        any_matched = true;
                        break;
                    }
                }
                Ok(any_matched == (self == RuleType::Any))
            }
        }
    }
}

impl Condition {
    pub(crate) fn matches(
        &self,
        context: &EvaluationContext,
        segment_key: &str,
        hasher: &impl PercentageHasher,
    ) -> Result<bool> {
        let value = context.property_value(&self.property);
        match self.operator {
            ConditionOperator::PercentageSplit => Ok(self.matches_percentage_split(
                value.as_deref(),
                context,
                segment_key,
                hasher,
            )),
            operator => operator.eval(value.as_deref(), &self.value),
        }
    }

    /// Percentage split buckets the property value if there is one, and the identity key otherwise.
    fn matches_percentage_split(
        &self,
        value: Option<&Value>,
        context: &EvaluationContext,
        segment_key: &str,
        hasher: &impl PercentageHasher,
    ) -> bool {
        let subject = match (value, context.identity_key()) {
            (Some(value), _) => Cow::Owned(value.to_string()),
            (None, Some(identity_key)) => Cow::Borrowed(identity_key),
            (None, None) => return false,
        };

        let threshold = match &self.value {
            ConditionValue::Single(s) => s.parse::<f64>().ok(),
            ConditionValue::Multiple(_) => None,
        };
        let Some(threshold) = threshold else {
            log::debug!(target: "flag_engine",
                        segment_key,
                        value:serde = self.value;
                        "percentage split value is not a number");
            return false;
        };

        hasher.hashed_percentage(&[segment_key, &*subject]) <= threshold
    }
}

impl ConditionOperator {
    /// Apply the operator to a context value.
    ///
    /// Returns `Ok(false)` when the value is absent or the condition value cannot be interpreted
    /// for the value's type, and an error when the operator makes no sense for that type.
    /// `PERCENTAGE_SPLIT` needs the segment and identity; it is evaluated by [`Condition`].
    pub(crate) fn eval(
        self,
        value: Option<&Value>,
        condition_value: &ConditionValue,
    ) -> Result<bool> {
        match self {
            Self::IsSet => return Ok(value.is_some()),
            Self::IsNotSet => return Ok(value.is_none()),
            _ => {}
        }

        let Some(value) = value else {
            return Ok(false);
        };

        match self {
            Self::PercentageSplit => Ok(false),
            Self::In => Ok(matches_in(value, condition_value)),
            Self::Modulo => Ok(matches_modulo(value, condition_value).unwrap_or(false)),
            Self::Regex => Ok(matches_regex(value, condition_value).unwrap_or(false)),
            _ => self.compare(value, condition_value),
        }
    }

    /// Typed comparison. The runtime type of the context value decides how the condition value is
    /// parsed and which operators are available.
    fn compare(self, value: &Value, condition_value: &ConditionValue) -> Result<bool> {
        let condition = match condition_value {
            ConditionValue::Single(s) => Some(s.as_str()),
            ConditionValue::Multiple(_) => None,
        };

        match value {
            Value::String(s) => self.compare_strings(s, condition),
            Value::Integer(i) => {
                self.compare_ordered(*i, condition.and_then(|c| c.parse().ok()), value.type_name())
            }
            Value::Float(f) => {
                self.compare_ordered(*f, condition.and_then(|c| c.parse().ok()), value.type_name())
            }
            Value::Boolean(b) => match self {
                Self::Equal | Self::NotEqual => {
                    self.compare_ordered(*b, condition.and_then(parse_bool), value.type_name())
                }
                _ => Err(self.unsupported(value.type_name())),
            },
            Value::Null => Ok(false),
        }
    }

    fn compare_ordered<T: PartialOrd>(
        self,
        value: T,
        condition: Option<T>,
        value_type: &'static str,
    ) -> Result<bool> {
        let compare: fn(&T, &T) -> bool = match self {
            Self::Equal => T::eq,
            Self::NotEqual => T::ne,
            Self::GreaterThan => T::gt,
            Self::GreaterThanInclusive => T::ge,
            Self::LessThan => T::lt,
            Self::LessThanInclusive => T::le,
            _ => return Err(self.unsupported(value_type)),
        };
        Ok(condition.is_some_and(|condition| compare(&value, &condition)))
    }

    fn compare_strings(self, value: &str, condition: Option<&str>) -> Result<bool> {
        if let Some(version) = condition.and_then(|c| c.strip_suffix(SEMVER_SUFFIX)) {
            if let Some(matched) = self.compare_versions(value, version) {
                return Ok(matched);
            }
        }

        match self {
            Self::Contains | Self::NotContains => {
                let Some(condition) = condition else {
                    return Ok(false);
                };
                Ok(value.contains(condition) == (self == Self::Contains))
            }
            _ => self.compare_ordered(value, condition, "string"),
        }
    }

    /// Compare semantic versions by precedence. Returns `None` for operators without a semver
    /// meaning, and `Some(false)` when either side is not a valid version.
    fn compare_versions(self, value: &str, condition: &str) -> Option<bool> {
        if matches!(self, Self::Contains | Self::NotContains) {
            return None;
        }

        let (Ok(value), Ok(condition)) = (Version::parse(value), Version::parse(condition)) else {
            log::debug!(target: "flag_engine",
                        value,
                        condition;
                        "unable to parse semantic version");
            return Some(false);
        };

        let ordering = value.cmp_precedence(&condition);
        Some(match self {
            Self::Equal => ordering.is_eq(),
            Self::NotEqual => ordering.is_ne(),
            Self::GreaterThan => ordering.is_gt(),
            Self::GreaterThanInclusive => ordering.is_ge(),
            Self::LessThan => ordering.is_lt(),
            Self::LessThanInclusive => ordering.is_le(),
            _ => return None,
        })
    }

    fn unsupported(self, value_type: &'static str) -> Error {
        log::warn!(target: "flag_engine",
                   operator:debug = self,
                   value_type;
                   "operator is not supported for this value type");
        Error::UnsupportedOperator {
            operator: self,
            value_type,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Booleans are never members of a list.
fn matches_in(value: &Value, condition_value: &ConditionValue) -> bool {
    if matches!(value, Value::Boolean(_)) {
        return false;
    }
    let value = value.to_string();

    match condition_value {
        ConditionValue::Multiple(values) => values.iter().any(|v| *v == value),
        ConditionValue::Single(s) => match serde_json::from_str::<Vec<Value>>(s) {
            Ok(values) => values.iter().any(|v| v.to_string() == value),
            Err(_) => s.split(',').any(|v| v == value),
        },
    }
}

fn matches_modulo(value: &Value, condition_value: &ConditionValue) -> Option<bool> {
    let ConditionValue::Single(s) = condition_value else {
        return None;
    };
    let (divisor, remainder) = s.split_once('|')?;
    let divisor: f64 = divisor.parse().ok()?;
    let remainder: f64 = remainder.parse().ok()?;

    let value = match value {
        Value::String(s) => s.parse().ok()?,
        value => value.as_number()?,
    };
    Some(value % divisor == remainder)
}

fn matches_regex(value: &Value, condition_value: &ConditionValue) -> Option<bool> {
    let ConditionValue::Single(pattern) = condition_value else {
        return None;
    };
    let regex = Regex::new(pattern)
        .map_err(|err| {
            log::debug!(target: "flag_engine",
                        pattern;
                        "invalid regex in condition: {err}");
        })
        .ok()?;
    Some(regex.is_match(&value.to_string()))
}

#[cfg(test)]
mod tests {
    use crate::{
        context::{
            Condition, ConditionOperator, ConditionValue, EnvironmentContext, IdentityContext,
            RuleType, SegmentRule, Traits,
        },
        hashing::FixedHasher,
        Error, EvaluationContext, Result, Value,
    };

    fn eval(operator: ConditionOperator, value: impl Into<Value>, condition: &str) -> bool {
        operator
            .eval(Some(&value.into()), &condition.into())
            .unwrap()
    }

    fn quantify(rule_type: RuleType, results: &[bool]) -> bool {
        rule_type
            .evaluate(results.iter().map(|result| Ok(*result)))
            .unwrap()
    }

    fn context_with_traits(traits: Traits) -> EvaluationContext {
        EvaluationContext::new(EnvironmentContext {
            key: "env".into(),
            name: "Test".into(),
        })
        .with_identity(IdentityContext::new("alice").with_traits(traits))
        .enriched()
        .into_owned()
    }

    fn condition(
        property: &str,
        operator: ConditionOperator,
        value: impl Into<ConditionValue>,
    ) -> Condition {
        Condition {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    #[test]
    fn quantifiers() {
        assert!(quantify(RuleType::All, &[]));
        assert!(quantify(RuleType::All, &[true, true]));
        assert!(!quantify(RuleType::All, &[true, false]));
        assert!(!quantify(RuleType::Any, &[false, false]));
        assert!(quantify(RuleType::Any, &[true, false]));
        assert!(quantify(RuleType::None, &[]));
        assert!(!quantify(RuleType::None, &[true]));
        assert!(quantify(RuleType::None, &[false, false]));
    }

    #[test]
    fn quantifiers_stop_at_decisive_result() {
        let unsupported = || {
            Err(Error::UnsupportedOperator {
                operator: ConditionOperator::Contains,
                value_type: "integer",
            })
        };
        let results: Vec<Result<bool>> = vec![Ok(false), unsupported()];
        assert!(!RuleType::All.evaluate(results).unwrap());
        let results: Vec<Result<bool>> = vec![Ok(true), unsupported()];
        assert!(RuleType::Any.evaluate(results).unwrap());
        let results: Vec<Result<bool>> = vec![Ok(true), unsupported()];
        assert!(RuleType::All.evaluate(results).is_err());
    }

    #[test]
    fn equal() {
        assert!(eval(ConditionOperator::Equal, "bar", "bar"));
        assert!(!eval(ConditionOperator::Equal, "bar", "baz"));
        assert!(eval(ConditionOperator::Equal, Value::Integer(1), "1"));
        assert!(!eval(ConditionOperator::Equal, Value::Integer(1), "1.5"));
        assert!(eval(ConditionOperator::Equal, 1.5, "1.5"));
        assert!(eval(ConditionOperator::Equal, 1.0, "1"));
        assert!(eval(ConditionOperator::Equal, true, "true"));
        assert!(eval(ConditionOperator::Equal, false, "False"));
        assert!(!eval(ConditionOperator::Equal, true, "yes"));
    }

    #[test]
    fn not_equal() {
        assert!(!eval(ConditionOperator::NotEqual, "bar", "bar"));
        assert!(eval(ConditionOperator::NotEqual, "bar", "baz"));
        assert!(eval(ConditionOperator::NotEqual, Value::Integer(1), "2"));
        assert!(eval(ConditionOperator::NotEqual, true, "false"));
        // Unparseable condition values fail closed, even for NOT_EQUAL.
        assert!(!eval(ConditionOperator::NotEqual, Value::Integer(1), "one"));
    }

    #[test]
    fn ordering_numbers() {
        assert!(eval(ConditionOperator::GreaterThan, Value::Integer(2), "1"));
        assert!(!eval(ConditionOperator::GreaterThan, Value::Integer(1), "1"));
        assert!(eval(ConditionOperator::GreaterThanInclusive, Value::Integer(1), "1"));
        assert!(eval(ConditionOperator::LessThan, Value::Integer(1), "2"));
        assert!(!eval(ConditionOperator::LessThan, Value::Integer(2), "2"));
        assert!(eval(ConditionOperator::LessThanInclusive, Value::Integer(2), "2"));
        assert!(eval(ConditionOperator::GreaterThan, 1.5, "1.25"));
        assert!(!eval(ConditionOperator::LessThan, 1.5, "1.25"));
        assert!(!eval(ConditionOperator::GreaterThan, Value::Integer(2), "abc"));
        // Decimal point, never a comma.
        assert!(!eval(ConditionOperator::GreaterThan, 1.5, "1,25"));
    }

    #[test]
    fn ordering_strings() {
        assert!(eval(ConditionOperator::GreaterThan, "b", "a"));
        assert!(eval(ConditionOperator::LessThan, "apple", "banana"));
        assert!(eval(ConditionOperator::GreaterThan, "2", "10"));
    }

    #[test]
    fn contains() {
        assert!(eval(ConditionOperator::Contains, "bar", "b"));
        assert!(!eval(ConditionOperator::Contains, "bar", "z"));
        assert!(!eval(ConditionOperator::NotContains, "bar", "bar"));
        assert!(eval(ConditionOperator::NotContains, "bar", "z"));
    }

    #[test]
    fn regex() {
        assert!(eval(ConditionOperator::Regex, "foo", "[a-z]+"));
        assert!(!eval(ConditionOperator::Regex, "FOO", "[a-z]+"));
        // Search anywhere, not a full match.
        assert!(eval(ConditionOperator::Regex, "user@example.com", "@example"));
        assert!(eval(ConditionOperator::Regex, Value::Integer(123), r"^\d+$"));
        assert!(!eval(ConditionOperator::Regex, "foo", "[a-z"));
    }

    #[test]
    fn modulo() {
        assert!(eval(ConditionOperator::Modulo, Value::Integer(2), "2|0"));
        assert!(!eval(ConditionOperator::Modulo, Value::Integer(3), "2|0"));
        assert!(eval(ConditionOperator::Modulo, Value::Integer(3), "2|1"));
        assert!(eval(ConditionOperator::Modulo, 35.0, "4|3"));
        assert!(eval(ConditionOperator::Modulo, 1.5, "1|0.5"));
        assert!(eval(ConditionOperator::Modulo, "4", "2|0"));
        assert!(!eval(ConditionOperator::Modulo, "foo", "2|0"));
        assert!(!eval(ConditionOperator::Modulo, true, "2|0"));
        assert!(!eval(ConditionOperator::Modulo, Value::Integer(2), "foo|bar"));
        assert!(!eval(ConditionOperator::Modulo, Value::Integer(2), "2"));
    }

    #[test]
    fn in_list() {
        assert!(eval(ConditionOperator::In, "bar", "foo,bar"));
        assert!(!eval(ConditionOperator::In, "ba", "foo,bar"));
        assert!(eval(ConditionOperator::In, Value::Integer(2), "1,2,3"));
        assert!(eval(ConditionOperator::In, "bar", r#"["foo", "bar"]"#));
        assert!(eval(ConditionOperator::In, Value::Integer(2), "[1, 2, 3]"));
        assert!(eval(ConditionOperator::In, "a,b", r#"["a,b", "c"]"#));
        assert!(!eval(ConditionOperator::In, true, "true,false"));
        assert!(ConditionOperator::In
            .eval(
                Some(&"bar".into()),
                &ConditionValue::from(vec!["foo", "bar"])
            )
            .unwrap());
        assert!(!ConditionOperator::In
            .eval(None, &ConditionValue::from(vec!["foo", "bar"]))
            .unwrap());
    }

    #[test]
    fn is_set() {
        assert!(ConditionOperator::IsSet
            .eval(Some(&"x".into()), &"".into())
            .unwrap());
        assert!(!ConditionOperator::IsSet.eval(None, &"".into()).unwrap());
        assert!(ConditionOperator::IsNotSet.eval(None, &"".into()).unwrap());
        assert!(!ConditionOperator::IsNotSet
            .eval(Some(&Value::Integer(0)), &"".into())
            .unwrap());
    }

    #[test]
    fn missing_value_fails_closed() {
        for operator in [
            ConditionOperator::Equal,
            ConditionOperator::NotEqual,
            ConditionOperator::GreaterThan,
            ConditionOperator::Contains,
            ConditionOperator::NotContains,
            ConditionOperator::Regex,
            ConditionOperator::Modulo,
        ] {
            assert!(!operator.eval(None, &"1".into()).unwrap(), "{operator:?}");
        }
    }

    #[test]
    fn semver() {
        assert!(eval(ConditionOperator::GreaterThan, "1.0.1", "1.0.0:semver"));
        assert!(eval(ConditionOperator::GreaterThan, "1.0.0", "1.0.0-beta:semver"));
        assert!(!eval(ConditionOperator::GreaterThan, "1.2.0", "1.10.0:semver"));
        assert!(eval(ConditionOperator::GreaterThanInclusive, "1.0.0", "1.0.0:semver"));
        assert!(eval(ConditionOperator::LessThan, "1.2.0", "1.10.0:semver"));
        assert!(eval(ConditionOperator::LessThanInclusive, "0.9.9", "1.0.0:semver"));
        assert!(eval(ConditionOperator::Equal, "1.0.0", "1.0.0:semver"));
        assert!(eval(ConditionOperator::Equal, "1.0.0+build.1", "1.0.0:semver"));
        assert!(eval(ConditionOperator::NotEqual, "1.0.1", "1.0.0:semver"));
        // Lexical comparison would say otherwise.
        assert!(eval(ConditionOperator::GreaterThan, "1.10.0", "1.9.0:semver"));
    }

    #[test]
    fn semver_parse_failure_fails_closed() {
        assert!(!eval(ConditionOperator::GreaterThan, "1.0", "1.0.0:semver"));
        assert!(!eval(ConditionOperator::NotEqual, "not-a-version", "1.0.0:semver"));
        assert!(!eval(ConditionOperator::Equal, "1.0.0", "1.0:semver"));
    }

    #[test]
    fn unsupported_operators_are_errors() {
        assert!(matches!(
            ConditionOperator::GreaterThan.eval(Some(&true.into()), &"true".into()),
            Err(Error::UnsupportedOperator {
                operator: ConditionOperator::GreaterThan,
                value_type: "boolean"
            })
        ));
        assert!(ConditionOperator::Contains
            .eval(Some(&Value::Integer(12)), &"1".into())
            .is_err());
        assert!(ConditionOperator::NotContains
            .eval(Some(&1.5.into()), &"1".into())
            .is_err());
        assert!(ConditionOperator::Contains
            .eval(Some(&true.into()), &"t".into())
            .is_err());
    }

    #[test]
    fn condition_reads_traits() {
        let context = context_with_traits(Traits::from([("foo".to_owned(), "bar".into())]));
        assert!(condition("foo", ConditionOperator::Equal, "bar")
            .matches(&context, "segment", &FixedHasher(0.0))
            .unwrap());
        assert!(!condition("missing", ConditionOperator::Equal, "bar")
            .matches(&context, "segment", &FixedHasher(0.0))
            .unwrap());
        assert!(condition("missing", ConditionOperator::IsNotSet, "")
            .matches(&context, "segment", &FixedHasher(0.0))
            .unwrap());
    }

    #[test]
    fn condition_reads_identifier_path() {
        let context = context_with_traits(Traits::new());
        assert!(condition(
            "$.identity.identifier",
            ConditionOperator::In,
            vec!["bob", "alice"]
        )
        .matches(&context, "segment", &FixedHasher(0.0))
        .unwrap());
    }

    #[test]
    fn percentage_split_uses_identity_key() {
        let context = context_with_traits(Traits::new());
        let hasher = |ids: &[&str]| {
            if *ids == ["segment", "env_alice"] {
                10.0
            } else {
                99.0
            }
        };

        assert!(condition("", ConditionOperator::PercentageSplit, "10")
            .matches(&context, "segment", &hasher)
            .unwrap());
        assert!(!condition("", ConditionOperator::PercentageSplit, "9.5")
            .matches(&context, "segment", &hasher)
            .unwrap());
        assert!(!condition("", ConditionOperator::PercentageSplit, "ten")
            .matches(&context, "segment", &hasher)
            .unwrap());
    }

    #[test]
    fn percentage_split_prefers_property_value() {
        let context =
            context_with_traits(Traits::from([("org".to_owned(), Value::Integer(42))]));
        let hasher = |ids: &[&str]| if *ids == ["segment", "42"] { 1.0 } else { 99.0 };

        assert!(condition("org", ConditionOperator::PercentageSplit, "50")
            .matches(&context, "segment", &hasher)
            .unwrap());
    }

    #[test]
    fn percentage_split_without_identity_fails_closed() {
        let context = EvaluationContext::new(EnvironmentContext::default());
        assert!(!condition("", ConditionOperator::PercentageSplit, "100")
            .matches(&context, "segment", &FixedHasher(0.0))
            .unwrap());
    }

    #[test]
    fn rule_without_conditions_checks_nested_rules() {
        let context = context_with_traits(Traits::from([
            ("foo".to_owned(), "bar".into()),
            ("age".to_owned(), Value::Integer(21)),
        ]));
        let rule = |nested: Vec<SegmentRule>| SegmentRule {
            rule_type: RuleType::Any,
            conditions: vec![],
            rules: nested,
        };
        let matching = SegmentRule {
            rule_type: RuleType::All,
            conditions: vec![condition("foo", ConditionOperator::Equal, "bar")],
            rules: vec![],
        };
        let failing = SegmentRule {
            rule_type: RuleType::All,
            conditions: vec![condition("age", ConditionOperator::LessThan, "18")],
            rules: vec![],
        };

        assert!(rule(vec![]).matches(&context, "s", &FixedHasher(0.0)).unwrap());
        assert!(rule(vec![matching.clone()])
            .matches(&context, "s", &FixedHasher(0.0))
            .unwrap());
        // Nested rules are ALL-combined even under an ANY parent.
        assert!(!rule(vec![matching, failing])
            .matches(&context, "s", &FixedHasher(0.0))
            .unwrap());
    }

    #[test]
    fn none_rule() {
        let context = context_with_traits(Traits::from([("plan".to_owned(), "free".into())]));
        let rule = SegmentRule {
            rule_type: RuleType::None,
            conditions: vec![
                condition("plan", ConditionOperator::Equal, "premium"),
                condition("plan", ConditionOperator::Equal, "enterprise"),
            ],
            rules: vec![],
        };
        assert!(rule.matches(&context, "s", &FixedHasher(0.0)).unwrap());

        let context = context_with_traits(Traits::from([("plan".to_owned(), "premium".into())]));
        assert!(!rule.matches(&context, "s", &FixedHasher(0.0)).unwrap());
    }

    #[test]
    fn rule_propagates_configuration_errors() {
        let context = context_with_traits(Traits::from([("beta".to_owned(), true.into())]));
        let rule = SegmentRule {
            rule_type: RuleType::All,
            conditions: vec![condition("beta", ConditionOperator::GreaterThan, "1")],
            rules: vec![],
        };
        assert!(rule.matches(&context, "s", &FixedHasher(0.0)).is_err());
    }
}
