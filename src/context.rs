//! In-memory evaluation input: environment, identity, features and segments.
use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result, Value};

/// Identity traits, keyed by trait name.
///
/// # Examples
/// ```
/// # use flag_engine::{Traits, Value};
/// let traits = [
///     ("age".to_owned(), Value::Integer(30)),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Traits>();
/// ```
pub type Traits = HashMap<String, Value>;

/// Free-form metadata attached to features and segments. Passed through to results untouched.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Priority that beats any priority authored in an environment. Used for identity overrides.
pub const STRONGEST_PRIORITY: f64 = f64::MIN;

/// Complete input of one evaluation.
///
/// Feature and segment maps are shared behind `Arc`, so deriving a context for another identity
/// (see [`EvaluationContext::with_identity`]) doesn't copy the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub environment: EnvironmentContext,
    #[serde(default)]
    pub identity: Option<IdentityContext>,
    /// Features keyed by feature name.
    #[serde(default)]
    pub features: Arc<BTreeMap<String, FeatureContext>>,
    /// Segments in evaluation order. When overrides of several matching segments have the same
    /// priority, the segment listed first wins.
    #[serde(default)]
    pub segments: Arc<Vec<SegmentContext>>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub identifier: String,
    /// Hashing key of the identity. Derived from the environment key and the identifier when
    /// absent or empty.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub traits: Traits,
}

impl IdentityContext {
    /// Create an identity without traits.
    pub fn new(identifier: impl Into<String>) -> Self {
        IdentityContext {
            identifier: identifier.into(),
            key: None,
            traits: Traits::new(),
        }
    }

    /// Set identity traits.
    pub fn with_traits(mut self, traits: Traits) -> Self {
        self.traits = traits;
        self
    }

    /// Set an explicit hashing key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A feature as seen by one evaluation: either the environment default or a segment override.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContext {
    /// Hashing key of the feature, used to select multivariate variants.
    pub key: String,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub value: Value,
    /// Lower value wins. `None` is weaker than any concrete priority.
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub variants: Vec<FeatureValue>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Weighted variant of a multivariate feature.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub value: Value,
    /// Share of identities receiving this variant, in percent.
    pub weight: f64,
    /// Variants are bucketed in ascending priority order.
    #[serde(default)]
    pub priority: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentContext {
    pub key: String,
    pub name: String,
    /// Top-level rules. All of them must match; a segment without rules never matches.
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    /// Feature values applied to identities in this segment.
    #[serde(default)]
    pub overrides: Vec<FeatureContext>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Nested rules. Always ALL-combined, regardless of `rule_type`.
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
}

/// Quantifier combining the conditions of a [`SegmentRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    /// Every condition matches.
    All,
    /// At least one condition matches.
    Any,
    /// No condition matches.
    None,
}

/// `Condition` checks that the context value found under `property` matches the condition `value`
/// under the given `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Trait name, or a context path starting with `$.` (e.g. `$.identity.identifier`).
    #[serde(default, deserialize_with = "nullable")]
    pub property: String,
    pub operator: ConditionOperator,
    #[serde(default, deserialize_with = "nullable")]
    pub value: ConditionValue,
}

/// Possible condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanInclusive,
    LessThan,
    LessThanInclusive,
    /// Substring test. Strings only.
    Contains,
    /// Negated substring test. Strings only.
    NotContains,
    /// Unanchored regex search over the string form of the value.
    Regex,
    /// Membership in a list. The list is either an array value, a JSON array encoded in a string,
    /// or a comma-separated string.
    In,
    /// Identity falls into the first `value` percent of the hashed population.
    PercentageSplit,
    /// Value is `"divisor|remainder"`.
    Modulo,
    IsSet,
    IsNotSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum ConditionValue {
    Multiple(Vec<String>),
    Single(String),
}

impl Default for ConditionValue {
    fn default() -> Self {
        ConditionValue::Single(String::new())
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}
impl From<String> for ConditionValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}
impl From<Vec<String>> for ConditionValue {
    fn from(value: Vec<String>) -> Self {
        Self::Multiple(value)
    }
}
impl From<Vec<&str>> for ConditionValue {
    fn from(value: Vec<&str>) -> Self {
        Self::Multiple(value.into_iter().map(str::to_owned).collect())
    }
}

/// Deserialize `null` as the default value of the field type.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl EvaluationContext {
    /// Create a context for the given environment, with no features, segments or identity.
    pub fn new(environment: EnvironmentContext) -> Self {
        EvaluationContext {
            environment,
            identity: None,
            features: Arc::default(),
            segments: Arc::default(),
        }
    }

    /// Return a new context evaluating for `identity`. Features and segments are shared with
    /// `self`.
    pub fn with_identity(&self, identity: IdentityContext) -> Self {
        EvaluationContext {
            environment: self.environment.clone(),
            identity: Some(identity),
            features: Arc::clone(&self.features),
            segments: Arc::clone(&self.segments),
        }
    }

    /// Hashing key of the identity, if the context has an identity with a non-empty key.
    pub fn identity_key(&self) -> Option<&str> {
        self.identity
            .as_ref()?
            .key
            .as_deref()
            .filter(|key| !key.is_empty())
    }

    /// Context with a derived identity key (`<environment key>_<identifier>`).
    ///
    /// Borrows `self` when there is nothing to derive, so the caller's context is never modified.
    pub(crate) fn enriched(&self) -> Cow<'_, EvaluationContext> {
        match &self.identity {
            Some(identity) if self.identity_key().is_none() => {
                let key = format!("{}_{}", self.environment.key, identity.identifier);
                Cow::Owned(self.with_identity(identity.clone().with_key(key)))
            }
            _ => Cow::Borrowed(self),
        }
    }

    /// Resolve a condition property to a context value. Null values resolve to `None`.
    pub(crate) fn property_value(&self, property: &str) -> Option<Cow<'_, Value>> {
        if property.is_empty() {
            return None;
        }
        let value = match property.strip_prefix("$.") {
            Some(path) => self.path_value(path).or_else(|| self.trait_value(property)),
            None => self.trait_value(property),
        }?;
        (!value.is_null()).then_some(value)
    }

    fn trait_value(&self, name: &str) -> Option<Cow<'_, Value>> {
        self.identity
            .as_ref()?
            .traits
            .get(name)
            .map(Cow::Borrowed)
    }

    fn path_value(&self, path: &str) -> Option<Cow<'_, Value>> {
        let owned = |s: &str| Some(Cow::Owned(Value::from(s)));
        match path {
            "environment.key" => owned(&self.environment.key),
            "environment.name" => owned(&self.environment.name),
            "identity.identifier" => owned(&self.identity.as_ref()?.identifier),
            "identity.key" => owned(self.identity_key()?),
            _ => self.trait_value(path.strip_prefix("identity.traits.")?),
        }
    }

    /// Find a segment by key.
    pub fn segment(&self, key: &str) -> Option<&SegmentContext> {
        self.segments.iter().find(|segment| segment.key == key)
    }

    /// Check that no feature (including segment overrides) allocates more than 100 percent to its
    /// variants.
    pub fn validate(&self) -> Result<()> {
        self.features
            .values()
            .chain(self.segments.iter().flat_map(|s| s.overrides.iter()))
            .try_for_each(FeatureContext::validate_variants)
    }
}

impl FeatureContext {
    /// Check that variant weights add up to at most 100 percent.
    pub fn validate_variants(&self) -> Result<()> {
        // Tolerates rounding in sums such as 33.3 + 33.3 + 33.4.
        const EPSILON: f64 = 1e-9;

        let total: f64 = self.variants.iter().map(|variant| variant.weight).sum();
        if total > 100.0 + EPSILON {
            log::warn!(target: "flag_engine",
                       feature:display = self.name,
                       total;
                       "variant weights exceed 100 percent");
            return Err(Error::InvalidPercentageAllocation {
                feature: self.name.clone(),
                total,
            });
        }
        Ok(())
    }
}
