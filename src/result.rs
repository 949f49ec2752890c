use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{context::Metadata, Error, Result, Value};

/// Outcome of evaluating all features of an environment for one context.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Evaluated flags keyed by feature name.
    pub flags: BTreeMap<String, FlagResult>,
    /// Segments the context belongs to, in evaluation order.
    pub segments: Vec<SegmentResult>,
}

impl EvaluationResult {
    /// Get the evaluated flag for `feature_name`.
    ///
    /// Returns [`Error::FeatureNotFound`] if the environment has no such feature, so callers can
    /// apply their own default.
    pub fn get_flag(&self, feature_name: &str) -> Result<&FlagResult> {
        self.flags
            .get(feature_name)
            .ok_or_else(|| Error::FeatureNotFound(feature_name.to_owned()))
    }

    #[allow(missing_docs)]
    pub fn is_feature_enabled(&self, feature_name: &str) -> Result<bool> {
        self.get_flag(feature_name).map(|flag| flag.enabled)
    }

    #[allow(missing_docs)]
    pub fn feature_value(&self, feature_name: &str) -> Result<&Value> {
        self.get_flag(feature_name).map(|flag| &flag.value)
    }

    /// Returns `true` if the context belongs to the segment with the given name.
    pub fn is_in_segment(&self, segment_name: &str) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.name == segment_name)
    }
}

/// Evaluated state of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagResult {
    pub name: String,
    pub enabled: bool,
    pub value: Value,
    /// Why this value was selected.
    pub reason: Reason,
    /// Metadata of the feature context the value came from (the environment default or the
    /// winning override).
    pub metadata: Metadata,
}

/// Summary of a segment the context belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    pub key: String,
    pub name: String,
    pub metadata: Metadata,
}

/// Evaluation reason.
///
/// The string form is shared with the other engine implementations: `DEFAULT`,
/// `TARGETING_MATCH; segment=<name>` or `SPLIT; weight=<weight>`.
///
/// ```
/// # use flag_engine::Reason;
/// let reason: Reason = "SPLIT; weight=30".parse().unwrap();
/// assert_eq!(reason, Reason::Split { weight: 30.0 });
/// assert_eq!(Reason::Default.to_string(), "DEFAULT");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// Environment default of the feature.
    Default,
    /// Override of a segment the context belongs to.
    TargetingMatch {
        /// Name of the segment.
        segment: String,
    },
    /// Multivariate variant selected by percentage.
    Split {
        /// Weight of the selected variant.
        weight: f64,
    },
}

const DEFAULT: &str = "DEFAULT";
const TARGETING_MATCH_PREFIX: &str = "TARGETING_MATCH; segment=";
const SPLIT_PREFIX: &str = "SPLIT; weight=";

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Default => f.write_str(DEFAULT),
            Reason::TargetingMatch { segment } => write!(f, "{TARGETING_MATCH_PREFIX}{segment}"),
            Reason::Split { weight } => write!(f, "{SPLIT_PREFIX}{weight}"),
        }
    }
}

/// Error returned when parsing an unknown [`Reason`] string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid evaluation reason: {0:?}")]
pub struct ParseReasonError(String);

impl FromStr for Reason {
    type Err = ParseReasonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == DEFAULT {
            return Ok(Reason::Default);
        }
        if let Some(segment) = s.strip_prefix(TARGETING_MATCH_PREFIX) {
            return Ok(Reason::TargetingMatch {
                segment: segment.to_owned(),
            });
        }
        s.strip_prefix(SPLIT_PREFIX)
            .and_then(|weight| weight.parse().ok())
            .map(|weight| Reason::Split { weight })
            .ok_or_else(|| ParseReasonError(s.to_owned()))
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
