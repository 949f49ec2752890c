//! Environment document as served by the flags API.
//!
//! Field names follow the wire format (snake_case, including the trailing underscore in
//! `property_`). Fields this engine doesn't use are ignored on parsing.
use serde::{Deserialize, Serialize};

use crate::{
    context::{nullable, ConditionOperator, ConditionValue, RuleType},
    Value,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDocument {
    /// Client-side key of the environment. Identity keys are derived from it.
    pub api_key: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    pub project: ProjectDocument,
    #[serde(default, deserialize_with = "nullable")]
    pub feature_states: Vec<FeatureStateDocument>,
    #[serde(default, deserialize_with = "nullable")]
    pub identity_overrides: Vec<IdentityOverrideDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    /// Segments in the order they are evaluated.
    #[serde(default, deserialize_with = "nullable")]
    pub segments: Vec<SegmentDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDocument {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub rules: Vec<SegmentRuleDocument>,
    /// Feature overrides of the segment.
    #[serde(default, deserialize_with = "nullable")]
    pub feature_states: Vec<FeatureStateDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRuleDocument {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default, deserialize_with = "nullable")]
    pub rules: Vec<SegmentRuleDocument>,
    #[serde(default, deserialize_with = "nullable")]
    pub conditions: Vec<ConditionDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDocument {
    pub operator: ConditionOperator,
    #[serde(default, deserialize_with = "nullable")]
    pub property_: String,
    #[serde(default, deserialize_with = "nullable")]
    pub value: ConditionValue,
}

/// State of a feature in the environment, in a segment, or for an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStateDocument {
    pub feature: FeatureDocument,
    pub enabled: bool,
    #[serde(default)]
    pub feature_state_value: Value,
    #[serde(default)]
    pub django_id: Option<i64>,
    #[serde(default)]
    pub featurestate_uuid: Option<String>,
    /// Present on segment overrides only.
    #[serde(default)]
    pub feature_segment: Option<FeatureSegmentDocument>,
    #[serde(default, deserialize_with = "nullable")]
    pub multivariate_feature_state_values: Vec<MultivariateFeatureStateValueDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDocument {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSegmentDocument {
    /// Lower value wins.
    #[serde(default)]
    pub priority: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultivariateFeatureStateValueDocument {
    /// Variants are bucketed by `id`, then by `mv_fs_value_uuid`, then by position in the list.
    #[serde(default)]
    pub id: Option<i64>,
    pub multivariate_feature_option: MultivariateFeatureOptionDocument,
    pub percentage_allocation: f64,
    #[serde(default)]
    pub mv_fs_value_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultivariateFeatureOptionDocument {
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityOverrideDocument {
    pub identifier: String,
    #[serde(default, deserialize_with = "nullable")]
    pub identity_features: Vec<FeatureStateDocument>,
}
