//! Environment document parsing and mapping to [`EvaluationContext`].
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::{
    context::{
        Condition, ConditionOperator, ConditionValue, EnvironmentContext, FeatureContext,
        FeatureValue, Metadata, RuleType, SegmentContext, SegmentRule, STRONGEST_PRIORITY,
    },
    EvaluationContext, Result,
};

mod models;

pub use models::*;

/// Name of the segments synthesized from identity overrides.
pub const IDENTITY_OVERRIDES_SEGMENT_NAME: &str = "identity_overrides";

const METADATA_SOURCE: &str = "source";
const SOURCE_SEGMENT: &str = "segment";
pub(crate) const SOURCE_IDENTITY_OVERRIDE: &str = "identity_override";

impl EnvironmentDocument {
    /// Parse an environment document from JSON.
    ///
    /// Unknown operators and rule types make the whole document invalid.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).map_err(|err| {
            log::warn!(target: "flag_engine", "failed to parse environment document: {err}");
            err.into()
        })
    }

    /// Map the document to an evaluation context without identity.
    ///
    /// Segments keep the order of the document, followed by the identity override segments.
    /// Identity overrides become segments named [`IDENTITY_OVERRIDES_SEGMENT_NAME`] that match the
    /// overridden identifiers and whose overrides beat any segment override.
    pub fn to_context(&self) -> EvaluationContext {
        let features = self
            .feature_states
            .iter()
            .map(|feature_state| {
                (
                    feature_state.feature.name.clone(),
                    feature_state.to_feature_context(),
                )
            })
            .collect::<BTreeMap<_, _>>();

        let segments = self
            .project
            .segments
            .iter()
            .map(SegmentDocument::to_segment_context)
            .chain(identity_override_segments(&self.identity_overrides))
            .collect::<Vec<_>>();

        log::debug!(target: "flag_engine",
                    environment:display = self.name,
                    features = features.len(),
                    segments = segments.len();
                    "mapped environment document");

        EvaluationContext {
            environment: EnvironmentContext {
                key: self.api_key.clone(),
                name: self.name.clone(),
            },
            identity: None,
            features: Arc::new(features),
            segments: Arc::new(segments),
        }
    }
}

impl From<&EnvironmentDocument> for EvaluationContext {
    fn from(document: &EnvironmentDocument) -> Self {
        document.to_context()
    }
}

impl SegmentDocument {
    fn to_segment_context(&self) -> SegmentContext {
        SegmentContext {
            key: self.id.to_string(),
            name: self.name.clone(),
            rules: self.rules.iter().map(SegmentRuleDocument::to_rule).collect(),
            overrides: self
                .feature_states
                .iter()
                .map(FeatureStateDocument::to_feature_context)
                .collect(),
            metadata: Metadata::from([
                (METADATA_SOURCE.to_owned(), SOURCE_SEGMENT.into()),
                ("segment_id".to_owned(), self.id.into()),
            ]),
        }
    }
}

impl SegmentRuleDocument {
    fn to_rule(&self) -> SegmentRule {
        SegmentRule {
            rule_type: self.rule_type,
            conditions: self
                .conditions
                .iter()
                .map(|condition| Condition {
                    property: condition.property_.clone(),
                    operator: condition.operator,
                    value: condition.value.clone(),
                })
                .collect(),
            rules: self.rules.iter().map(SegmentRuleDocument::to_rule).collect(),
        }
    }
}

impl FeatureStateDocument {
    /// Variants are hashed against `django_id`, or `featurestate_uuid` for feature states that
    /// have not been persisted yet.
    fn hashing_key(&self) -> String {
        match (self.django_id, &self.featurestate_uuid) {
            (Some(django_id), _) => django_id.to_string(),
            (None, Some(uuid)) => uuid.clone(),
            (None, None) => String::new(),
        }
    }

    fn to_feature_context(&self) -> FeatureContext {
        FeatureContext {
            key: self.hashing_key(),
            name: self.feature.name.clone(),
            enabled: self.enabled,
            value: self.feature_state_value.clone(),
            priority: self
                .feature_segment
                .as_ref()
                .and_then(|feature_segment| feature_segment.priority),
            variants: self
                .multivariate_feature_state_values
                .iter()
                .enumerate()
                .map(|(position, variant)| FeatureValue {
                    value: variant.multivariate_feature_option.value.clone(),
                    weight: variant.percentage_allocation,
                    priority: variant.priority(position),
                })
                .collect(),
            metadata: Metadata::from([("feature_id".to_owned(), self.feature.id.into())]),
        }
    }
}

impl MultivariateFeatureStateValueDocument {
    /// Unsaved variants have no `id` and are ordered by their uuid read as a 128-bit number.
    fn priority(&self, position: usize) -> f64 {
        if let Some(id) = self.id {
            return id as f64;
        }
        self.mv_fs_value_uuid
            .as_deref()
            .and_then(|uuid| u128::from_str_radix(&uuid.replace('-', ""), 16).ok())
            .map_or(position as f64, |uuid| uuid as f64)
    }
}

/// One segment per distinct set of overrides, matching every identifier sharing that set.
fn identity_override_segments(
    identity_overrides: &[IdentityOverrideDocument],
) -> impl Iterator<Item = SegmentContext> {
    let mut groups: Vec<(Vec<String>, Vec<FeatureContext>)> = Vec::new();
    let mut group_index: HashMap<Vec<(String, bool, String)>, usize> = HashMap::new();

    for identity_override in identity_overrides {
        if identity_override.identity_features.is_empty() {
            continue;
        }

        let mut overrides: Vec<FeatureContext> = identity_override
            .identity_features
            .iter()
            .map(|feature_state| FeatureContext {
                priority: Some(STRONGEST_PRIORITY),
                ..feature_state.to_feature_context()
            })
            .collect();
        overrides.sort_by(|a, b| a.name.cmp(&b.name));

        let group_key = overrides
            .iter()
            .map(|feature| {
                (
                    feature.name.clone(),
                    feature.enabled,
                    format!("{}:{}", feature.value.type_name(), feature.value),
                )
            })
            .collect();

        let index = *group_index.entry(group_key).or_insert_with(|| {
            groups.push((Vec::new(), overrides));
            groups.len() - 1
        });
        groups[index].0.push(identity_override.identifier.clone());
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(index, (identifiers, overrides))| SegmentContext {
            key: format!("{IDENTITY_OVERRIDES_SEGMENT_NAME}_{index}"),
            name: IDENTITY_OVERRIDES_SEGMENT_NAME.to_owned(),
            rules: vec![SegmentRule {
                rule_type: RuleType::All,
                conditions: vec![Condition {
                    property: "$.identity.identifier".to_owned(),
                    operator: ConditionOperator::In,
                    value: ConditionValue::Multiple(identifiers),
                }],
                rules: vec![],
            }],
            overrides,
            metadata: Metadata::from([(
                METADATA_SOURCE.to_owned(),
                SOURCE_IDENTITY_OVERRIDE.into(),
            )]),
        })
}

/// Returns `true` for segments synthesized from identity overrides.
pub(crate) fn is_identity_override_segment(metadata: &Metadata) -> bool {
    metadata
        .get(METADATA_SOURCE)
        .and_then(|source| source.as_str())
        == Some(SOURCE_IDENTITY_OVERRIDE)
}
