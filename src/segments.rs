use std::collections::{hash_map::Entry, HashMap};

use crate::{
    context::{FeatureContext, RuleType, SegmentContext},
    hashing::PercentageHasher,
    EvaluationContext, Result,
};

impl SegmentContext {
    /// Return `true` if the context belongs to the segment.
    ///
    /// All top-level rules must match. A segment without rules never matches.
    pub(crate) fn matches(
        &self,
        context: &EvaluationContext,
        hasher: &impl PercentageHasher,
    ) -> Result<bool> {
        if self.rules.is_empty() {
            return Ok(false);
        }

        RuleType::All.evaluate(
            self.rules
                .iter()
                .map(|rule| rule.matches(context, &self.key, hasher)),
        )
    }
}

/// Feature override selected for a feature, and the segment it came from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentOverride<'a> {
    pub feature: &'a FeatureContext,
    pub segment_name: &'a str,
}

/// Winning segment override per feature name.
#[derive(Debug, Default)]
pub(crate) struct SegmentOverrides<'a> {
    overrides: HashMap<&'a str, SegmentOverride<'a>>,
}

impl<'a> SegmentOverrides<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record overrides of a matched segment.
    ///
    /// An override replaces the one already recorded for the same feature only if its priority is
    /// strictly stronger. On ties, the segment added first wins.
    pub fn add_segment(&mut self, segment: &'a SegmentContext) {
        for feature in &segment.overrides {
            let candidate = SegmentOverride {
                feature,
                segment_name: &segment.name,
            };

            match self.overrides.entry(feature.name.as_str()) {
                Entry::Vacant(entry) => {
                    entry.insert(candidate);
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    if is_stronger(feature.priority, existing.feature.priority) {
                        log::trace!(target: "flag_engine",
                                    feature:display = feature.name,
                                    segment:display = segment.name,
                                    replaced_segment = existing.segment_name;
                                    "segment override replaced by a stronger one");
                        *existing = candidate;
                    }
                }
            }
        }
    }

    pub fn get(&self, feature_name: &str) -> Option<&SegmentOverride<'a>> {
        self.overrides.get(feature_name)
    }
}

/// Lower priorities are stronger. A missing priority is weaker than any concrete one.
fn is_stronger(priority: Option<f64>, than: Option<f64>) -> bool {
    match (priority, than) {
        (Some(priority), Some(than)) => priority < than,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
