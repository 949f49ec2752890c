use crate::{
    context::{FeatureContext, FeatureValue},
    hashing::PercentageHasher,
    result::{FlagResult, Reason},
};

impl FeatureContext {
    /// Evaluate the feature for an identity.
    ///
    /// Multivariate features select a variant when the identity has a key. Otherwise, or when the
    /// identity falls outside of all variant buckets, the feature's own value is returned with
    /// `reason`.
    pub(crate) fn evaluate(
        &self,
        identity_key: Option<&str>,
        reason: Reason,
        hasher: &impl PercentageHasher,
    ) -> FlagResult {
        let variant = identity_key.and_then(|identity_key| self.select_variant(identity_key, hasher));

        let (value, reason) = match variant {
            Some(variant) => (
                variant.value.clone(),
                Reason::Split {
                    weight: variant.weight,
                },
            ),
            None => (self.value.clone(), reason),
        };

        FlagResult {
            name: self.name.clone(),
            enabled: self.enabled,
            value,
            reason,
            metadata: self.metadata.clone(),
        }
    }

    /// Variants are laid out as consecutive percentage buckets in ascending priority order. The
    /// identity lands in the bucket containing its hashed percentage, if any.
    fn select_variant(
        &self,
        identity_key: &str,
        hasher: &impl PercentageHasher,
    ) -> Option<&FeatureValue> {
        if self.variants.is_empty() {
            return None;
        }

        let percentage = hasher.hashed_percentage(&[self.key.as_str(), identity_key]);

        let mut variants: Vec<&FeatureValue> = self.variants.iter().collect();
        variants.sort_by(|a, b| a.priority.total_cmp(&b.priority));

        let mut start = 0.0;
        for variant in variants {
            let end = start + variant.weight;
            if start <= percentage && percentage < end {
                return Some(variant);
            }
            start = end;
        }
        None
    }
}
