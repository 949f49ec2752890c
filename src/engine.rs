use crate::{
    document::{is_identity_override_segment, EnvironmentDocument},
    hashing::{Md5Hasher, PercentageHasher},
    result::{EvaluationResult, Reason, SegmentResult},
    segments::SegmentOverrides,
    EngineConfig, EvaluationContext, Result, SegmentContext,
};

/// Flag evaluation engine.
///
/// The engine holds no state besides its configuration. Evaluation never modifies the context,
/// so a single engine and a single loaded context can be shared between threads.
///
/// # Examples
/// ```
/// # use flag_engine::{Engine, EnvironmentDocument, IdentityContext, Traits};
/// # fn main() -> flag_engine::Result<()> {
/// let engine = Engine::new();
/// let document = EnvironmentDocument::from_json(br#"{
///     "api_key": "key",
///     "project": {"segments": []},
///     "feature_states": [{
///         "feature": {"id": 1, "name": "banner"},
///         "enabled": true,
///         "feature_state_value": "hello",
///         "django_id": 1
///     }]
/// }"#)?;
/// let environment = engine.context_from_document(&document)?;
///
/// let context = environment.with_identity(IdentityContext::new("user-1"));
/// let result = engine.evaluate(&context)?;
/// assert!(result.is_feature_enabled("banner")?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Engine<H = Md5Hasher> {
    config: EngineConfig<H>,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        EngineConfig::new().to_engine()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl<H: PercentageHasher> Engine<H> {
    /// Create a new `Engine` using the specified configuration.
    pub fn from_config(config: EngineConfig<H>) -> Self {
        Engine { config }
    }

    /// Evaluate all features of the context.
    ///
    /// Identity keys missing from the context are derived on a copy, so `context` is left as is.
    /// Returns an error if a segment condition uses an operator that is not supported for the
    /// trait's type.
    pub fn evaluate(&self, context: &EvaluationContext) -> Result<EvaluationResult> {
        let context = context.enriched();
        let identity_key = context.identity_key();

        let mut overrides = SegmentOverrides::new();
        let mut segments = Vec::new();
        for segment in self.matched_segments(&context)? {
            overrides.add_segment(segment);
            segments.push(SegmentResult {
                key: segment.key.clone(),
                name: segment.name.clone(),
                metadata: segment.metadata.clone(),
            });
        }

        let flags = context
            .features
            .iter()
            .map(|(name, feature)| {
                let flag = match overrides.get(name) {
                    Some(segment_override) => segment_override.feature.evaluate(
                        identity_key,
                        Reason::TargetingMatch {
                            segment: segment_override.segment_name.to_owned(),
                        },
                        &self.config.hasher,
                    ),
                    None => feature.evaluate(identity_key, Reason::Default, &self.config.hasher),
                };

                log::trace!(target: "flag_engine",
                            feature:display = name,
                            identity_key,
                            value:serde = flag.value,
                            reason:display = flag.reason;
                            "evaluated a flag");

                (name.clone(), flag)
            })
            .collect();

        Ok(EvaluationResult { flags, segments })
    }

    /// Returns `true` if the context's identity belongs to `segment`.
    ///
    /// The segment doesn't need to be part of the context.
    pub fn is_in_segment(
        &self,
        context: &EvaluationContext,
        segment: &SegmentContext,
    ) -> Result<bool> {
        segment.matches(&context.enriched(), &self.config.hasher)
    }

    /// Segments of the context that the identity belongs to, without evaluating flags.
    ///
    /// Segments synthesized from identity overrides are not included.
    pub fn matching_segments(&self, context: &EvaluationContext) -> Result<Vec<SegmentResult>> {
        let context = context.enriched();
        Ok(self
            .matched_segments(&context)?
            .into_iter()
            .filter(|segment| !is_identity_override_segment(&segment.metadata))
            .map(|segment| SegmentResult {
                key: segment.key.clone(),
                name: segment.name.clone(),
                metadata: segment.metadata.clone(),
            })
            .collect())
    }

    /// Map an environment document to a context, validating variant weights unless disabled in
    /// [`EngineConfig`].
    pub fn context_from_document(
        &self,
        document: &EnvironmentDocument,
    ) -> Result<EvaluationContext> {
        let context = document.to_context();
        if self.config.validate_percentage_allocations {
            context.validate()?;
        }
        Ok(context)
    }

    /// Parse an environment document from JSON and map it to a context.
    pub fn context_from_json(&self, json: &[u8]) -> Result<EvaluationContext> {
        self.context_from_document(&EnvironmentDocument::from_json(json)?)
    }

    /// Segments matched by an enriched context, in context order.
    fn matched_segments<'a>(
        &self,
        context: &'a EvaluationContext,
    ) -> Result<Vec<&'a SegmentContext>> {
        let mut matched = Vec::new();
        for segment in context.segments.iter() {
            if segment.matches(context, &self.config.hasher)? {
                log::trace!(target: "flag_engine",
                            segment:display = segment.name,
                            identity_key = context.identity_key();
                            "identity matched a segment");
                matched.push(segment);
            }
        }
        Ok(matched)
    }
}
