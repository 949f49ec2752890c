//! Local feature flag evaluation engine.
//!
//! # Overview
//!
//! Given a snapshot of an environment (features, segments and identity overrides) and an identity
//! with its traits, the [`Engine`] computes which features are enabled and what their values are.
//! Evaluation is a pure function of its input: no network calls, no I/O, no state kept between
//! calls.
//!
//! The input is an [`EvaluationContext`], usually mapped from an [`EnvironmentDocument`] fetched
//! from the flags API. The output is an [`EvaluationResult`] holding a [`FlagResult`] per feature
//! and the segments the identity belongs to.
//!
//! Percentage splits and multivariate features are bucketed with a stable MD5-based hash, so an
//! identity receives the same variant across evaluations and across engine implementations.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Data that doesn't match (missing traits, values of an unexpected type) makes conditions
//! evaluate to `false` and is never an error. Errors indicate malformed environment configuration
//! (e.g., an operator that is not supported for the trait's type) or a lookup of a feature that
//! doesn't exist.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, with target `flag_engine`. Consider integrating a `log`-compatible logger
//! implementation for better visibility into evaluations.
//!
//! # Examples
//!
//! ```
//! # use flag_engine::{Engine, IdentityContext, Traits, Value};
//! # fn main() -> flag_engine::Result<()> {
//! let engine = Engine::new();
//! let environment = engine.context_from_json(br#"{
//!     "api_key": "key",
//!     "project": {"segments": []},
//!     "feature_states": [{
//!         "feature": {"id": 1, "name": "max_upload_mb"},
//!         "enabled": true,
//!         "feature_state_value": 10,
//!         "django_id": 1
//!     }]
//! }"#)?;
//!
//! let identity = IdentityContext::new("user-1")
//!     .with_traits(Traits::from([("plan".to_owned(), "premium".into())]));
//! let result = engine.evaluate(&environment.with_identity(identity))?;
//!
//! assert_eq!(result.feature_value("max_upload_mb")?, &Value::Integer(10));
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod config;
mod context;
mod document;
mod engine;
mod error;
mod flags;
mod hashing;
mod result;
mod rules;
mod segments;
mod value;

pub use config::EngineConfig;
pub use context::{
    Condition, ConditionOperator, ConditionValue, EnvironmentContext, EvaluationContext,
    FeatureContext, FeatureValue, IdentityContext, Metadata, RuleType, SegmentContext,
    SegmentRule, Traits, STRONGEST_PRIORITY,
};
pub use document::{
    ConditionDocument, EnvironmentDocument, FeatureDocument, FeatureSegmentDocument,
    FeatureStateDocument, IdentityOverrideDocument, MultivariateFeatureOptionDocument,
    MultivariateFeatureStateValueDocument, ProjectDocument, SegmentDocument, SegmentRuleDocument,
    IDENTITY_OVERRIDES_SEGMENT_NAME,
};
pub use engine::Engine;
pub use error::{Error, Result};
pub use hashing::{hashed_percentage_for_object_ids, Md5Hasher, PercentageHasher};
pub use result::{EvaluationResult, FlagResult, ParseReasonError, Reason, SegmentResult};
pub use value::Value;
