use std::sync::Arc;

use thiserror::Error;

use crate::context::ConditionOperator;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading an environment or evaluating flags.
///
/// Data that simply doesn't match (a trait that is missing, a number that doesn't parse, an invalid
/// semver string) is never an error: such conditions evaluate to `false`. Errors are reserved for
/// malformed configuration and for lookups of unknown features.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A segment condition uses an operator that has no meaning for the runtime type of the
    /// context value (e.g., `GREATER_THAN` on a boolean trait).
    #[error("operator {operator:?} is not supported for {value_type} values")]
    UnsupportedOperator {
        /// Operator of the offending condition.
        operator: ConditionOperator,
        /// Runtime type of the context value.
        value_type: &'static str,
    },

    /// The requested feature does not exist in the evaluated environment.
    #[error("feature {0:?} not found")]
    FeatureNotFound(String),

    /// Variant weights of a feature add up to more than 100 percent.
    #[error("percentage allocations of feature {feature:?} add up to {total}, expected at most 100")]
    InvalidPercentageAllocation {
        /// Name of the feature.
        feature: String,
        /// Sum of all variant weights.
        total: f64,
    },

    /// The environment document is not valid JSON or does not follow the expected format.
    #[error("error parsing environment document")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    DocumentParse(#[source] Arc<serde_json::Error>),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::DocumentParse(Arc::new(value))
    }
}
