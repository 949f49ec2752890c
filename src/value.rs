use std::fmt;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Scalar value of a trait, a feature or a feature variant.
///
/// JSON numbers keep their kind: integral numbers are deserialized as [`Value::Integer`], all
/// other numbers as [`Value::Float`]. Condition operators dispatch on this kind.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `i64`, `f64`, and `bool`:
/// ```
/// # use flag_engine::Value;
/// let string_value: Value = "example".into();
/// let integer_value: Value = 42i64.into();
/// let float_value: Value = 4.2.into();
/// let bool_value: Value = true.into();
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum Value {
    /// Absence of value.
    #[default]
    Null,
    /// A boolean value.
    Boolean(bool),
    /// An integral number.
    Integer(i64),
    /// A floating-point number.
    Float(f64),
    /// A string value.
    String(String),
}

impl Value {
    /// Returns `true` if the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[allow(missing_docs)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers are widened to `f64`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Name of the runtime type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Canonical string form. This is what `IN` membership, `REGEX` and percentage splits operate on.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
        }
    }
}
