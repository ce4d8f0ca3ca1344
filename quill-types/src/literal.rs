//! Scalar literal values.
//!
//! [`ScalarValue`] is the engine's owned scalar representation, used for
//! column statistics bounds, `ADD COLUMN` defaults, and scan filter
//! operands. It mirrors the small set of logical types the storage plane
//! indexes and aggregates.

use std::cmp::Ordering;
use std::fmt;

/// An owned scalar value of one of the engine's logical types.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    /// Whether this value is the SQL NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Total order over values of the same logical type.
    ///
    /// Returns `None` when the two values have different types or either is
    /// NULL; statistics accumulation treats that as "no ordering update".
    /// Floats are ordered by `f64::total_cmp`, so NaN has a defined rank.
    pub fn try_cmp(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => Some(a.total_cmp(b)),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_same_type() {
        assert_eq!(
            ScalarValue::Int64(1).try_cmp(&ScalarValue::Int64(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            ScalarValue::from("b").try_cmp(&ScalarValue::from("a")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_cmp_mixed_or_null_is_none() {
        assert_eq!(ScalarValue::Int64(1).try_cmp(&ScalarValue::Null), None);
        assert_eq!(
            ScalarValue::Int64(1).try_cmp(&ScalarValue::Float64(1.0)),
            None
        );
    }
}
