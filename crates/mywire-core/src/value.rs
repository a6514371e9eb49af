//! Dynamic SQL values.

use crate::temporal::{Date, DateTime, Temporal, Time};
use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// The set of variants is closed: every column the server can send decodes to
/// exactly one of them, and every parameter is bound from one of them.
/// Unsigned columns decode to [`Value::UInt`] so the full `u64` range survives,
/// and `FLOAT` columns are widened losslessly into [`Value::Double`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Signed integer
    Int(i64),

    /// Unsigned integer
    UInt(u64),

    /// 64-bit floating point
    Double(f64),

    /// Binary data
    Bytes(Vec<u8>),

    /// Text string (also DECIMAL, ENUM, SET and JSON columns)
    Text(String),

    /// DATE, DATETIME, TIMESTAMP or TIME
    Temporal(Temporal),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int(_) => "BIGINT",
            Value::UInt(_) => "BIGINT UNSIGNED",
            Value::Double(_) => "DOUBLE",
            Value::Bytes(_) => "BLOB",
            Value::Text(_) => "TEXT",
            Value::Temporal(t) => t.type_name(),
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(v) => Some(*v != 0),
            Value::UInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64 without loss.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Try to convert this value to a u64 without loss.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as raw bytes. Text values yield their UTF-8 bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_temporal(&self) -> Option<&Temporal> {
        match self {
            Value::Temporal(t) => Some(t),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<Temporal> for Value {
    fn from(v: Temporal) -> Self {
        Value::Temporal(v)
    }
}

impl From<Date> for Value {
    fn from(v: Date) -> Self {
        Value::Temporal(Temporal::Date(v))
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::Temporal(Temporal::DateTime(v))
    }
}

impl From<Time> for Value {
    fn from(v: Time) -> Self {
        Value::Temporal(Temporal::Time(v))
    }
}

impl TryFrom<chrono::NaiveDate> for Value {
    type Error = crate::Error;

    fn try_from(v: chrono::NaiveDate) -> crate::Result<Self> {
        Ok(Value::Temporal(Temporal::Date(v.try_into()?)))
    }
}

impl TryFrom<chrono::NaiveDateTime> for Value {
    type Error = crate::Error;

    fn try_from(v: chrono::NaiveDateTime) -> crate::Result<Self> {
        Ok(Value::Temporal(Temporal::DateTime(v.try_into()?)))
    }
}

impl From<chrono::NaiveTime> for Value {
    fn from(v: chrono::NaiveTime) -> Self {
        Value::Temporal(Temporal::Time(v.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_range_is_preserved() {
        let v = Value::from(u64::MAX);
        assert_eq!(v, Value::UInt(u64::MAX));
        assert_eq!(v.as_u64(), Some(u64::MAX));
        assert_eq!(v.as_i64(), None);

        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::UInt(42).as_i64(), Some(42));
    }

    #[test]
    fn float_widening_is_exact() {
        let f = 3.402_823_5e38_f32;
        let Value::Double(d) = Value::from(f) else {
            panic!("expected double");
        };
        assert_eq!(d as f32, f);
    }

    #[test]
    fn null_and_empty_are_distinct() {
        assert_ne!(Value::Null, Value::Text(String::new()));
        assert_ne!(Value::Null, Value::Bytes(Vec::new()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn serde_keeps_variant() {
        let v = Value::UInt(18_446_744_073_709_551_615);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);

        let t = Value::from(Time::parse("-838:59:59").unwrap());
        let json = serde_json::to_string(&t).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
