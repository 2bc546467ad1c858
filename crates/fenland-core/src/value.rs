//! Dynamic property values.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// A dynamically-typed entity property value.
///
/// Entities store their scalar properties as `Value`s and the flush
/// engine binds them as statement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp (microseconds since epoch, UTC)
    Timestamp(i64),

    /// JSON value
    Json(serde_json::Value),
}

const MICROS_PER_SECOND: i64 = 1_000_000;

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render a temporal value at second precision.
    ///
    /// Dates render as `YYYY-MM-DD`, times as `HH:MM:SS`, and timestamps
    /// as `YYYY-MM-DDTHH:MM:SS`. Text is parsed as RFC 3339 or one of the
    /// common SQL literal layouts first. Returns `None` for values that
    /// have no temporal reading.
    pub fn normalized_datetime(&self) -> Option<String> {
        match self {
            Value::Date(days) => {
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
                let date = epoch.checked_add_signed(chrono::Duration::days(i64::from(*days)))?;
                Some(date.format("%Y-%m-%d").to_string())
            }
            Value::Time(micros) => {
                let secs = u32::try_from(micros.div_euclid(MICROS_PER_SECOND)).ok()?;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?;
                Some(time.format("%H:%M:%S").to_string())
            }
            Value::Timestamp(micros) => {
                let dt = DateTime::from_timestamp(micros.div_euclid(MICROS_PER_SECOND), 0)?;
                Some(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
            }
            Value::Text(s) => normalize_text(s),
            _ => None,
        }
    }
}

fn normalize_text(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let utc = dt.naive_utc();
        return Some(truncate(utc).format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(truncate(dt).format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S%.f") {
        return Some(time.with_nanosecond(0)?.format("%H:%M:%S").to_string());
    }
    None
}

fn truncate(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

// Floats hash by bit pattern; everything else by content.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Decimal(v) | Value::Text(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) | Value::Timestamp(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
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

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
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
