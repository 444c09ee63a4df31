//! Cell values and the coercion rules applied to raw source text.
//!
//! Raw CSV cells arrive as text. Transformers coerce the columns they care
//! about; anything that fails to coerce becomes `Null` and is filtered later
//! by the owning transformer, never raised.

use crate::{
    schema::ColumnKind,
    types::{DATE_FORMAT, TIMESTAMP_FORMAT},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Cell contents that read as missing.
const NULL_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NULL", "null", "NaN", "nan", "None", "<NA>",
];

/// Naive formats tried in order after offset-aware parsing fails.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Interpret one raw CSV cell. Null markers become `Null`, everything
    /// else stays text until a transformer coerces it.
    pub fn from_raw(raw: &str) -> Self {
        if NULL_MARKERS.contains(&raw.trim()) {
            Value::Null
        } else {
            Value::Text(raw.to_string())
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Numeric coercion: parse failures, NaN and infinities become `Null`.
    pub fn to_numeric(&self) -> Value {
        let parsed = match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(f) if f.is_finite() => Value::Float(f),
            _ => Value::Null,
        }
    }

    /// Integer inference for identifier columns. Text that parses as an
    /// integer becomes `Int`; anything else is returned unchanged.
    pub fn infer_integer(&self) -> Value {
        match self {
            Value::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => self.clone(),
            },
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Value::Int(*f as i64),
            other => other.clone(),
        }
    }

    /// Timestamp coercion: already-parsed timestamps pass through, text is
    /// parsed, everything else becomes `Null`.
    pub fn to_timestamp(&self) -> Value {
        match self {
            Value::Timestamp(ts) => Value::Timestamp(*ts),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null),
            Value::Text(s) => parse_timestamp(s)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Whether this value is acceptable in a column of `kind`.
    /// `Null` is acceptable everywhere; nullability is a separate check.
    pub fn matches_kind(&self, kind: ColumnKind) -> bool {
        matches!(
            (self, kind),
            (Value::Null, _)
                | (Value::Int(_), ColumnKind::Integer)
                | (Value::Float(_), ColumnKind::Real)
                | (Value::Text(_), ColumnKind::Text)
                | (Value::Bool(_), ColumnKind::Boolean)
                | (Value::Date(_), ColumnKind::Date)
                | (Value::Timestamp(_), ColumnKind::Timestamp)
        )
    }

    /// Rebuild a typed value from its canonical text form, as written by
    /// `Display`. Used when reading tables back from text-based storage.
    pub fn parse_as(raw: &str, kind: ColumnKind) -> Value {
        if raw.is_empty() {
            return Value::Null;
        }
        let parsed = match kind {
            ColumnKind::Integer => raw.parse::<i64>().ok().map(Value::Int),
            ColumnKind::Real => raw.parse::<f64>().ok().map(Value::Float),
            ColumnKind::Boolean => match raw {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            ColumnKind::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .ok()
                .map(Value::Date),
            ColumnKind::Timestamp => parse_timestamp(raw).map(Value::Timestamp),
            ColumnKind::Text => None,
        };
        parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
    }
}

/// Parse a source timestamp into a UTC-naive instant.
///
/// Offset-aware inputs are converted to UTC before the offset is dropped;
/// a bare date means midnight. Returns `None` when nothing matches.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.strip_suffix(" UTC").or_else(|| s.strip_suffix('Z')).unwrap_or(s);

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Bool(b) => serializer.serialize_bool(*b),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

// Floats compare by bit pattern so values can be hashed and used as
// dedup and join keys. -0.0 is folded into 0.0 first.
fn float_bits(x: f64) -> u64 {
    if x == 0.0 {
        0.0f64.to_bits()
    } else {
        x.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_bits(*a) == float_bits(*b),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(i) => i.hash(state),
            Value::Float(x) => float_bits(*x).hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
        }
    }
}
