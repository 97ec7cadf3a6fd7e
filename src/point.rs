use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single already-collected metric point.
///
/// Points are handed to the outputs in batches by the metric source and are
/// only ever read.
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Series (measurement) name.
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Nanoseconds since the unix epoch. Not unique across points.
    pub timestamp_ns: i64,
}

impl Point {
    pub fn new(name: impl Into<String>, timestamp_ns: i64) -> Self {
        Point {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Field value of a [`Point`].
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl Point {
    /// Points without a single writable field are left out of every encoding.
    pub(crate) fn has_writable_fields(&self) -> bool {
        self.fields.values().any(FieldValue::is_writable)
    }
}

impl FieldValue {
    /// Values that cannot be represented on the wire (NaN, +/-inf).
    pub(crate) fn is_writable(&self) -> bool {
        match self {
            FieldValue::Float(value) => value.is_finite(),
            _ => true,
        }
    }
}

/// Raw rendering, as used by pipeline records.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Unsigned(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Boolean(value) => write!(f, "{value}"),
            FieldValue::String(value) => f.write_str(value),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Unsigned(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

/// Counts the bytes a [`fmt::Display`] implementation would produce without
/// allocating.
#[derive(Debug, Default)]
pub(crate) struct LenCounter(pub(crate) usize);

impl fmt::Write for LenCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 = self.0.saturating_add(s.len());

        Ok(())
    }
}

pub(crate) fn display_len(value: &impl fmt::Display) -> usize {
    use std::fmt::Write;

    let mut counter = LenCounter::default();
    let _ = write!(counter, "{value}");

    counter.0
}
