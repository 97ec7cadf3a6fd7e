use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::point::{FieldValue, Point};
use crate::record::{namespaced_key, TIMESTAMP_KEY};

/// Value type of a repo schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Long,
    Float,
    String,
    Boolean,
}

impl ValueType {
    #[must_use]
    pub const fn of(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(_) | FieldValue::Unsigned(_) => ValueType::Long,
            FieldValue::Float(_) => ValueType::Float,
            FieldValue::Boolean(_) => ValueType::Boolean,
            FieldValue::String(_) => ValueType::String,
        }
    }
}

/// One column of a pipeline repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub key: String,
    #[serde(rename = "valtype")]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
}

impl SchemaEntry {
    pub fn new(key: impl Into<String>, value_type: ValueType) -> Self {
        SchemaEntry { key: key.into(), value_type, required: false }
    }
}

/// Raw (not namespaced) tag and field keys observed for one series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesKeys {
    pub tags: BTreeSet<String>,
    pub fields: BTreeSet<String>,
}

/// Everything the reconcilers need to know about a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedSchema {
    /// Distinct series names, first-seen order.
    pub series: Vec<String>,
    /// Distinct namespaced tag keys, first-seen order.
    pub tags: Vec<String>,
    /// Namespaced field key to inferred type. The first observed type wins.
    pub fields: BTreeMap<String, ValueType>,
    pub per_series: BTreeMap<String, SeriesKeys>,
}

/// Collects the series, tags and typed fields a batch would write.
///
/// Non-finite floats are never written, so they do not shape the schema; a
/// point left with no writable field is ignored entirely.
#[must_use]
pub fn extract(points: &[Point]) -> ExtractedSchema {
    let mut out = ExtractedSchema::default();
    let mut seen_tags = BTreeSet::new();

    for point in points.iter().filter(|point| point.has_writable_fields()) {
        if !out.per_series.contains_key(&point.name) {
            out.series.push(point.name.clone());
        }
        let keys = out.per_series.entry(point.name.clone()).or_default();

        for key in point.tags.keys() {
            keys.tags.insert(key.clone());

            let namespaced = namespaced_key(&point.name, key);
            if seen_tags.insert(namespaced.clone()) {
                out.tags.push(namespaced);
            }
        }
        for (key, value) in point.fields.iter().filter(|(_, value)| value.is_writable()) {
            keys.fields.insert(key.clone());
            out.fields
                .entry(namespaced_key(&point.name, key))
                .or_insert_with(|| ValueType::of(value));
        }
    }

    out
}

/// Computes the schema entries missing from `fetched`.
///
/// New tags are typed `string`, new fields keep their inferred type and a
/// `timestamp: long` entry is added when absent. Keys already present in
/// `fetched` are never returned, whatever their type. The result is sorted by
/// key.
#[must_use]
pub fn merge_delta(fetched: &[SchemaEntry], extracted: &ExtractedSchema) -> Vec<SchemaEntry> {
    let mut working: BTreeMap<&str, ValueType> =
        fetched.iter().map(|entry| (entry.key.as_str(), entry.value_type)).collect();

    for tag in &extracted.tags {
        working.entry(tag.as_str()).or_insert(ValueType::String);
    }
    for (field, value_type) in &extracted.fields {
        working.entry(field.as_str()).or_insert(*value_type);
    }
    working.entry(TIMESTAMP_KEY).or_insert(ValueType::Long);

    for entry in fetched {
        working.remove(entry.key.as_str());
    }

    working
        .into_iter()
        .map(|(key, value_type)| SchemaEntry::new(key, value_type))
        .collect()
}
