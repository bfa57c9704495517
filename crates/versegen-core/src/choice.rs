use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One untyped row as returned by the store.
pub type Record = Map<String, Value>;

/// Fields tried, in order, when looking for a row's display text.
pub const LABEL_FIELDS: &[&str] = &[
    "name",
    "display_name",
    "title",
    "label",
    "code",
    "abbreviation",
    "id",
];

/// An opaque stable key and the text shown for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Choice {
    pub key: String,
    pub label: String,
}

impl Choice {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }

    /// A choice whose key doubles as its label (chapter and verse numbers).
    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            key: value.clone(),
            label: value,
        }
    }

    /// Build a choice from a store row; `None` when the id or label is
    /// missing or empty.
    pub fn from_record(record: &Record) -> Option<Self> {
        let key = record_id(record).filter(|k| !k.is_empty())?;
        let label = record_label(record).filter(|l| !l.is_empty())?;
        Some(Self { key, label })
    }
}

/// Render a JSON value as text; null has no text.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn record_id(record: &Record) -> Option<String> {
    record.get("id").and_then(value_text)
}

/// First non-null field from [`LABEL_FIELDS`]. An empty string counts as
/// present, so it does not fall through to the next candidate.
pub fn record_label(record: &Record) -> Option<String> {
    LABEL_FIELDS
        .iter()
        .find_map(|field| record.get(*field).and_then(value_text))
}

/// Convert rows to choices, dropping malformed rows and repeated keys.
pub fn choices_from_records(records: &[Record]) -> Vec<Choice> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(Choice::from_record)
        .filter(|choice| seen.insert(choice.key.clone()))
        .collect()
}

/// Distinct non-empty values of one column, in first-seen order.
pub fn distinct_column(records: &[Record], column: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(column).and_then(value_text))
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
