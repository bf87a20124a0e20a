//! Work-item identifiers and raw field values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field holding the work-item title. Reporting only.
pub const FIELD_TITLE: &str = "System.Title";
/// Field holding the work-item type (Epic, Feature, Task, ...). Reporting only.
pub const FIELD_TYPE: &str = "System.WorkItemType";
/// Field holding the workflow state. Reporting only.
pub const FIELD_STATE: &str = "System.State";

/// Metadata fields fetched alongside the rollup fields, in request order.
pub const METADATA_FIELDS: [&str; 3] = [FIELD_TITLE, FIELD_TYPE, FIELD_STATE];

/// Identifier of a work item in the tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub u64);

impl WorkItemId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for WorkItemId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw field value as returned by the tracker.
///
/// Absent fields are represented by the key being missing from the
/// [`FieldSnapshot`], never by a variant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric reading of the value.
    ///
    /// Strings count when they parse as a decimal number (the tracker echoes
    /// back the string form written by earlier runs).
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Number(_) => None,
        }
    }

    /// Convert a JSON value from the tracker. `null` maps to `None` (absent).
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Current field values of one work item, keyed by reference name.
pub type FieldSnapshot = BTreeMap<String, FieldValue>;

/// Build a [`FieldSnapshot`] from a JSON object, dropping `null` entries.
#[must_use]
pub fn snapshot_from_json(fields: &serde_json::Map<String, serde_json::Value>) -> FieldSnapshot {
    fields
        .iter()
        .filter_map(|(name, value)| FieldValue::from_json(value).map(|v| (name.clone(), v)))
        .collect()
}
