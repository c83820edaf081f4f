use serde::{Deserialize, Serialize};

use super::document::DocumentBundle;
use crate::rules::{Flag, Recommendation};

pub const SCHEMA_VERSION: &str = "1.0.0";

/// One measurement as submitted for interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabItem {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub value: f64,
    pub unit: String,
}

/// A measurement after unit conversion and range resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedItem {
    pub code: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    pub catalog_miss: bool,
    /// Kind of conversion failure, when the value could not be converted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_failed: Option<String>,
}

impl NormalizedItem {
    pub(crate) fn passthrough(item: &LabItem) -> Self {
        Self {
            code: item.code.clone(),
            name: item.name.clone(),
            value: item.value,
            unit: item.unit.clone(),
            low: None,
            high: None,
            catalog_miss: false,
            conversion_failed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: String,
    pub schema_version: String,
    /// False when publication was withheld or failed.
    pub published: bool,
}

/// The interpretation payload, returned to callers and published as an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretationResult {
    pub patient_id: String,
    pub items: Vec<NormalizedItem>,
    pub flags: Vec<Flag>,
    pub recommendations: Vec<Recommendation>,
    pub document: DocumentBundle,
    pub meta: EventMeta,
}

/// A raw result to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLabResult {
    pub patient_id: String,
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub value: f64,
    pub unit: String,
}
