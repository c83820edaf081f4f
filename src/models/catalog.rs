use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Sex, TestStatus};

/// A lab test definition. Identity is `code`; reloads upsert in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabTest {
    pub id: i64,
    pub code: String,
    pub internal_code: Option<String>,
    pub name: String,
    pub aliases: Vec<String>,
    pub specimen: Option<String>,
    pub canonical_unit: String,
    pub alt_units: Vec<String>,
    /// Identifier of a registered conversion procedure, never executable code.
    pub conversion: Option<String>,
    pub fhir_code: Option<String>,
    /// Component test codes, in panel order.
    pub panel: Vec<String>,
    pub status: TestStatus,
    pub updated_at: DateTime<Utc>,
}

impl LabTest {
    pub fn is_canonical_unit(&self, unit: &str) -> bool {
        self.canonical_unit.eq_ignore_ascii_case(unit.trim())
    }

    pub fn is_alt_unit(&self, unit: &str) -> bool {
        let unit = unit.trim();
        self.alt_units.iter().any(|u| u.eq_ignore_ascii_case(unit))
    }
}

/// A reference range row. Append-only: every load inserts new rows and
/// history stays visible to resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRange {
    pub id: i64,
    pub code: String,
    pub sex: Sex,
    pub age_min: Option<f64>,
    pub age_max: Option<f64>,
    pub pregnant: Option<bool>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub method: Option<String>,
    pub notes: Option<String>,
    /// `None` means the row applies to every tenant.
    pub tenant_id: Option<String>,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub bundle_version: String,
}

impl ReferenceRange {
    /// Inclusive age bounds. Bounds are only checked when the query knows the age.
    pub fn admits_age(&self, age: Option<u32>) -> bool {
        let Some(age) = age else {
            return true;
        };
        let age = f64::from(age);
        self.age_min.map_or(true, |min| age >= min) && self.age_max.map_or(true, |max| age <= max)
    }

    /// An explicit pregnancy flag only matches an equal query flag.
    pub fn admits_pregnancy(&self, pregnant: Option<bool>) -> bool {
        match self.pregnant {
            None => true,
            Some(flag) => pregnant == Some(flag),
        }
    }

    /// `effective_from <= now < effective_to`.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_from <= now && self.effective_to.map_or(true, |to| now < to)
    }
}

/// Narrative guidance attached to a test. Appended on reload like ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guideline {
    pub id: i64,
    pub code: String,
    pub snippet: String,
    /// Flag-to-severity mapping payload consumed by the rules layer.
    pub severity_rule: serde_json::Value,
    pub citations: Vec<String>,
    pub accessed_at: NaiveDate,
    pub version_tag: String,
    pub bundle_version: String,
}

/// One row per installed bundle version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogMeta {
    pub bundle_version: String,
    pub source: String,
    pub content_hash: String,
    pub released_at: DateTime<Utc>,
}
