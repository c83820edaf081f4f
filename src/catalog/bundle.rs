//! Catalog bundle wire format and validation.
//!
//! A bundle is a JSON object carrying three collections (`tests`, `ranges`,
//! `guidelines`), each required even when empty, plus optional `version`
//! and `source` metadata. Parsing checks the collections are present before
//! decoding entries, so a missing array is reported as such rather than
//! silently defaulting to empty.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::CatalogError;
use crate::models::{Guideline, LabTest, ReferenceRange, Sex, TestStatus};

const REQUIRED_COLLECTIONS: [&str; 3] = ["tests", "ranges", "guidelines"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogBundle {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub tests: Vec<TestEntry>,
    pub ranges: Vec<RangeEntry>,
    pub guidelines: Vec<GuidelineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntry {
    #[serde(alias = "loinc")]
    pub code: String,
    #[serde(default)]
    pub internal_code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub specimen: Option<String>,
    #[serde(alias = "ucumUnit")]
    pub canonical_unit: String,
    #[serde(default)]
    pub alt_units: Vec<String>,
    #[serde(default)]
    pub conversion: Option<String>,
    #[serde(default)]
    pub fhir_code: Option<String>,
    #[serde(default)]
    pub panel: Vec<String>,
    #[serde(default)]
    pub status: TestStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeEntry {
    #[serde(alias = "loinc")]
    pub code: String,
    #[serde(default)]
    pub sex: Sex,
    #[serde(default)]
    pub age_min: Option<f64>,
    #[serde(default)]
    pub age_max: Option<f64>,
    #[serde(default)]
    pub pregnant: Option<bool>,
    #[serde(default, alias = "refLow")]
    pub low: Option<f64>,
    #[serde(default, alias = "refHigh")]
    pub high: Option<f64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub effective_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidelineEntry {
    #[serde(alias = "loinc")]
    pub code: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default = "empty_object")]
    pub severity_rule: serde_json::Value,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub accessed_at: Option<NaiveDate>,
    #[serde(default = "default_version_tag")]
    pub version_tag: String,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_version_tag() -> String {
    "v1".to_string()
}

/// Parse and validate raw bundle bytes.
pub fn parse_bundle(raw: &[u8]) -> Result<CatalogBundle, CatalogError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| CatalogError::InvalidBundle(format!("not valid JSON: {e}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| CatalogError::InvalidBundle("bundle must be a JSON object".into()))?;

    for key in REQUIRED_COLLECTIONS {
        match object.get(key) {
            Some(serde_json::Value::Array(_)) => {}
            Some(_) => {
                return Err(CatalogError::InvalidBundle(format!("`{key}` must be an array")))
            }
            None => return Err(CatalogError::InvalidBundle(format!("missing `{key}` array"))),
        }
    }

    let bundle: CatalogBundle = serde_json::from_value(value)
        .map_err(|e| CatalogError::InvalidBundle(format!("malformed entry: {e}")))?;
    bundle.validate()?;
    Ok(bundle)
}

impl CatalogBundle {
    /// Entry-level checks. Any violation rejects the whole bundle.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (i, test) in self.tests.iter().enumerate() {
            if test.code.trim().is_empty() {
                return Err(invalid("tests", i, "code is empty"));
            }
            if test.name.trim().is_empty() {
                return Err(invalid("tests", i, "name is empty"));
            }
            if test.canonical_unit.trim().is_empty() {
                return Err(invalid("tests", i, "canonicalUnit is empty"));
            }
            if test.alt_units.iter().any(|u| u.trim().is_empty()) {
                return Err(invalid("tests", i, "altUnits contains an empty unit"));
            }
        }

        for (i, range) in self.ranges.iter().enumerate() {
            if range.code.trim().is_empty() {
                return Err(invalid("ranges", i, "code is empty"));
            }
            if let (Some(low), Some(high)) = (range.low, range.high) {
                if low > high {
                    return Err(invalid("ranges", i, "low is greater than high"));
                }
            }
            if let (Some(min), Some(max)) = (range.age_min, range.age_max) {
                if min > max {
                    return Err(invalid("ranges", i, "ageMin is greater than ageMax"));
                }
            }
            if [range.low, range.high, range.age_min, range.age_max]
                .iter()
                .flatten()
                .any(|v| !v.is_finite())
            {
                return Err(invalid("ranges", i, "bounds must be finite"));
            }
            if let (Some(from), Some(to)) = (range.effective_from, range.effective_to) {
                if from >= to {
                    return Err(invalid("ranges", i, "effectiveFrom is not before effectiveTo"));
                }
            }
        }

        for (i, guideline) in self.guidelines.iter().enumerate() {
            if guideline.code.trim().is_empty() {
                return Err(invalid("guidelines", i, "code is empty"));
            }
            if !guideline.severity_rule.is_object() {
                return Err(invalid("guidelines", i, "severityRule must be an object"));
            }
        }

        Ok(())
    }
}

fn invalid(collection: &str, index: usize, reason: &str) -> CatalogError {
    CatalogError::InvalidBundle(format!("{collection}[{index}]: {reason}"))
}

impl TestEntry {
    pub(crate) fn to_model(&self, updated_at: DateTime<Utc>) -> LabTest {
        LabTest {
            id: 0,
            code: self.code.trim().to_string(),
            internal_code: self.internal_code.clone(),
            name: self.name.clone(),
            aliases: self.aliases.clone(),
            specimen: self.specimen.clone(),
            canonical_unit: self.canonical_unit.trim().to_string(),
            alt_units: self.alt_units.iter().map(|u| u.trim().to_string()).collect(),
            conversion: self.conversion.clone(),
            fhir_code: self.fhir_code.clone(),
            panel: self.panel.clone(),
            status: self.status,
            updated_at,
        }
    }
}

impl RangeEntry {
    pub(crate) fn to_model(&self, bundle_version: &str, installed_at: DateTime<Utc>) -> ReferenceRange {
        ReferenceRange {
            id: 0,
            code: self.code.trim().to_string(),
            sex: self.sex,
            age_min: self.age_min,
            age_max: self.age_max,
            pregnant: self.pregnant,
            low: self.low,
            high: self.high,
            method: self.method.clone(),
            notes: self.notes.clone(),
            tenant_id: self.tenant_id.clone(),
            effective_from: self.effective_from.unwrap_or(installed_at),
            effective_to: self.effective_to,
            bundle_version: bundle_version.to_string(),
        }
    }
}

impl GuidelineEntry {
    pub(crate) fn to_model(&self, bundle_version: &str, installed_at: DateTime<Utc>) -> Guideline {
        Guideline {
            id: 0,
            code: self.code.trim().to_string(),
            snippet: self.snippet.clone(),
            severity_rule: self.severity_rule.clone(),
            citations: self.citations.clone(),
            accessed_at: self.accessed_at.unwrap_or_else(|| installed_at.date_naive()),
            version_tag: self.version_tag.clone(),
            bundle_version: bundle_version.to_string(),
        }
    }
}
