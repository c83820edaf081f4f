//! FHIR R4 clinical document for an interpretation (simplified).
//!
//! One `Observation` per normalized item plus a `DiagnosticReport` that
//! references them, packed into a `collection` Bundle.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::NormalizedItem;

const LOINC_SYSTEM: &str = "http://loinc.org";
const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";
const OBSERVATION_CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/observation-category";
const DIAGNOSTIC_SERVICE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v2-0074";
const INTERPRETATION_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ObservationInterpretation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirCoding {
    pub system: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirCodeableConcept {
    pub coding: Vec<FhirCoding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl FhirCodeableConcept {
    fn single(system: &str, code: &str, display: Option<&str>) -> Self {
        Self {
            coding: vec![FhirCoding {
                system: system.to_string(),
                code: code.to_string(),
                display: display.map(str::to_string),
            }],
            text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirReference {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirQuantity {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl FhirQuantity {
    fn bare(value: f64) -> Self {
        Self { value, unit: None, system: None, code: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirReferenceRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<FhirQuantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<FhirQuantity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirObservation {
    pub resource_type: String, // Always "Observation"
    pub id: String,
    pub status: String,
    pub category: Vec<FhirCodeableConcept>,
    pub code: FhirCodeableConcept,
    pub subject: FhirReference,
    pub effective_date_time: String,
    pub value_quantity: FhirQuantity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_range: Vec<FhirReferenceRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interpretation: Vec<FhirCodeableConcept>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirDiagnosticReport {
    pub resource_type: String, // Always "DiagnosticReport"
    pub id: String,
    pub status: String,
    pub category: Vec<FhirCodeableConcept>,
    pub code: FhirCodeableConcept,
    pub subject: FhirReference,
    pub effective_date_time: String,
    pub issued: String,
    pub result: Vec<FhirReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FhirResource {
    DiagnosticReport(FhirDiagnosticReport),
    Observation(FhirObservation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub full_url: String,
    pub resource: FhirResource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String, // Always "Bundle"
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub entry: Vec<BundleEntry>,
}

impl DocumentBundle {
    pub fn observations(&self) -> impl Iterator<Item = &FhirObservation> {
        self.entry.iter().filter_map(|e| match &e.resource {
            FhirResource::Observation(o) => Some(o),
            _ => None,
        })
    }

    pub fn report(&self) -> Option<&FhirDiagnosticReport> {
        self.entry.iter().find_map(|e| match &e.resource {
            FhirResource::DiagnosticReport(r) => Some(r),
            _ => None,
        })
    }
}

/// H / L / N against the attached bounds. Nothing when no bound is known.
fn interpretation_code(item: &NormalizedItem) -> Option<(&'static str, &'static str)> {
    if item.low.is_none() && item.high.is_none() {
        return None;
    }
    if item.low.is_some_and(|low| item.value < low) {
        Some(("L", "Low"))
    } else if item.high.is_some_and(|high| item.value > high) {
        Some(("H", "High"))
    } else {
        Some(("N", "Normal"))
    }
}

fn observation(patient_id: &str, item: &NormalizedItem, effective: &str) -> FhirObservation {
    let reference_range = if item.low.is_some() || item.high.is_some() {
        vec![FhirReferenceRange {
            low: item.low.map(FhirQuantity::bare),
            high: item.high.map(FhirQuantity::bare),
        }]
    } else {
        Vec::new()
    };

    FhirObservation {
        resource_type: "Observation".to_string(),
        id: Uuid::new_v4().to_string(),
        status: "final".to_string(),
        category: vec![FhirCodeableConcept::single(
            OBSERVATION_CATEGORY_SYSTEM,
            "laboratory",
            Some("Laboratory"),
        )],
        code: FhirCodeableConcept {
            text: Some(item.name.clone()),
            ..FhirCodeableConcept::single(LOINC_SYSTEM, &item.code, Some(&item.name))
        },
        subject: FhirReference {
            reference: format!("Patient/{patient_id}"),
        },
        effective_date_time: effective.to_string(),
        value_quantity: FhirQuantity {
            value: item.value,
            unit: Some(item.unit.clone()),
            system: Some(UCUM_SYSTEM.to_string()),
            code: Some(item.unit.clone()),
        },
        reference_range,
        interpretation: interpretation_code(item)
            .map(|(code, display)| vec![FhirCodeableConcept::single(INTERPRETATION_SYSTEM, code, Some(display))])
            .unwrap_or_default(),
    }
}

/// Build the document bundle. The report comes first, followed by the
/// observations in item order.
pub fn build_document(
    patient_id: &str,
    items: &[NormalizedItem],
    conclusion: Option<String>,
    issued: DateTime<Utc>,
) -> DocumentBundle {
    let effective = issued.to_rfc3339_opts(SecondsFormat::Millis, true);
    let observations: Vec<FhirObservation> =
        items.iter().map(|item| observation(patient_id, item, &effective)).collect();

    let report = FhirDiagnosticReport {
        resource_type: "DiagnosticReport".to_string(),
        id: Uuid::new_v4().to_string(),
        status: "final".to_string(),
        category: vec![FhirCodeableConcept::single(DIAGNOSTIC_SERVICE_SYSTEM, "LAB", Some("Laboratory"))],
        code: FhirCodeableConcept::single(LOINC_SYSTEM, "11502-2", Some("Laboratory report")),
        subject: FhirReference {
            reference: format!("Patient/{patient_id}"),
        },
        effective_date_time: effective.clone(),
        issued: effective,
        result: observations
            .iter()
            .map(|o| FhirReference { reference: format!("urn:uuid:{}", o.id) })
            .collect(),
        conclusion,
    };

    let mut entry = Vec::with_capacity(observations.len() + 1);
    entry.push(BundleEntry {
        full_url: format!("urn:uuid:{}", report.id),
        resource: FhirResource::DiagnosticReport(report),
    });
    entry.extend(observations.into_iter().map(|o| BundleEntry {
        full_url: format!("urn:uuid:{}", o.id),
        resource: FhirResource::Observation(o),
    }));

    DocumentBundle {
        resource_type: "Bundle".to_string(),
        bundle_type: "collection".to_string(),
        entry,
    }
}
