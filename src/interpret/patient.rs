use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::models::Sex;

/// Demographics used for range resolution and derived metrics.
/// Every field is optional; unknown values disable the matching filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContext {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub pregnant: Option<bool>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Source of patient demographics.
pub trait PatientDirectory: Send + Sync {
    /// Unknown patients yield an empty context, never an error.
    fn context(&self, patient_id: &str) -> PatientContext;
}

#[derive(Default)]
pub struct InMemoryPatientDirectory {
    patients: RwLock<HashMap<String, PatientContext>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, patient_id: &str, context: PatientContext) {
        if let Ok(mut patients) = self.patients.write() {
            patients.insert(patient_id.to_string(), context);
        }
    }
}

impl PatientDirectory for InMemoryPatientDirectory {
    fn context(&self, patient_id: &str) -> PatientContext {
        self.patients
            .read()
            .ok()
            .and_then(|p| p.get(patient_id).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_patient_has_empty_context() {
        let dir = InMemoryPatientDirectory::new();
        assert_eq!(dir.context("nobody"), PatientContext::default());
    }

    #[test]
    fn upserted_context_is_returned() {
        let dir = InMemoryPatientDirectory::new();
        dir.upsert("p1", PatientContext { age: Some(50), sex: Some(Sex::Male), ..Default::default() });
        assert_eq!(dir.context("p1").age, Some(50));
    }

    #[test]
    fn context_deserializes_partial_json() {
        let ctx: PatientContext = serde_json::from_str(r#"{ "sex": "female", "pregnant": true }"#).unwrap();
        assert_eq!(ctx.sex, Some(Sex::Female));
        assert_eq!(ctx.pregnant, Some(true));
        assert!(ctx.age.is_none());
    }
}
