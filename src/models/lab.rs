use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw measurement as ingested. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub id: Uuid,
    pub patient_id: String,
    pub code: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub created_at: DateTime<Utc>,
}
