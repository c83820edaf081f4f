//! Shared handler context and request/response bodies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogStore;
use crate::interpret::{InterpretationOrchestrator, LabItem, PatientContext};

// ═══════════════════════════════════════════════════════════
// Handler context
// ═══════════════════════════════════════════════════════════

/// State shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<CatalogStore>,
    pub orchestrator: Arc<InterpretationOrchestrator>,
}

impl ApiContext {
    pub fn new(store: Arc<CatalogStore>, orchestrator: Arc<InterpretationOrchestrator>) -> Self {
        Self { store, orchestrator }
    }
}

// ═══════════════════════════════════════════════════════════
// Bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpretRequest {
    pub patient_id: String,
    pub items: Vec<LabItem>,
    /// Overrides the patient directory when present.
    #[serde(default)]
    pub context: Option<PatientContext>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub catalog_version: Option<String>,
    pub rules_version: String,
}
