//! Interpretation pipeline and its supporting pieces.

pub mod document;
pub mod orchestrator;
pub mod patient;
pub mod schema;
pub mod types;

pub use document::{build_document, DocumentBundle};
pub use orchestrator::{InterpretationOrchestrator, OrchestratorSettings};
pub use patient::{InMemoryPatientDirectory, PatientContext, PatientDirectory};
pub use schema::{SchemaError, SchemaValidator, SchemaViolation};
pub use types::{EventMeta, InterpretationResult, LabItem, NewLabResult, NormalizedItem, SCHEMA_VERSION};

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum InterpretError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
