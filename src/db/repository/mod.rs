//! Repository layer: entity-scoped database operations.
//!
//! Every function takes a `&Connection`; a `rusqlite::Transaction` derefs
//! to one, so the same functions serve the bulk-load transaction.

mod catalog_meta;
mod guideline;
mod lab_result;
mod reference_range;

pub use catalog_meta::*;
pub use guideline::*;
pub use lab_result::*;
pub use lab_test::*;
pub use reference_range::*;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::DatabaseError;

/// Encode a list/object column as JSON text.
pub(crate) fn to_json_text<T: Serialize>(
    column: &'static str,
    value: &T,
) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::MalformedJson {
        column,
        reason: e.to_string(),
    })
}

/// Decode a list/object column stored as JSON text.
pub(crate) fn from_json_text<T: DeserializeOwned>(
    column: &'static str,
    text: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(text).map_err(|e| DatabaseError::MalformedJson {
        column,
        reason: e.to_string(),
    })
}
