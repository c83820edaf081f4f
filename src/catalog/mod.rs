//! Versioned lab-test catalog: bundle format, transactional store and
//! reference-range resolution.

pub mod bundle;
pub mod resolver;
pub mod store;

pub use bundle::{parse_bundle, CatalogBundle, GuidelineEntry, RangeEntry, TestEntry};
pub use resolver::{select_range, RangeCache, RangeQuery, ReferenceRangeResolver};
pub use store::{BundleProvenance, CatalogStore, LoadSummary};

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Bundle validation failed: {0}")]
    InvalidBundle(String),

    #[error("Catalog writer lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Database(DatabaseError::Sqlite(err))
    }
}
