//! Durable, versioned catalog storage.
//!
//! Tests are upserted by code; ranges and guidelines are append-only so
//! resolution can see history. `load_bundle` is the only writer: it takes
//! the store's writer lock and applies the whole bundle in one IMMEDIATE
//! transaction. Readers open their own connection and, under WAL, keep
//! seeing the previous committed catalog until that transaction commits.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use super::bundle::CatalogBundle;
use super::resolver::{select_range, RangeQuery};
use super::CatalogError;
use crate::db;
use crate::models::{CatalogMeta, Guideline, LabTest, ReferenceRange};

/// Where a bundle came from, recorded in `catalog_meta`.
#[derive(Debug, Clone, Default)]
pub struct BundleProvenance {
    pub source: String,
    pub content_hash: String,
}

/// Row counts written by one `load_bundle` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub bundle_version: String,
    pub tests: usize,
    pub ranges: usize,
    pub guidelines: usize,
}

pub struct CatalogStore {
    db_path: PathBuf,
    writer: Mutex<()>,
}

impl CatalogStore {
    /// Open (or create) the catalog database and run migrations.
    pub fn open(db_path: &Path) -> Result<Self, CatalogError> {
        db::open_database(db_path)?;
        tracing::info!(path = %db_path.display(), "Catalog store opened");
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(()),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection for a single operation.
    pub fn connect(&self) -> Result<Connection, CatalogError> {
        Ok(db::open_connection(&self.db_path)?)
    }

    // ── Point lookups ───────────────────────────────────────

    /// The active definition for a test code.
    pub fn get_test(&self, code: &str) -> Result<Option<LabTest>, CatalogError> {
        let conn = self.connect()?;
        Ok(db::get_active_lab_test(&conn, code)?)
    }

    /// All stored range rows for a code, in insertion order.
    pub fn ranges_for(&self, code: &str) -> Result<Vec<ReferenceRange>, CatalogError> {
        let conn = self.connect()?;
        Ok(db::get_reference_ranges(&conn, code)?)
    }

    /// Best-matching range for the qualifiers, evaluated at the current time.
    /// Uncached; `ReferenceRangeResolver` is the cached entry point.
    pub fn get_range(
        &self,
        code: &str,
        query: &RangeQuery,
    ) -> Result<Option<ReferenceRange>, CatalogError> {
        self.get_range_at(code, query, Utc::now())
    }

    pub fn get_range_at(
        &self,
        code: &str,
        query: &RangeQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferenceRange>, CatalogError> {
        let candidates = self.ranges_for(code)?;
        Ok(select_range(&candidates, code, query, now).cloned())
    }

    pub fn get_guideline(&self, code: &str) -> Result<Option<Guideline>, CatalogError> {
        let conn = self.connect()?;
        Ok(db::get_current_guideline(&conn, code)?)
    }

    pub fn get_meta(&self, bundle_version: &str) -> Result<Option<CatalogMeta>, CatalogError> {
        let conn = self.connect()?;
        Ok(db::get_catalog_meta(&conn, bundle_version)?)
    }

    /// Every installed bundle version, oldest release first.
    pub fn list_meta(&self) -> Result<Vec<CatalogMeta>, CatalogError> {
        let conn = self.connect()?;
        Ok(db::list_catalog_meta(&conn)?)
    }

    /// Metadata of the most recently installed bundle.
    pub fn current_meta(&self) -> Result<Option<CatalogMeta>, CatalogError> {
        let conn = self.connect()?;
        Ok(db::get_latest_catalog_meta(&conn)?)
    }

    // ── Bulk load ───────────────────────────────────────────

    /// Install a bundle atomically.
    ///
    /// Tests are upserted by code, ranges and guidelines appended, and the
    /// `catalog_meta` row for `version` written last. Any failing entry
    /// rolls back the whole transaction.
    pub fn load_bundle(
        &self,
        bundle: &CatalogBundle,
        version: &str,
        provenance: &BundleProvenance,
    ) -> Result<LoadSummary, CatalogError> {
        if version.trim().is_empty() {
            return Err(CatalogError::InvalidBundle("bundle version is empty".into()));
        }
        bundle.validate()?;

        let _writer = self.writer.lock().map_err(|_| CatalogError::LockPoisoned)?;

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let installed_at = Utc::now();

        for test in &bundle.tests {
            db::upsert_lab_test(&tx, &test.to_model(installed_at))?;
        }
        for range in &bundle.ranges {
            db::insert_reference_range(&tx, &range.to_model(version, installed_at))?;
        }
        for guideline in &bundle.guidelines {
            db::insert_guideline(&tx, &guideline.to_model(version, installed_at))?;
        }

        let source = if provenance.source.is_empty() {
            bundle.source.clone().unwrap_or_else(|| "load".to_string())
        } else {
            provenance.source.clone()
        };
        db::upsert_catalog_meta(
            &tx,
            &CatalogMeta {
                bundle_version: version.to_string(),
                source,
                content_hash: provenance.content_hash.clone(),
                released_at: installed_at,
            },
        )?;

        tx.commit()?;

        let summary = LoadSummary {
            bundle_version: version.to_string(),
            tests: bundle.tests.len(),
            ranges: bundle.ranges.len(),
            guidelines: bundle.guidelines.len(),
        };
        tracing::info!(
            version = %summary.bundle_version,
            tests = summary.tests,
            ranges = summary.ranges,
            guidelines = summary.guidelines,
            "Catalog bundle committed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_bundle;
    use crate::models::Sex;

    const V1: &str = r#"{
        "version": "2024.1",
        "tests": [
            { "code": "2160-0", "name": "Creatinine", "canonicalUnit": "mg/dL",
              "altUnits": ["umol/L"], "conversion": "creatinine_umol_l_to_mg_dl" },
            { "code": "2345-7", "name": "Glucose", "canonicalUnit": "mg/dL" }
        ],
        "ranges": [
            { "code": "2160-0", "low": 0.6, "high": 1.3, "effectiveFrom": "2024-01-01T00:00:00Z" }
        ],
        "guidelines": [
            { "code": "2160-0", "snippet": "Creatinine reflects renal clearance." }
        ]
    }"#;

    fn temp_store() -> (CatalogStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.db")).unwrap();
        (store, dir)
    }

    fn load(store: &CatalogStore, raw: &str, version: &str) -> Result<LoadSummary, CatalogError> {
        let bundle = parse_bundle(raw.as_bytes())?;
        store.load_bundle(&bundle, version, &BundleProvenance::default())
    }

    fn snapshot(store: &CatalogStore) -> (Option<LabTest>, Option<ReferenceRange>, Option<Guideline>) {
        (
            store.get_test("2160-0").unwrap(),
            store.get_range("2160-0", &RangeQuery::default()).unwrap(),
            store.get_guideline("2160-0").unwrap(),
        )
    }

    #[test]
    fn load_then_lookup() {
        let (store, _dir) = temp_store();
        let summary = load(&store, V1, "2024.1").unwrap();
        assert_eq!(summary.tests, 2);
        assert_eq!(summary.ranges, 1);

        let test = store.get_test("2160-0").unwrap().unwrap();
        assert_eq!(test.canonical_unit, "mg/dL");
        let range = store.get_range("2160-0", &RangeQuery::default()).unwrap().unwrap();
        assert_eq!((range.low, range.high), (Some(0.6), Some(1.3)));
        assert_eq!(range.sex, Sex::Any);
        assert!(store.get_guideline("2160-0").unwrap().is_some());
        assert_eq!(store.current_meta().unwrap().unwrap().bundle_version, "2024.1");
    }

    #[test]
    fn reload_overwrites_tests_and_appends_ranges() {
        let (store, _dir) = temp_store();
        load(&store, V1, "2024.1").unwrap();
        let v2 = V1
            .replace("\"Creatinine\"", "\"Creatinine, serum\"")
            .replace("\"high\": 1.3", "\"high\": 1.2")
            .replace("2024-01-01T00:00:00Z", "2024-06-01T00:00:00Z");
        load(&store, &v2, "2024.2").unwrap();

        let test = store.get_test("2160-0").unwrap().unwrap();
        assert_eq!(test.name, "Creatinine, serum");

        let conn = store.connect().unwrap();
        assert_eq!(db::count_lab_tests(&conn).unwrap(), 2);
        assert_eq!(db::count_reference_ranges(&conn).unwrap(), 2);

        let range = store.get_range("2160-0", &RangeQuery::default()).unwrap().unwrap();
        assert_eq!(range.high, Some(1.2));
        assert_eq!(range.bundle_version, "2024.2");
    }

    #[test]
    fn malformed_bundle_leaves_catalog_unchanged() {
        let (store, _dir) = temp_store();
        load(&store, V1, "2024.1").unwrap();
        let before = snapshot(&store);

        let missing_ranges = r#"{ "tests": [{ "code": "2160-0", "name": "Changed", "canonicalUnit": "mg/dL" }], "guidelines": [] }"#;
        assert!(matches!(
            load(&store, missing_ranges, "2024.2"),
            Err(CatalogError::InvalidBundle(_))
        ));

        assert_eq!(snapshot(&store), before);
        assert!(store.get_meta("2024.2").unwrap().is_none());
    }

    #[test]
    fn failing_entry_rolls_back_whole_load() {
        let (store, _dir) = temp_store();
        load(&store, V1, "2024.1").unwrap();
        let before = snapshot(&store);

        store
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_guideline BEFORE INSERT ON guidelines
                 WHEN NEW.code = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let poisoned = r#"{
            "tests": [{ "code": "2160-0", "name": "Renamed", "canonicalUnit": "mg/dL" }],
            "ranges": [{ "code": "2160-0", "low": 0.1, "high": 9.9 }],
            "guidelines": [{ "code": "boom", "snippet": "x" }]
        }"#;
        assert!(matches!(
            load(&store, poisoned, "2024.2"),
            Err(CatalogError::Database(_))
        ));

        assert_eq!(snapshot(&store), before);
        let conn = store.connect().unwrap();
        assert_eq!(db::count_reference_ranges(&conn).unwrap(), 1);
        assert!(store.get_meta("2024.2").unwrap().is_none());
    }

    #[test]
    fn empty_version_is_rejected() {
        let (store, _dir) = temp_store();
        assert!(matches!(load(&store, V1, "  "), Err(CatalogError::InvalidBundle(_))));
    }

    #[test]
    fn reader_sees_previous_commit_during_write() {
        let (store, _dir) = temp_store();
        load(&store, V1, "2024.1").unwrap();

        let mut writer = store.connect().unwrap();
        let tx = writer
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        tx.execute("UPDATE lab_tests SET name = 'Pending' WHERE code = '2160-0'", [])
            .unwrap();

        // Uncommitted write is invisible to a concurrent reader.
        assert_eq!(store.get_test("2160-0").unwrap().unwrap().name, "Creatinine");
        tx.rollback().unwrap();
    }

    #[test]
    fn concurrent_loads_are_serialized() {
        let (store, _dir) = temp_store();
        let store = std::sync::Arc::new(store);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || load(&store, V1, &format!("2024.{i}")).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let conn = store.connect().unwrap();
        assert_eq!(db::count_lab_tests(&conn).unwrap(), 2);
        assert_eq!(db::count_reference_ranges(&conn).unwrap(), 4);
        assert_eq!(db::list_catalog_meta(&conn).unwrap().len(), 4);
    }
}
