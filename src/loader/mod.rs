//! Catalog bundle installation and hot reload.
//!
//! A load is fetch (bounded by a timeout) → structural + entry validation →
//! one transactional `CatalogStore::load_bundle` → range cache invalidation.
//! Any failure is returned to the caller; the listener logs it and keeps the
//! previously committed catalog in service.

mod version;

pub use version::compare_versions;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::catalog::{
    parse_bundle, BundleProvenance, CatalogBundle, CatalogError, CatalogStore, LoadSummary,
    ReferenceRangeResolver,
};
use crate::events::{EventBus, TOPIC_CATALOG_UPDATED};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Cannot read bundle from {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetching {location} timed out after {timeout:?}")]
    Timeout { location: String, timeout: Duration },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Catalog load task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Hot-reload notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogUpdate {
    pub bundle_version: String,
    #[serde(alias = "url")]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    Installed(LoadSummary),
    /// This version is already installed with identical content.
    AlreadyInstalled,
    /// A newer or equal version has already been applied.
    Stale { applied: String },
}

/// SHA-256 of the raw bundle bytes, base64-encoded.
pub fn content_hash(raw: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Sha256::digest(raw))
}

pub struct BundleLoader {
    store: Arc<CatalogStore>,
    resolver: Arc<ReferenceRangeResolver>,
    client: reqwest::Client,
    fetch_timeout: Duration,
    /// Highest version applied from a notification or a versioned bundle.
    applied: Mutex<Watermark>,
}

/// Version watermark. Seeded from `catalog_meta` on first use so that a
/// restarted loader keeps refusing versions older than what is installed.
#[derive(Debug, Default)]
struct Watermark {
    seeded: bool,
    version: Option<String>,
}

impl Watermark {
    fn raise(&mut self, version: &str) {
        let higher = self
            .version
            .as_deref()
            .map_or(true, |current| compare_versions(version, current) == Ordering::Greater);
        if higher {
            self.version = Some(version.to_string());
        }
    }
}

/// Prefix of the version tag given to bundles that declare none.
const LOCAL_VERSION_PREFIX: &str = "local-";

impl BundleLoader {
    pub fn new(
        store: Arc<CatalogStore>,
        resolver: Arc<ReferenceRangeResolver>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            client: reqwest::Client::new(),
            fetch_timeout,
            applied: Mutex::new(Watermark::default()),
        }
    }

    pub async fn applied_version(&self) -> Option<String> {
        self.applied.lock().await.version.clone()
    }

    /// Seed the watermark with the highest versioned bundle already in the store.
    async fn seed(&self, mark: &mut Watermark) -> Result<(), LoaderError> {
        if mark.seeded {
            return Ok(());
        }
        let store = self.store.clone();
        let installed = tokio::task::spawn_blocking(move || store.list_meta()).await??;
        for meta in installed
            .iter()
            .filter(|m| !m.bundle_version.starts_with(LOCAL_VERSION_PREFIX))
        {
            mark.raise(&meta.bundle_version);
        }
        mark.seeded = true;
        if let Some(version) = mark.version.as_deref() {
            tracing::debug!(version, "Catalog version watermark seeded from store");
        }
        Ok(())
    }

    /// Startup load. The version comes from the bundle itself; unversioned
    /// bundles get a `local-<timestamp>` tag and do not move the watermark.
    /// A versioned bundle older than the installed catalog is skipped.
    pub async fn load_initial(&self, location: &str) -> Result<ReloadOutcome, LoaderError> {
        let mut applied = self.applied.lock().await;
        self.seed(&mut applied).await?;
        let raw = self.fetch(location).await?;
        let bundle = parse_bundle(&raw)?;

        let Some(declared) = bundle.version.clone() else {
            let version = format!("{LOCAL_VERSION_PREFIX}{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
            return self.install(location, &raw, bundle, &version).await;
        };
        if let Some(last) = applied.version.as_deref() {
            if compare_versions(&declared, last) == Ordering::Less {
                tracing::warn!(version = %declared, applied = last, location, "Startup bundle is older than the installed catalog, skipping");
                return Ok(ReloadOutcome::Stale { applied: last.to_string() });
            }
        }

        let outcome = self.install(location, &raw, bundle, &declared).await?;
        applied.raise(&declared);
        Ok(outcome)
    }

    /// Apply one hot-reload notification. Notifications are applied one at
    /// a time; versions at or below the last applied one are ignored.
    pub async fn apply_notification(&self, update: &CatalogUpdate) -> Result<ReloadOutcome, LoaderError> {
        let mut applied = self.applied.lock().await;
        self.seed(&mut applied).await?;
        if let Some(last) = applied.version.as_deref() {
            if compare_versions(&update.bundle_version, last) != Ordering::Greater {
                tracing::info!(version = %update.bundle_version, applied = last, "Ignoring stale catalog notification");
                return Ok(ReloadOutcome::Stale { applied: last.to_string() });
            }
        }

        let raw = self.fetch(&update.location).await?;
        let bundle = parse_bundle(&raw)?;
        let outcome = self.install(&update.location, &raw, bundle, &update.bundle_version).await?;
        applied.raise(&update.bundle_version);
        Ok(outcome)
    }

    async fn install(
        &self,
        location: &str,
        raw: &[u8],
        bundle: CatalogBundle,
        version: &str,
    ) -> Result<ReloadOutcome, LoaderError> {
        let provenance = BundleProvenance {
            source: location.to_string(),
            content_hash: content_hash(raw),
        };

        let store = self.store.clone();
        let version_owned = version.to_string();
        let result = tokio::task::spawn_blocking(move || -> Result<ReloadOutcome, CatalogError> {
            if let Some(meta) = store.get_meta(&version_owned)? {
                if meta.content_hash == provenance.content_hash {
                    return Ok(ReloadOutcome::AlreadyInstalled);
                }
            }
            Ok(ReloadOutcome::Installed(store.load_bundle(&bundle, &version_owned, &provenance)?))
        })
        .await??;

        match &result {
            ReloadOutcome::Installed(summary) => {
                self.resolver.invalidate();
                tracing::info!(version = %summary.bundle_version, location, "Catalog bundle installed");
            }
            _ => tracing::info!(version, location, "Catalog bundle already installed"),
        }
        Ok(result)
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>, LoaderError> {
        tokio::time::timeout(self.fetch_timeout, self.read_location(location))
            .await
            .map_err(|_| LoaderError::Timeout {
                location: location.to_string(),
                timeout: self.fetch_timeout,
            })?
    }

    async fn read_location(&self, location: &str) -> Result<Vec<u8>, LoaderError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self.client.get(location).send().await?.error_for_status()?;
            return Ok(response.bytes().await?.to_vec());
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::read(path).await.map_err(|source| LoaderError::Io {
            location: location.to_string(),
            source,
        })
    }

    /// Subscribe to catalog-update notifications and apply them in the
    /// background until the returned handle is shut down.
    pub fn spawn_listener(self: Arc<Self>, bus: &dyn EventBus) -> ReloadListenerHandle {
        let mut rx = bus.subscribe(TOPIC_CATALOG_UPDATED);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tracing::info!(topic = TOPIC_CATALOG_UPDATED, "Catalog reload listener started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = rx.recv() => match received {
                        Ok(envelope) => self.handle_envelope(envelope.payload).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Catalog reload listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!("Catalog reload listener stopped");
        });

        ReloadListenerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    async fn handle_envelope(&self, payload: serde_json::Value) {
        let update: CatalogUpdate = match serde_json::from_value(payload) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed catalog update notification");
                return;
            }
        };
        match self.apply_notification(&update).await {
            Ok(ReloadOutcome::Installed(summary)) => {
                tracing::info!(version = %summary.bundle_version, "Hot-reloaded catalog bundle");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(version = %update.bundle_version, error = %e, "Hot reload failed, keeping current catalog");
            }
        }
    }
}

/// Handle for the background reload listener. Dropping it stops the listener.
pub struct ReloadListenerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReloadListenerHandle {
    /// Stop the listener and wait for the in-flight notification, if any.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReloadListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RangeQuery;
    use crate::events::InMemoryEventBus;
    use serde_json::json;
    use std::path::Path;

    fn bundle_json(version: Option<&str>, test_name: &str, high: f64) -> String {
        let mut value = json!({
            "tests": [{ "code": "2160-0", "name": test_name, "canonicalUnit": "mg/dL" }],
            "ranges": [{ "code": "2160-0", "low": 0.6, "high": high, "effectiveFrom": "2024-01-01T00:00:00Z" }],
            "guidelines": []
        });
        if let Some(v) = version {
            value["version"] = json!(v);
        }
        value.to_string()
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<CatalogStore>,
        resolver: Arc<ReferenceRangeResolver>,
        loader: Arc<BundleLoader>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CatalogStore::open(&dir.path().join("catalog.db")).unwrap());
        let resolver = Arc::new(ReferenceRangeResolver::new(store.clone(), Duration::from_secs(600)));
        let loader = Arc::new(BundleLoader::new(store.clone(), resolver.clone(), Duration::from_secs(5)));
        Fixture { dir, store, resolver, loader }
    }

    fn write(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn update(version: &str, location: &str) -> CatalogUpdate {
        CatalogUpdate {
            bundle_version: version.to_string(),
            location: location.to_string(),
        }
    }

    #[tokio::test]
    async fn initial_load_records_hash_and_source() {
        let f = fixture();
        let body = bundle_json(Some("2024.1"), "Creatinine", 1.3);
        let location = write(f.dir.path(), "v1.json", &body);

        let outcome = f.loader.load_initial(&format!("file://{location}")).await.unwrap();
        assert!(matches!(outcome, ReloadOutcome::Installed(_)));

        let meta = f.store.get_meta("2024.1").unwrap().unwrap();
        assert_eq!(meta.content_hash, content_hash(body.as_bytes()));
        assert!(meta.source.starts_with("file://"));
        assert_eq!(f.loader.applied_version().await.as_deref(), Some("2024.1"));
    }

    #[tokio::test]
    async fn unversioned_initial_load_leaves_watermark_unset() {
        let f = fixture();
        let location = write(f.dir.path(), "b.json", &bundle_json(None, "Creatinine", 1.3));
        f.loader.load_initial(&location).await.unwrap();
        assert!(f.loader.applied_version().await.is_none());
        assert!(f.store.current_meta().unwrap().unwrap().bundle_version.starts_with("local-"));
    }

    #[tokio::test]
    async fn notification_installs_and_invalidates_cache() {
        let f = fixture();
        let v1 = write(f.dir.path(), "v1.json", &bundle_json(None, "Creatinine", 1.3));
        f.loader.apply_notification(&update("1", &v1)).await.unwrap();

        let q = RangeQuery::default();
        assert_eq!(f.resolver.resolve("2160-0", &q).unwrap().unwrap().high, Some(1.3));

        let v2 = write(f.dir.path(), "v2.json", &bundle_json(None, "Creatinine", 1.1).replace("2024-01-01", "2024-02-01"));
        f.loader.apply_notification(&update("2", &v2)).await.unwrap();
        assert_eq!(f.resolver.resolve("2160-0", &q).unwrap().unwrap().high, Some(1.1));
    }

    #[tokio::test]
    async fn stale_and_duplicate_notifications_are_ignored() {
        let f = fixture();
        let v10 = write(f.dir.path(), "v10.json", &bundle_json(None, "Creatinine v10", 1.3));
        let v9 = write(f.dir.path(), "v9.json", &bundle_json(None, "Creatinine v9", 1.3));

        f.loader.apply_notification(&update("2024.10", &v10)).await.unwrap();
        let again = f.loader.apply_notification(&update("2024.10", &v10)).await.unwrap();
        assert!(matches!(again, ReloadOutcome::Stale { .. }));
        let older = f.loader.apply_notification(&update("2024.9", &v9)).await.unwrap();
        assert!(matches!(older, ReloadOutcome::Stale { .. }));

        assert_eq!(f.store.get_test("2160-0").unwrap().unwrap().name, "Creatinine v10");
    }

    #[tokio::test]
    async fn reinstalling_identical_content_is_a_no_op() {
        let f = fixture();
        let body = bundle_json(Some("7"), "Creatinine", 1.3);
        let location = write(f.dir.path(), "v7.json", &body);
        f.loader.load_initial(&location).await.unwrap();

        let fresh = BundleLoader::new(f.store.clone(), f.resolver.clone(), Duration::from_secs(5));
        let outcome = fresh.load_initial(&location).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::AlreadyInstalled);
        let conn = f.store.connect().unwrap();
        assert_eq!(crate::db::count_reference_ranges(&conn).unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_bundle_keeps_previous_catalog() {
        let f = fixture();
        let good = write(f.dir.path(), "good.json", &bundle_json(None, "Creatinine", 1.3));
        f.loader.apply_notification(&update("1", &good)).await.unwrap();

        let bad = write(f.dir.path(), "bad.json", r#"{ "tests": [], "guidelines": [] }"#);
        let err = f.loader.apply_notification(&update("2", &bad)).await.unwrap_err();
        assert!(matches!(err, LoaderError::Catalog(CatalogError::InvalidBundle(_))));

        assert_eq!(f.store.get_test("2160-0").unwrap().unwrap().name, "Creatinine");
        assert_eq!(f.loader.applied_version().await.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let f = fixture();
        let err = f
            .loader
            .apply_notification(&update("1", "/definitely/not/here.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Io { .. }));
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let f = fixture();
        let loader = BundleLoader::new(f.store.clone(), f.resolver.clone(), Duration::from_millis(100));
        let err = loader
            .apply_notification(&update("1", &format!("http://{addr}/bundle.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn listener_applies_notifications_and_survives_failures() {
        let f = fixture();
        let bus = InMemoryEventBus::new();
        let handle = f.loader.clone().spawn_listener(&bus);

        bus.publish(TOPIC_CATALOG_UPDATED, None, &json!({ "bogus": true })).unwrap();
        bus.publish(
            TOPIC_CATALOG_UPDATED,
            None,
            &json!({ "bundleVersion": "1", "url": "/missing.json" }),
        )
        .unwrap();
        let good = write(f.dir.path(), "good.json", &bundle_json(None, "Creatinine", 1.3));
        bus.publish(
            TOPIC_CATALOG_UPDATED,
            None,
            &json!({ "bundleVersion": "2", "location": good }),
        )
        .unwrap();

        let mut installed = false;
        for _ in 0..100 {
            if f.store.get_test("2160-0").unwrap().is_some() {
                installed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(installed);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn restarted_loader_refuses_older_versions() {
        let f = fixture();
        let newest = write(f.dir.path(), "v3.json", &bundle_json(Some("2024.3"), "New", 1.3));
        f.loader.apply_notification(&update("2024.3", &newest)).await.unwrap();

        let restarted = BundleLoader::new(f.store.clone(), f.resolver.clone(), Duration::from_secs(5));
        let old = write(f.dir.path(), "v1.json", &bundle_json(Some("2024.1"), "Old", 1.3));
        let startup = restarted.load_initial(&old).await.unwrap();
        assert_eq!(startup, ReloadOutcome::Stale { applied: "2024.3".into() });
        assert_eq!(f.store.get_test("2160-0").unwrap().unwrap().name, "New");

        let mid = write(f.dir.path(), "v2.json", &bundle_json(Some("2024.2"), "Mid", 1.3));
        let replayed = restarted.apply_notification(&update("2024.2", &mid)).await.unwrap();
        assert!(matches!(replayed, ReloadOutcome::Stale { .. }));
        assert_eq!(f.store.get_test("2160-0").unwrap().unwrap().name, "New");
        assert_eq!(restarted.applied_version().await.as_deref(), Some("2024.3"));
    }

    #[tokio::test]
    async fn local_versions_do_not_seed_the_watermark() {
        let f = fixture();
        let local = write(f.dir.path(), "local.json", &bundle_json(None, "Local", 1.3));
        f.loader.load_initial(&local).await.unwrap();

        let restarted = BundleLoader::new(f.store.clone(), f.resolver.clone(), Duration::from_secs(5));
        let versioned = write(f.dir.path(), "v1.json", &bundle_json(Some("1"), "Versioned", 1.3));
        let outcome = restarted.apply_notification(&update("1", &versioned)).await.unwrap();
        assert!(matches!(outcome, ReloadOutcome::Installed(_)));
        assert_eq!(f.store.get_test("2160-0").unwrap().unwrap().name, "Versioned");
    }
}
