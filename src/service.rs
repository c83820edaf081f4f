//! Process wiring: builds every component from `ServiceConfig`, serves the
//! API and tears everything down on Ctrl-C.

use std::sync::Arc;

use thiserror::Error;

use crate::api::{start_api_server, ApiContext, ApiServer};
use crate::catalog::{CatalogError, CatalogStore, ReferenceRangeResolver};
use crate::config::ServiceConfig;
use crate::events::{EventBus, InMemoryEventBus};
use crate::interpret::{InterpretationOrchestrator, OrchestratorSettings, SchemaError, SchemaValidator};
use crate::loader::{BundleLoader, ReloadListenerHandle, ReloadOutcome};
use crate::metrics::CounterSink;
use crate::rules::{RuleBundle, RulesEngine, RulesError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Cannot create data directory: {0}")]
    DataDir(std::io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Rule bundle unusable: {0}")]
    Rules(#[from] RulesError),

    #[error("Payload schema unusable: {0}")]
    Schema(#[from] SchemaError),

    #[error("Cannot bind API server: {0}")]
    Bind(std::io::Error),
}

/// Every long-lived component of a running service.
pub struct Service {
    pub config: ServiceConfig,
    pub store: Arc<CatalogStore>,
    pub bus: Arc<InMemoryEventBus>,
    pub metrics: Arc<CounterSink>,
    pub loader: Arc<BundleLoader>,
    pub orchestrator: Arc<InterpretationOrchestrator>,
}

impl Service {
    /// Open the store and assemble the pipeline. Nothing is loaded or served yet.
    pub fn build(config: &ServiceConfig) -> Result<Self, StartupError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StartupError::DataDir)?;
            }
        }

        let store = Arc::new(CatalogStore::open(&config.db_path)?);
        let resolver = Arc::new(ReferenceRangeResolver::new(store.clone(), config.range_cache_ttl));
        let rules = RuleBundle::load(config.rules_bundle_path.as_deref())?;
        let schema = SchemaValidator::load(config.schema_path.as_deref())?;
        let bus = Arc::new(InMemoryEventBus::new());
        let metrics = Arc::new(CounterSink::new());

        tracing::info!(
            db = %config.db_path.display(),
            rules_version = %rules.version,
            rules = rules.rules.len(),
            "Service components ready"
        );

        let orchestrator = InterpretationOrchestrator::new(
            store.clone(),
            resolver.clone(),
            RulesEngine::new(rules),
            bus.clone(),
            metrics.clone(),
            OrchestratorSettings {
                default_tenant: config.tenant_id.clone(),
                publish_retries: config.publish_retries,
                strict_schema: config.strict_schema,
            },
        )
        .with_schema(schema);

        let loader = Arc::new(BundleLoader::new(store.clone(), resolver, config.fetch_timeout));

        Ok(Self {
            config: config.clone(),
            store,
            bus,
            metrics,
            loader,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Load the configured initial bundle, if any. A failed load is logged
    /// and the service keeps whatever catalog the database already holds.
    pub async fn load_initial_catalog(&self) {
        let Some(location) = self.config.catalog_bundle_location.as_deref() else {
            tracing::info!("No initial catalog bundle configured");
            return;
        };
        match self.loader.load_initial(location).await {
            Ok(ReloadOutcome::Installed(summary)) => tracing::info!(
                version = %summary.bundle_version,
                tests = summary.tests,
                ranges = summary.ranges,
                guidelines = summary.guidelines,
                "Initial catalog installed"
            ),
            Ok(ReloadOutcome::AlreadyInstalled) => {
                tracing::info!(location, "Initial catalog already installed")
            }
            Ok(ReloadOutcome::Stale { applied }) => {
                tracing::info!(location, %applied, "Initial catalog older than installed")
            }
            Err(e) => tracing::error!(location, error = %e, "Initial catalog load failed"),
        }
    }

    /// Start the hot-reload listener on the service bus.
    pub fn start_reload_listener(&self) -> ReloadListenerHandle {
        let bus: &dyn EventBus = self.bus.as_ref();
        self.loader.clone().spawn_listener(bus)
    }

    pub async fn start_api(&self) -> Result<ApiServer, StartupError> {
        let ctx = ApiContext::new(self.store.clone(), self.orchestrator.clone());
        start_api_server(ctx, self.config.bind_addr)
            .await
            .map_err(StartupError::Bind)
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), StartupError> {
        let listener = self.start_reload_listener();
        self.load_initial_catalog().await;
        let mut server = self.start_api().await?;
        tracing::info!(addr = %server.addr, "Lab interpreter serving");

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for shutdown signal");
        }

        tracing::info!("Shutting down");
        server.shutdown();
        listener.shutdown().await;
        let totals = self.metrics.snapshot();
        tracing::info!(?totals, "Final counters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::events::TOPIC_CATALOG_UPDATED;

    const BUNDLE: &str = r#"{
        "version": "2024.2",
        "tests": [{ "code": "2345-7", "name": "Glucose", "canonicalUnit": "mg/dL" }],
        "ranges": [{ "code": "2345-7", "low": 70, "high": 99 }],
        "guidelines": []
    }"#;

    fn config_in(dir: &std::path::Path) -> ServiceConfig {
        ServiceConfig {
            db_path: dir.join("nested").join("catalog.db"),
            bind_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn build_creates_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let service = Service::build(&config_in(dir.path())).unwrap();
        assert!(dir.path().join("nested").join("catalog.db").exists());
        assert!(service.store.current_meta().unwrap().is_none());
        assert_eq!(service.orchestrator.engine().version(), "2024.06");
    }

    #[tokio::test]
    async fn initial_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("bundle.json");
        std::fs::write(&bundle_path, BUNDLE).unwrap();

        let mut config = config_in(dir.path());
        config.catalog_bundle_location = Some(bundle_path.display().to_string());
        let service = Service::build(&config).unwrap();
        service.load_initial_catalog().await;

        assert_eq!(service.store.current_meta().unwrap().unwrap().bundle_version, "2024.2");
        assert!(service.store.get_test("2345-7").unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_initial_load_keeps_service_usable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.catalog_bundle_location = Some(dir.path().join("missing.json").display().to_string());
        let service = Service::build(&config).unwrap();
        service.load_initial_catalog().await;
        assert!(service.store.current_meta().unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_rules_override_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.rules_bundle_path = Some(dir.path().join("absent-rules.json"));
        assert!(matches!(Service::build(&config), Err(StartupError::Rules(_))));
    }

    #[tokio::test]
    async fn notification_on_bus_reloads_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("bundle.json");
        std::fs::write(&bundle_path, BUNDLE).unwrap();

        let service = Service::build(&config_in(dir.path())).unwrap();
        let listener = service.start_reload_listener();
        service
            .bus
            .publish(
                TOPIC_CATALOG_UPDATED,
                Some("2024.2"),
                &serde_json::json!({ "bundleVersion": "2024.2", "url": bundle_path.display().to_string() }),
            )
            .unwrap();

        let mut installed = false;
        for _ in 0..50 {
            if service.store.current_meta().unwrap().is_some() {
                installed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        listener.shutdown().await;
        assert!(installed);
    }

    #[tokio::test]
    async fn api_serves_on_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let service = Service::build(&config_in(dir.path())).unwrap();
        let mut server = service.start_api().await.unwrap();
        let resp = reqwest::get(format!("http://{}/v1/health", server.addr)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        server.shutdown();
    }
}
