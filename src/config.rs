use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "lab-interpreter";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix for every setting in `ServiceConfig`.
pub const ENV_PREFIX: &str = "LAB_INTERPRETER_";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8094";
const DEFAULT_TENANT_ID: &str = "default";
const DEFAULT_RANGE_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUBLISH_RETRIES: u32 = 3;

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,lab_interpreter=debug"
}

/// Get the application data directory
/// `<platform data dir>/lab-interpreter`, falling back to the working directory.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the catalog database
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("catalog.db")
}

/// Runtime configuration, read once at process start.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    /// Initial catalog bundle (file path or http(s) URL). Nothing is loaded when unset.
    pub catalog_bundle_location: Option<String>,
    /// Rule bundle override. The embedded default bundle is used when unset.
    pub rules_bundle_path: Option<PathBuf>,
    /// Tenant used for range resolution when the patient context carries none.
    pub tenant_id: String,
    pub range_cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub publish_retries: u32,
    /// Interpretation payload schema override. The embedded v1 schema is used when unset.
    pub schema_path: Option<PathBuf>,
    /// Withhold publication of payloads that fail schema validation.
    pub strict_schema: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8094))),
            db_path: default_db_path(),
            catalog_bundle_location: None,
            rules_bundle_path: None,
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            range_cache_ttl: Duration::from_secs(DEFAULT_RANGE_CACHE_TTL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            publish_retries: DEFAULT_PUBLISH_RETRIES,
            schema_path: None,
            strict_schema: false,
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from `LAB_INTERPRETER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup (env in production, maps in tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid BIND_ADDR, using default");
                defaults.bind_addr
            }),
            None => defaults.bind_addr,
        };

        Self {
            bind_addr,
            db_path: get("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            catalog_bundle_location: get("CATALOG_BUNDLE_URL"),
            rules_bundle_path: get("RULES_BUNDLE_PATH").map(PathBuf::from),
            tenant_id: get("TENANT_ID").unwrap_or(defaults.tenant_id),
            range_cache_ttl: Duration::from_secs(parse_or(
                get("RANGE_CACHE_TTL_SECS"),
                "RANGE_CACHE_TTL_SECS",
                DEFAULT_RANGE_CACHE_TTL_SECS,
            )),
            fetch_timeout: Duration::from_secs(parse_or(
                get("FETCH_TIMEOUT_SECS"),
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )),
            publish_retries: parse_or(
                get("PUBLISH_RETRIES"),
                "PUBLISH_RETRIES",
                DEFAULT_PUBLISH_RETRIES,
            ),
            schema_path: get("SCHEMA_PATH").map(PathBuf::from),
            strict_schema: get("STRICT_SCHEMA")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy>(raw: Option<String>, name: &str, default: T) -> T {
    match raw {
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(setting = name, value = %value, "Invalid numeric setting, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = ServiceConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr.port(), 8094);
        assert_eq!(config.tenant_id, "default");
        assert_eq!(config.range_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.publish_retries, 3);
        assert!(config.catalog_bundle_location.is_none());
        assert!(!config.strict_schema);
    }

    #[test]
    fn reads_prefixed_values() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "0.0.0.0:9000"),
            ("TENANT_ID", "clinic-7"),
            ("RANGE_CACHE_TTL_SECS", "5"),
            ("CATALOG_BUNDLE_URL", "/srv/catalog.json"),
            ("STRICT_SCHEMA", "true"),
        ]));
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.tenant_id, "clinic-7");
        assert_eq!(config.range_cache_ttl, Duration::from_secs(5));
        assert_eq!(config.catalog_bundle_location.as_deref(), Some("/srv/catalog.json"));
        assert!(config.strict_schema);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("FETCH_TIMEOUT_SECS", "soon"),
            ("PUBLISH_RETRIES", "-1"),
        ]));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.publish_retries, 3);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ServiceConfig::from_lookup(lookup(&[("TENANT_ID", "   ")]));
        assert_eq!(config.tenant_id, "default");
    }

    #[test]
    fn data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with(APP_NAME));
        assert!(default_db_path().ends_with("catalog.db"));
    }
}
