//! Telemetry counters, injected into the orchestrator as a `MetricsSink`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

pub trait MetricsSink: Send + Sync {
    fn catalog_miss(&self, code: &str);
    fn rule_triggered(&self, rule_id: &str);
    fn conversion_failed(&self, kind: &str);
    fn interpretation_published(&self);
    fn publish_failed(&self, topic: &str);
    fn schema_validation_failed(&self);
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub catalog_miss_total: BTreeMap<String, u64>,
    pub rules_triggered_total: BTreeMap<String, u64>,
    pub conversion_failed_total: BTreeMap<String, u64>,
    pub publish_failed_total: BTreeMap<String, u64>,
    pub interpretations_published_total: u64,
    pub schema_validation_failed_total: u64,
}

/// Process-wide counters. Constructed once at startup and never reset.
#[derive(Default)]
pub struct CounterSink {
    catalog_miss: Mutex<BTreeMap<String, u64>>,
    rules_triggered: Mutex<BTreeMap<String, u64>>,
    conversion_failed: Mutex<BTreeMap<String, u64>>,
    publish_failed: Mutex<BTreeMap<String, u64>>,
    interpretations_published: AtomicU64,
    schema_validation_failed: AtomicU64,
}

fn bump(counter: &Mutex<BTreeMap<String, u64>>, label: &str) {
    if let Ok(mut map) = counter.lock() {
        *map.entry(label.to_string()).or_insert(0) += 1;
    }
}

fn read(counter: &Mutex<BTreeMap<String, u64>>) -> BTreeMap<String, u64> {
    counter.lock().map(|m| m.clone()).unwrap_or_default()
}

impl CounterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            catalog_miss_total: read(&self.catalog_miss),
            rules_triggered_total: read(&self.rules_triggered),
            conversion_failed_total: read(&self.conversion_failed),
            publish_failed_total: read(&self.publish_failed),
            interpretations_published_total: self.interpretations_published.load(Ordering::Relaxed),
            schema_validation_failed_total: self.schema_validation_failed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for CounterSink {
    fn catalog_miss(&self, code: &str) {
        bump(&self.catalog_miss, code);
    }

    fn rule_triggered(&self, rule_id: &str) {
        bump(&self.rules_triggered, rule_id);
    }

    fn conversion_failed(&self, kind: &str) {
        bump(&self.conversion_failed, kind);
    }

    fn interpretation_published(&self) {
        self.interpretations_published.fetch_add(1, Ordering::Relaxed);
    }

    fn publish_failed(&self, topic: &str) {
        bump(&self.publish_failed, topic);
    }

    fn schema_validation_failed(&self) {
        self.schema_validation_failed.fetch_add(1, Ordering::Relaxed);
    }
}
