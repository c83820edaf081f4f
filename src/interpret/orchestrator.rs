use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::document::build_document;
use super::patient::{InMemoryPatientDirectory, PatientContext, PatientDirectory};
use super::schema::SchemaValidator;
use super::types::{EventMeta, InterpretationResult, LabItem, NewLabResult, NormalizedItem, SCHEMA_VERSION};
use super::InterpretError;
use crate::catalog::{CatalogStore, RangeQuery, ReferenceRangeResolver};
use crate::db;
use crate::events::{publish_with_retry, EventBus, TOPIC_CATALOG_MISS, TOPIC_LABS_INTERPRETED};
use crate::metrics::MetricsSink;
use crate::models::{LabResult, Sex};
use crate::normalize::{DerivedMetricCalculator, UnitConverter};
use crate::rules::{Evaluation, Metric, RulesEngine, SeverityOverride};

/// Knobs that come from `ServiceConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Tenant used when the patient context carries none.
    pub default_tenant: String,
    pub publish_retries: u32,
    pub strict_schema: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_tenant: "default".to_string(),
            publish_retries: 3,
            strict_schema: false,
        }
    }
}

/// Per-request pipeline: normalize → derive → evaluate → document → publish.
pub struct InterpretationOrchestrator {
    store: Arc<CatalogStore>,
    resolver: Arc<ReferenceRangeResolver>,
    engine: RulesEngine,
    bus: Arc<dyn EventBus>,
    metrics: Arc<dyn MetricsSink>,
    patients: Arc<dyn PatientDirectory>,
    converter: UnitConverter,
    derived: DerivedMetricCalculator,
    schema: Option<SchemaValidator>,
    settings: OrchestratorSettings,
}

impl InterpretationOrchestrator {
    pub fn new(
        store: Arc<CatalogStore>,
        resolver: Arc<ReferenceRangeResolver>,
        engine: RulesEngine,
        bus: Arc<dyn EventBus>,
        metrics: Arc<dyn MetricsSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            resolver,
            engine,
            bus,
            metrics,
            patients: Arc::new(InMemoryPatientDirectory::new()),
            converter: UnitConverter::new(),
            derived: DerivedMetricCalculator::default(),
            schema: None,
            settings,
        }
    }

    pub fn with_patient_directory(mut self, patients: Arc<dyn PatientDirectory>) -> Self {
        self.patients = patients;
        self
    }

    pub fn with_schema(mut self, schema: SchemaValidator) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_converter(mut self, converter: UnitConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_derivations(mut self, derived: DerivedMetricCalculator) -> Self {
        self.derived = derived;
        self
    }

    pub fn engine(&self) -> &RulesEngine {
        &self.engine
    }

    /// Persist a raw result. No catalog lookup is involved.
    pub fn ingest(&self, input: NewLabResult) -> Result<LabResult, InterpretError> {
        if input.patient_id.trim().is_empty() || input.code.trim().is_empty() {
            return Err(InterpretError::InvalidInput("patientId and code are required".into()));
        }
        if !input.value.is_finite() {
            return Err(InterpretError::InvalidInput("value must be a finite number".into()));
        }

        let result = LabResult {
            id: Uuid::new_v4(),
            patient_id: input.patient_id,
            code: input.code,
            name: input.name,
            value: input.value,
            unit: input.unit,
            created_at: Utc::now(),
        };
        let conn = self.store.connect()?;
        db::insert_lab_result(&conn, &result)?;
        tracing::debug!(id = %result.id, code = %result.code, "Lab result ingested");
        Ok(result)
    }

    /// Interpret with demographics from the patient directory.
    pub async fn interpret(&self, patient_id: &str, items: &[LabItem]) -> Result<InterpretationResult, InterpretError> {
        self.interpret_with_context(patient_id, items, None).await
    }

    /// Interpret with an explicit context, which replaces the directory lookup.
    pub async fn interpret_with_context(
        &self,
        patient_id: &str,
        items: &[LabItem],
        context: Option<PatientContext>,
    ) -> Result<InterpretationResult, InterpretError> {
        if patient_id.trim().is_empty() {
            return Err(InterpretError::InvalidInput("patientId is required".into()));
        }
        let context = context.unwrap_or_else(|| self.patients.context(patient_id));
        let sex = context.sex.filter(|s| *s != Sex::Any);
        let query = RangeQuery {
            age: context.age,
            sex,
            pregnant: context.pregnant,
            tenant_id: Some(
                context
                    .tenant_id
                    .clone()
                    .unwrap_or_else(|| self.settings.default_tenant.clone()),
            ),
        };

        // ── Normalize ───────────────────────────────────────
        let normalized: Vec<NormalizedItem> = items.iter().map(|item| self.normalize_item(item, &query)).collect();

        // ── Derive + evaluate ───────────────────────────────
        let by_code: BTreeMap<String, Metric> = normalized
            .iter()
            .filter(|n| n.conversion_failed.is_none())
            .map(|n| (n.code.clone(), Metric { value: n.value, low: n.low, high: n.high }))
            .collect();
        let mut named = self.engine.map_from_code(&by_code);
        let known: BTreeMap<String, f64> = named.iter().map(|(k, m)| (k.clone(), m.value)).collect();
        for (name, value) in self.derived.compute_derived(&known, context.age, sex) {
            tracing::debug!(metric = %name, value, "Derived metric computed");
            named.insert(name, Metric::from(value));
        }

        let mut evaluation = self.engine.evaluate(&named);
        self.apply_guideline_severity(&mut evaluation);
        for flag in &evaluation.flags {
            self.metrics.rule_triggered(&flag.rule_id);
        }

        // ── Document + payload ──────────────────────────────
        let conclusion = (!evaluation.flags.is_empty()).then(|| {
            evaluation
                .flags
                .iter()
                .map(|f| f.reason.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        });
        let document = build_document(patient_id, &normalized, conclusion, Utc::now());
        let event_id = Uuid::new_v4().to_string();

        let mut result = InterpretationResult {
            patient_id: patient_id.to_string(),
            items: normalized,
            flags: evaluation.flags,
            recommendations: evaluation.recommendations,
            document,
            meta: EventMeta {
                event_id: event_id.clone(),
                schema_version: SCHEMA_VERSION.to_string(),
                published: true,
            },
        };
        let payload = serde_json::to_value(&result)?;

        if let Some(schema) = &self.schema {
            let violations = schema.validate(&payload);
            if !violations.is_empty() {
                self.metrics.schema_validation_failed();
                let summary: Vec<String> = violations.iter().map(ToString::to_string).collect();
                tracing::warn!(event_id = %event_id, violations = ?summary, "Interpretation payload failed schema validation");
                if self.settings.strict_schema {
                    result.meta.published = false;
                    return Ok(result);
                }
            }
        }

        // ── Publish ─────────────────────────────────────────
        match publish_with_retry(
            self.bus.as_ref(),
            TOPIC_LABS_INTERPRETED,
            Some(&event_id),
            &payload,
            self.settings.publish_retries,
        )
        .await
        {
            Ok(()) => {
                self.metrics.interpretation_published();
                tracing::info!(event_id = %event_id, flags = result.flags.len(), "Interpretation published");
            }
            Err(e) => {
                self.metrics.publish_failed(TOPIC_LABS_INTERPRETED);
                tracing::error!(event_id = %event_id, error = %e, "Interpretation not published");
                result.meta.published = false;
            }
        }
        Ok(result)
    }

    fn normalize_item(&self, item: &LabItem, query: &RangeQuery) -> NormalizedItem {
        let test = match self.store.get_test(&item.code) {
            Ok(Some(test)) => test,
            Ok(None) => {
                self.record_miss(item);
                return NormalizedItem {
                    catalog_miss: true,
                    ..NormalizedItem::passthrough(item)
                };
            }
            Err(e) => {
                tracing::error!(code = %item.code, error = %e, "Catalog lookup failed, passing item through");
                return NormalizedItem::passthrough(item);
            }
        };

        let converted = self.converter.convert(&test, item.value, &item.unit);
        if let Some(failure) = &converted.failure {
            self.metrics.conversion_failed(failure.kind());
        }

        let range = match self.resolver.resolve(&item.code, query) {
            Ok(range) => range,
            Err(e) => {
                tracing::error!(code = %item.code, error = %e, "Range resolution failed");
                None
            }
        };
        if range.is_none() {
            tracing::warn!(code = %item.code, "No reference range resolved");
        }

        NormalizedItem {
            code: item.code.clone(),
            name: if test.name.is_empty() { item.name.clone() } else { test.name.clone() },
            value: converted.value,
            unit: converted.unit,
            low: range.as_ref().and_then(|r| r.low),
            high: range.as_ref().and_then(|r| r.high),
            catalog_miss: false,
            conversion_failed: converted.failure.map(|f| f.kind().to_string()),
        }
    }

    fn record_miss(&self, item: &LabItem) {
        self.metrics.catalog_miss(&item.code);
        tracing::warn!(code = %item.code, name = %item.name, "Catalog miss");
        let payload = json!({ "code": item.code, "name": item.name });
        if let Err(e) = self.bus.publish(TOPIC_CATALOG_MISS, None, &payload) {
            self.metrics.publish_failed(TOPIC_CATALOG_MISS);
            tracing::warn!(code = %item.code, error = %e, "Catalog miss notification not published");
        }
    }

    /// Apply each flagged test's guideline `severityRule`, if it has one.
    fn apply_guideline_severity(&self, evaluation: &mut Evaluation) {
        let mut overrides: HashMap<String, Option<SeverityOverride>> = HashMap::new();
        for flag in &mut evaluation.flags {
            let Some(code) = flag.code.clone() else {
                continue;
            };
            let entry = overrides.entry(code).or_insert_with_key(|code| {
                match self.store.get_guideline(code) {
                    Ok(guideline) => guideline.and_then(|g| SeverityOverride::from_payload(&g.severity_rule)),
                    Err(e) => {
                        tracing::warn!(code = %code, error = %e, "Guideline lookup failed");
                        None
                    }
                }
            });
            if let Some(severity_override) = entry {
                severity_override.apply(flag);
            }
        }
    }
}
