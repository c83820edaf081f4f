use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::RulesError;
use crate::models::Severity;

/// Built-in rule bundle, used when no override path is configured.
const DEFAULT_RULES: &str = include_str!("../../resources/rules/rules.default.json");

/// Threshold test applied to one metric.
///
/// The `*_reference` variants compare against the bounds resolved from the
/// catalog for that item and never fire when the needed bound is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Lt { value: f64 },
    Lte { value: f64 },
    Gt { value: f64 },
    Gte { value: f64 },
    Outside { low: f64, high: f64 },
    BelowReference,
    AboveReference,
    OutsideReference,
}

/// An additional metric/condition pair that must also hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub metric: String,
    pub when: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFlag {
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub code: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub metric: String,
    pub when: Condition,
    #[serde(default)]
    pub and: Vec<Clause>,
    pub flag: RuleFlag,
    #[serde(default)]
    pub recommend: Vec<Recommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBundle {
    #[serde(default = "default_rules_version")]
    pub version: String,
    /// Catalog test code to clinical metric name.
    #[serde(alias = "loincMap")]
    pub code_map: BTreeMap<String, String>,
    pub rules: Vec<Rule>,
}

fn default_rules_version() -> String {
    "unversioned".to_string()
}

impl RuleBundle {
    pub fn from_json(raw: &str) -> Result<Self, RulesError> {
        let bundle: RuleBundle = serde_json::from_str(raw)?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn from_path(path: &Path) -> Result<Self, RulesError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn builtin() -> Result<Self, RulesError> {
        Self::from_json(DEFAULT_RULES)
    }

    /// Load from `path` when given, otherwise the built-in bundle.
    pub fn load(path: Option<&Path>) -> Result<Self, RulesError> {
        match path {
            Some(path) => {
                let bundle = Self::from_path(path)?;
                tracing::info!(path = %path.display(), version = %bundle.version, rules = bundle.rules.len(), "Rule bundle loaded");
                Ok(bundle)
            }
            None => Self::builtin(),
        }
    }

    fn validate(&self) -> Result<(), RulesError> {
        // Flags carry the originating code, so each metric needs exactly one.
        let mut sources: BTreeMap<&str, &str> = BTreeMap::new();
        for (code, metric) in &self.code_map {
            if let Some(first) = sources.insert(metric.as_str(), code.as_str()) {
                return Err(RulesError::AmbiguousMetric {
                    metric: metric.clone(),
                    first: first.to_string(),
                    second: code.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            let fail = |reason: &str| RulesError::InvalidRule {
                rule_id: rule.id.clone(),
                reason: reason.to_string(),
            };
            if rule.id.trim().is_empty() {
                return Err(fail("id is empty"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(fail("duplicate id"));
            }
            if rule.metric.trim().is_empty() || rule.and.iter().any(|c| c.metric.trim().is_empty()) {
                return Err(fail("metric is empty"));
            }
            let conditions = std::iter::once(&rule.when).chain(rule.and.iter().map(|c| &c.when));
            for condition in conditions {
                if let Condition::Outside { low, high } = condition {
                    if low > high {
                        return Err(fail("outside band has low above high"));
                    }
                }
            }
        }
        Ok(())
    }
}
