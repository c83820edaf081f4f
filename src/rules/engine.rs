use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::bundle::{Condition, Recommendation, RuleBundle};
use crate::models::Severity;

/// A named value plus the reference bounds resolved for it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metric {
    pub value: f64,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl From<f64> for Metric {
    fn from(value: f64) -> Self {
        Self { value, low: None, high: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub rule_id: String,
    pub metric: String,
    /// Catalog code the metric was mapped from. Absent for derived metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub severity: Severity,
    pub value: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub flags: Vec<Flag>,
    pub recommendations: Vec<Recommendation>,
}

impl Condition {
    fn holds(&self, metric: &Metric) -> bool {
        let v = metric.value;
        match *self {
            Condition::Lt { value } => v < value,
            Condition::Lte { value } => v <= value,
            Condition::Gt { value } => v > value,
            Condition::Gte { value } => v >= value,
            Condition::Outside { low, high } => v < low || v > high,
            Condition::BelowReference => metric.low.is_some_and(|low| v < low),
            Condition::AboveReference => metric.high.is_some_and(|high| v > high),
            Condition::OutsideReference => {
                metric.low.is_some_and(|low| v < low) || metric.high.is_some_and(|high| v > high)
            }
        }
    }
}

/// Stateless evaluator over one rule bundle.
pub struct RulesEngine {
    bundle: RuleBundle,
    metric_codes: BTreeMap<String, String>,
}

impl RulesEngine {
    pub fn new(bundle: RuleBundle) -> Self {
        let metric_codes = bundle
            .code_map
            .iter()
            .map(|(code, name)| (name.clone(), code.clone()))
            .collect();
        Self { bundle, metric_codes }
    }

    pub fn version(&self) -> &str {
        &self.bundle.version
    }

    pub fn rule_count(&self) -> usize {
        self.bundle.rules.len()
    }

    /// Metric name for a catalog code, if the bundle maps it.
    pub fn metric_name(&self, code: &str) -> Option<&str> {
        self.bundle.code_map.get(code).map(String::as_str)
    }

    /// Rename code-keyed values to the clinical names the rules use.
    /// Codes the bundle does not map are dropped.
    pub fn map_from_code<V: Clone>(&self, by_code: &BTreeMap<String, V>) -> BTreeMap<String, V> {
        by_code
            .iter()
            .filter_map(|(code, value)| {
                self.metric_name(code)
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect()
    }

    /// Run every rule in declaration order. Rules whose metrics are absent
    /// are skipped; all matching rules fire.
    pub fn evaluate(&self, named: &BTreeMap<String, Metric>) -> Evaluation {
        let mut out = Evaluation::default();
        for rule in &self.bundle.rules {
            let Some(primary) = named.get(&rule.metric) else {
                continue;
            };
            if !rule.when.holds(primary) {
                continue;
            }
            let secondary_hold = rule
                .and
                .iter()
                .all(|clause| named.get(&clause.metric).is_some_and(|m| clause.when.holds(m)));
            if !secondary_hold {
                continue;
            }

            tracing::debug!(rule_id = %rule.id, metric = %rule.metric, value = primary.value, "Rule triggered");
            out.flags.push(Flag {
                rule_id: rule.id.clone(),
                metric: rule.metric.clone(),
                code: self.metric_codes.get(&rule.metric).cloned(),
                severity: rule.flag.severity,
                value: primary.value,
                reason: rule.flag.reason.clone(),
            });
            out.recommendations.extend(rule.recommend.iter().cloned());
        }
        out
    }
}
