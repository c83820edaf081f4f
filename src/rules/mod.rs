//! Declarative rule evaluation over named clinical metrics.

pub mod bundle;
pub mod engine;
pub mod severity;

pub use bundle::{Clause, Condition, Recommendation, Rule, RuleBundle, RuleFlag};
pub use engine::{Evaluation, Flag, Metric, RulesEngine};
pub use severity::SeverityOverride;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("Rule bundle is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot read rule bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("Metric {metric} is mapped from both {first} and {second}")]
    AmbiguousMetric { metric: String, first: String, second: String },
}
