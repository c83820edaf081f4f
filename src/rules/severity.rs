use std::collections::HashMap;
use std::str::FromStr;

use serde_json::Value;

use super::engine::Flag;
use crate::models::Severity;

/// Severity mapping carried by a guideline's `severityRule` payload:
/// `{"default": "<severity>", "rules": {"<ruleId>": "<severity>"}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeverityOverride {
    pub default: Option<Severity>,
    pub by_rule: HashMap<String, Severity>,
}

impl SeverityOverride {
    /// `None` when the payload carries no usable mapping. Unknown severity
    /// strings are skipped.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        let parse = |v: &Value| v.as_str().and_then(|s| Severity::from_str(s).ok());

        let default = object.get("default").and_then(parse);
        let by_rule: HashMap<String, Severity> = object
            .get("rules")
            .and_then(Value::as_object)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|(id, sev)| parse(sev).map(|s| (id.clone(), s)))
                    .collect()
            })
            .unwrap_or_default();

        (default.is_some() || !by_rule.is_empty()).then_some(Self { default, by_rule })
    }

    /// Per-rule mapping wins over the default.
    pub fn apply(&self, flag: &mut Flag) {
        if let Some(severity) = self.by_rule.get(&flag.rule_id).copied().or(self.default) {
            flag.severity = severity;
        }
    }
}
