//! Validation of outgoing payloads against a JSON Schema subset:
//! `type`, `required`, `properties`, `items` and `enum`. Other keywords are
//! accepted and ignored.

use std::fmt;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

const INTERPRETED_V1_SCHEMA: &str = include_str!("../../resources/schemas/labs.interpreted.v1.schema.json");

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Cannot read schema: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    /// JSON pointer of the offending value (`""` is the root).
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{path}: {}", self.message)
    }
}

pub struct SchemaValidator {
    schema: Value,
}

impl SchemaValidator {
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }

    /// The embedded `labs.interpreted.v1` schema.
    pub fn interpreted_v1() -> Result<Self, SchemaError> {
        Ok(Self::new(serde_json::from_str(INTERPRETED_V1_SCHEMA)?))
    }

    /// Schema from `path` when given, otherwise the embedded one.
    pub fn load(path: Option<&Path>) -> Result<Self, SchemaError> {
        match path {
            Some(path) => Ok(Self::new(serde_json::from_str(&std::fs::read_to_string(path)?)?)),
            None => Self::interpreted_v1(),
        }
    }

    pub fn validate(&self, instance: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        check(&self.schema, instance, String::new(), &mut violations);
        violations
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check(schema: &Value, value: &Value, path: String, out: &mut Vec<SchemaViolation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(s) => vec![s.as_str()],
            Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            out.push(SchemaViolation {
                path,
                message: format!("expected type {}", allowed.join(" | ")),
            });
            return;
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            out.push(SchemaViolation {
                path: path.clone(),
                message: format!("value {value} is not one of the allowed values"),
            });
        }
    }

    if let Value::Object(object) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    out.push(SchemaViolation {
                        path: path.clone(),
                        message: format!("missing required property `{key}`"),
                    });
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, sub_schema) in properties {
                if let Some(child) = object.get(key) {
                    check(sub_schema, child, format!("{path}/{key}"), out);
                }
            }
        }
    }

    if let (Value::Array(elements), Some(item_schema)) = (value, schema.get("items")) {
        for (i, element) in elements.iter().enumerate() {
            check(item_schema, element, format!("{path}/{i}"), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(json!({
            "type": "object",
            "required": ["patientId", "flags"],
            "properties": {
                "patientId": { "type": "string" },
                "flags": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["severity"],
                        "properties": { "severity": { "enum": ["low", "moderate", "high"] } }
                    }
                },
                "count": { "type": "integer" }
            }
        }))
    }

    #[test]
    fn valid_instance_has_no_violations() {
        let v = validator().validate(&json!({ "patientId": "p", "flags": [{ "severity": "high" }], "count": 2 }));
        assert!(v.is_empty(), "{v:?}");
    }

    #[test]
    fn reports_missing_and_mistyped_fields_with_paths() {
        let v = validator().validate(&json!({ "patientId": 7, "flags": [{ "severity": "urgent" }, {}] }));
        let mut paths: Vec<_> = v.iter().map(|x| x.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, ["/flags/0/severity", "/flags/1", "/patientId"]);
        let missing = v.iter().find(|x| x.path == "/flags/1").unwrap();
        assert!(missing.to_string().contains("`severity`"));
    }

    #[test]
    fn root_type_mismatch_stops_descent() {
        let v = validator().validate(&json!([1, 2]));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].to_string(), "/: expected type object");
    }

    #[test]
    fn embedded_schema_loads() {
        assert!(SchemaValidator::interpreted_v1().is_ok());
        assert!(matches!(
            SchemaValidator::load(Some(Path::new("/no/such/schema.json"))),
            Err(SchemaError::Io(_))
        ));
    }
}
