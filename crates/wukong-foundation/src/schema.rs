//! A minimal JSON-Schema-shaped parameter validator.
//!
//! Tool descriptors (spec §3, §4.3) carry a JSON-Schema-shaped parameter
//! schema. The tool executor (C4) validates arguments against it before
//! invoking the handler: apply defaults, coerce scalar strings to their
//! declared scalar type, and reject unknown properties (spec §4.4 step 2).
//!
//! This is intentionally a subset of JSON Schema — object/string/number/
//! integer/boolean/array — sufficient for LLM-authored tool-call arguments,
//! not a general-purpose validator.

use serde_json::{Map, Value};

/// One property's schema, as a tool descriptor would declare it.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub schema_type: String,
    pub default: Option<Value>,
}

/// An object schema: `{"type": "object", "properties": {...}, "required": [...]}`.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    pub properties: Vec<(String, PropertySchema)>,
    pub required: Vec<String>,
}

/// Parsed validation failure, carrying enough detail for the hint the tool
/// executor attaches (spec §4.4 step 2: "includes the schema in the hint").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingRequired(String),
    UnknownProperty(String),
    TypeMismatch { field: String, expected: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingRequired(name) => {
                write!(f, "missing required parameter '{}'", name)
            }
            ValidationError::UnknownProperty(name) => {
                write!(f, "unknown parameter '{}'", name)
            }
            ValidationError::TypeMismatch { field, expected } => {
                write!(f, "parameter '{}' must be of type '{}'", field, expected)
            }
        }
    }
}

impl ObjectSchema {
    /// Parse a JSON-Schema-shaped value of the form produced by
    /// `{"type":"object","properties":{...},"required":[...]}`.
    pub fn from_json(schema: &Value) -> Self {
        let mut out = ObjectSchema::default();
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let schema_type = prop
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_string();
                let default = prop.get("default").cloned();
                out.properties
                    .push((name.clone(), PropertySchema { schema_type, default }));
            }
        }
        if let Some(req) = schema.get("required").and_then(Value::as_array) {
            out.required = req
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
        out
    }

    pub fn declares_object_with_properties(&self) -> bool {
        !self.properties.is_empty()
    }

    /// Validate and normalize `params` in place: apply defaults, coerce
    /// scalar strings to their declared type, reject unknown keys.
    pub fn validate_and_coerce(&self, params: &Value) -> Result<Value, ValidationError> {
        let input = params.as_object().cloned().unwrap_or_default();
        let known: std::collections::HashSet<&str> =
            self.properties.iter().map(|(n, _)| n.as_str()).collect();

        for key in input.keys() {
            if !known.contains(key.as_str()) {
                return Err(ValidationError::UnknownProperty(key.clone()));
            }
        }

        let mut output = Map::new();
        for (name, prop) in &self.properties {
            match input.get(name) {
                Some(value) => {
                    let coerced = coerce(value, &prop.schema_type)
                        .ok_or_else(|| ValidationError::TypeMismatch {
                            field: name.clone(),
                            expected: prop.schema_type.clone(),
                        })?;
                    output.insert(name.clone(), coerced);
                }
                None => {
                    if let Some(default) = &prop.default {
                        output.insert(name.clone(), default.clone());
                    } else if self.required.contains(name) {
                        return Err(ValidationError::MissingRequired(name.clone()));
                    }
                }
            }
        }

        Ok(Value::Object(output))
    }
}

/// Coerce a value to the declared scalar type, accepting string-encoded
/// scalars (the common LLM output shape) in addition to native JSON types.
fn coerce(value: &Value, schema_type: &str) -> Option<Value> {
    match schema_type {
        "string" => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        "integer" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        "number" => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        "boolean" => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        "array" => match value {
            Value::Array(_) => Some(value.clone()),
            _ => None,
        },
        "object" => match value {
            Value::Object(_) => Some(value.clone()),
            _ => None,
        },
        _ => Some(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> ObjectSchema {
        ObjectSchema::from_json(&json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "recursive": {"type": "boolean"}
            },
            "required": ["path"]
        }))
    }

    #[test]
    fn applies_defaults_for_missing_optional_fields() {
        let schema = sample_schema();
        let result = schema
            .validate_and_coerce(&json!({"path": "/tmp"}))
            .unwrap();
        assert_eq!(result["limit"], json!(10));
    }

    #[test]
    fn coerces_string_scalars_to_declared_type() {
        let schema = sample_schema();
        let result = schema
            .validate_and_coerce(&json!({"path": "/tmp", "limit": "25", "recursive": "true"}))
            .unwrap();
        assert_eq!(result["limit"], json!(25));
        assert_eq!(result["recursive"], json!(true));
    }

    #[test]
    fn rejects_unknown_properties() {
        let schema = sample_schema();
        let err = schema
            .validate_and_coerce(&json!({"path": "/tmp", "bogus": 1}))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownProperty("bogus".to_string()));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let schema = sample_schema();
        let err = schema.validate_and_coerce(&json!({})).unwrap_err();
        assert_eq!(err, ValidationError::MissingRequired("path".to_string()));
    }

    #[test]
    fn declares_object_with_properties_detects_empty_schema() {
        let empty = ObjectSchema::from_json(&json!({"type": "object"}));
        assert!(!empty.declares_object_with_properties());
    }
}
