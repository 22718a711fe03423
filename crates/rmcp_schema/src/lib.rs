//! JSON Schema validation facade.
//!
//! Tool input schemas are compiled once at registration time and validated on
//! every call. Failures are reported as a list of violations, each naming the
//! JSON pointer of the offending value, what the schema expected and what was
//! found. The same facade powers schema-guided decoding of validated
//! arguments into typed parameter structs.
//!
//! Output schemas are advisory only: the server logs mismatches and never
//! fails a client call over them.

use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while compiling a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema document: {0}")]
    Compile(String),
}

/// One validation failure, reported to clients in `error.data.violations`.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// JSON pointer into the instance (e.g. "/formula")
    pub path: String,

    /// What the schema expected at that location
    pub expected: String,

    /// What the instance actually contained
    pub actual: String,

    /// Full validator message
    pub message: String,
}

/// A compiled, reusable schema.
pub struct CompiledSchema {
    raw: Value,
    compiled: JSONSchema,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").field("raw", &self.raw).finish()
    }
}

impl CompiledSchema {
    /// Compile a schema document (draft 2020-12).
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(schema)
            .map_err(|e| SchemaError::Compile(e.to_string()))?;
        Ok(Self {
            raw: schema.clone(),
            compiled,
        })
    }

    /// The original schema document (for tools/list descriptors).
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Validate an instance, collecting every violation.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<Violation>> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let mut violations: Vec<Violation> = errors.map(to_violation).collect();
                // Stable order so clients (and tests) see deterministic output.
                violations.sort_by(|a, b| {
                    a.path.cmp(&b.path).then_with(|| a.message.cmp(&b.message))
                });
                Err(violations)
            }
        }
    }

    /// Validate, then decode into a typed parameter struct.
    pub fn decode<T: DeserializeOwned>(&self, instance: Value) -> Result<T, Vec<Violation>> {
        self.validate(&instance)?;
        serde_json::from_value(instance).map_err(|e| {
            vec![Violation {
                path: String::new(),
                expected: "decodable parameter document".to_string(),
                actual: "undecodable value".to_string(),
                message: e.to_string(),
            }]
        })
    }
}

fn to_violation(err: jsonschema::ValidationError<'_>) -> Violation {
    let expected = match &err.kind {
        ValidationErrorKind::Type { kind } => match kind {
            TypeKind::Single(t) => t.to_string(),
            TypeKind::Multiple(types) => (*types)
                .into_iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" or "),
        },
        ValidationErrorKind::Required { property } => {
            format!("required property {}", property)
        }
        ValidationErrorKind::Enum { options } => format!("one of {}", options),
        ValidationErrorKind::Minimum { limit } => format!(">= {}", limit),
        ValidationErrorKind::Maximum { limit } => format!("<= {}", limit),
        ValidationErrorKind::MinLength { limit } => format!("length >= {}", limit),
        ValidationErrorKind::MaxLength { limit } => format!("length <= {}", limit),
        ValidationErrorKind::Pattern { pattern } => format!("match of {}", pattern),
        ValidationErrorKind::AdditionalProperties { unexpected } => {
            format!("no additional properties (got {})", unexpected.join(", "))
        }
        _ => "schema-conforming value".to_string(),
    };

    Violation {
        path: err.instance_path.to_string(),
        expected,
        actual: json_type_name(&err.instance).to_string(),
        message: err.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn linear_model_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "formula": { "type": "string" },
                "weights": { "type": "array", "items": { "type": "number" } }
            },
            "required": ["formula"],
            "additionalProperties": false
        })
    }

    #[test]
    fn test_valid_instance_passes() {
        let schema = CompiledSchema::compile(&linear_model_schema()).unwrap();
        assert!(schema.validate(&json!({ "formula": "y ~ x" })).is_ok());
    }

    #[test]
    fn test_type_violation_names_path_and_expected() {
        let schema = CompiledSchema::compile(&linear_model_schema()).unwrap();
        let violations = schema.validate(&json!({ "formula": 42 })).unwrap_err();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/formula");
        assert_eq!(violations[0].expected, "string");
        assert_eq!(violations[0].actual, "integer");
    }

    #[test]
    fn test_missing_required_property() {
        let schema = CompiledSchema::compile(&linear_model_schema()).unwrap();
        let violations = schema.validate(&json!({})).unwrap_err();
        assert!(violations[0].expected.contains("formula"));
    }

    #[test]
    fn test_multiple_violations_sorted_by_path() {
        let schema = CompiledSchema::compile(&linear_model_schema()).unwrap();
        let violations = schema
            .validate(&json!({ "formula": 1, "weights": "not-an-array" }))
            .unwrap_err();
        assert!(violations.len() >= 2);
        assert!(violations.windows(2).all(|w| w[0].path <= w[1].path));
    }

    #[test]
    fn test_decode_into_typed_params() {
        #[derive(Debug, Deserialize)]
        struct Params {
            formula: String,
        }

        let schema = CompiledSchema::compile(&linear_model_schema()).unwrap();
        let params: Params = schema.decode(json!({ "formula": "y ~ x" })).unwrap();
        assert_eq!(params.formula, "y ~ x");

        let err = schema.decode::<Params>(json!({ "formula": false })).unwrap_err();
        assert_eq!(err[0].path, "/formula");
    }

    #[test]
    fn test_bad_schema_document_fails_to_compile() {
        let result = CompiledSchema::compile(&json!({ "type": "no-such-type" }));
        assert!(matches!(result, Err(SchemaError::Compile(_))));
    }
}
