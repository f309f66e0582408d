//! Parameter schemas
//!
//! Each command declares its parameters up front. Validation happens on the
//! connection task before anything is queued, so a bad request never costs
//! a trip through the privileged thread.

use serde_json::Value;
use surfacelink_protocol::Params;
use surfacelink_utils::{BridgeError, Result};

/// Expected JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

/// A single declared parameter
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
}

/// Declared parameters of a command
///
/// Parameters not declared here are passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    fields: Vec<FieldSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter that must be present
    pub fn required(mut self, name: &str, kind: ParamKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
            default: None,
        });
        self
    }

    /// Declare a parameter that may be omitted
    pub fn optional(mut self, name: &str, kind: ParamKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
            default: None,
        });
        self
    }

    /// Declare a parameter filled with `default` when omitted
    pub fn with_default(mut self, name: &str, kind: ParamKind, default: Value) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
            default: Some(default),
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check `params` and return them with defaults filled in
    ///
    /// A `null` value counts as absent.
    pub fn validate(&self, params: &Params) -> Result<Params> {
        let mut resolved = params.clone();

        for field in &self.fields {
            match params.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) if !field.kind.matches(value) => {
                    return Err(BridgeError::invalid_params(
                        &field.name,
                        format!("expected {}, got {}", field.kind.name(), json_type(value)),
                    ));
                }
                Some(_) => {}
                None if field.required => {
                    return Err(BridgeError::invalid_params(&field.name, "missing required parameter"));
                }
                None => match &field.default {
                    Some(default) => {
                        resolved.insert(field.name.clone(), default.clone());
                    }
                    None => {
                        resolved.remove(&field.name);
                    }
                },
            }
        }

        Ok(resolved)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .required("path", ParamKind::String)
            .with_default("max_results", ParamKind::Integer, json!(50))
            .optional("verbose", ParamKind::Boolean)
    }

    #[test]
    fn test_missing_required_names_field() {
        let err = schema().validate(&params(json!({}))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "InvalidParameters: path: missing required parameter"
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = schema().validate(&params(json!({"path": null}))).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParameters { ref field, .. } if field == "path"));
    }

    #[test]
    fn test_wrong_type_names_field_and_types() {
        let err = schema()
            .validate(&params(json!({"path": "a", "max_results": "ten"})))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "InvalidParameters: max_results: expected integer, got string"
        );
    }

    #[test]
    fn test_defaults_are_filled() {
        let resolved = schema().validate(&params(json!({"path": "drums"}))).unwrap();
        assert_eq!(resolved["max_results"], json!(50));
        assert!(!resolved.contains_key("verbose"));
    }

    #[test]
    fn test_explicit_values_win_over_defaults() {
        let resolved = schema()
            .validate(&params(json!({"path": "drums", "max_results": 5})))
            .unwrap();
        assert_eq!(resolved["max_results"], json!(5));
    }

    #[test]
    fn test_undeclared_params_pass_through() {
        let resolved = schema()
            .validate(&params(json!({"path": "drums", "extra": [1, 2]})))
            .unwrap();
        assert_eq!(resolved["extra"], json!([1, 2]));
    }

    #[test]
    fn test_integer_rejects_float_but_number_accepts() {
        assert!(!ParamKind::Integer.matches(&json!(1.5)));
        assert!(ParamKind::Number.matches(&json!(1.5)));
        assert!(ParamKind::Number.matches(&json!(2)));
        assert!(ParamKind::Any.matches(&json!(null)));
    }
}
