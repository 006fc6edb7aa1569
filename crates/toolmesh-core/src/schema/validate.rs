//! Argument validation against an adapted schema

use serde_json::{Map, Value};
use thiserror::Error;

use super::adapter::{SchemaKind, ToolSchema};

/// One reason an argument set was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    #[error("expected an object, received {found}")]
    NotAnObject { found: &'static str },

    #[error("{field}: required")]
    MissingRequired { field: String },

    #[error("{field}: expected {expected}, received {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{field}: expected one of [{}], received {found:?}", .allowed.join(", "))]
    NotInEnum {
        field: String,
        allowed: Vec<String>,
        found: String,
    },
}

/// Tool-call arguments failed the adapted schema
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_kind(field: &str, kind: &SchemaKind, value: &Value) -> Option<ValidationIssue> {
    let ok = match kind {
        SchemaKind::Any => true,
        SchemaKind::String => value.is_string(),
        SchemaKind::Number => value.is_number(),
        SchemaKind::Boolean => value.is_boolean(),
        SchemaKind::Array => value.is_array(),
        SchemaKind::Object => value.is_object(),
        SchemaKind::Enum(allowed) => {
            return match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => None,
                Some(s) => Some(ValidationIssue::NotInEnum {
                    field: field.to_string(),
                    allowed: allowed.clone(),
                    found: s.to_string(),
                }),
                None => Some(ValidationIssue::WrongType {
                    field: field.to_string(),
                    expected: "string",
                    found: type_name(value),
                }),
            };
        }
    };

    (!ok).then(|| ValidationIssue::WrongType {
        field: field.to_string(),
        expected: kind.expected(),
        found: type_name(value),
    })
}

impl ToolSchema {
    /// Validate `args`, returning the cleaned argument object
    ///
    /// Missing or null arguments are treated as `{}`. Keys not declared by an
    /// object schema are dropped. Every issue is reported, not just the first.
    pub fn validate(&self, args: &Value) -> Result<Value, ValidationError> {
        let empty = Map::new();
        let input = match args {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ValidationError {
                    issues: vec![ValidationIssue::NotAnObject { found: type_name(other) }],
                })
            }
        };

        let properties = match self {
            ToolSchema::AcceptAll => return Ok(Value::Object(input.clone())),
            ToolSchema::Object { properties } => properties,
        };

        let mut issues = Vec::new();
        let mut cleaned = Map::new();

        for prop in properties {
            match input.get(&prop.name) {
                None if prop.required => issues.push(ValidationIssue::MissingRequired {
                    field: prop.name.clone(),
                }),
                None => {}
                Some(Value::Null) if prop.required && prop.kind != SchemaKind::Any => {
                    issues.push(ValidationIssue::MissingRequired {
                        field: prop.name.clone(),
                    })
                }
                Some(value) => match check_kind(&prop.name, &prop.kind, value) {
                    Some(issue) => issues.push(issue),
                    None => {
                        cleaned.insert(prop.name.clone(), value.clone());
                    }
                },
            }
        }

        if issues.is_empty() {
            Ok(Value::Object(cleaned))
        } else {
            Err(ValidationError { issues })
        }
    }
}
