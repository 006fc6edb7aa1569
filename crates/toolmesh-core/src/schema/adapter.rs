//! Conversion from a declared JSON Schema to a [`ToolSchema`]

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Malformed schema declaration
///
/// Never fatal: callers fall back to [`ToolSchema::AcceptAll`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaAdaptationError {
    #[error("`properties` must be an object")]
    PropertiesNotObject,

    #[error("`required` must be an array of strings")]
    InvalidRequired,

    #[error("property `{0}` must be declared as an object")]
    InvalidProperty(String),

    #[error("enum of property `{0}` must contain only strings")]
    InvalidEnum(String),
}

/// Validator for a single property value
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String,
    Number,
    Boolean,
    /// Array of anything
    Array,
    /// Object with arbitrary values
    Object,
    /// Closed set of strings
    Enum(Vec<String>),
    Any,
}

impl SchemaKind {
    fn from_declaration(name: &str, decl: &Map<String, Value>) -> Result<Self, SchemaAdaptationError> {
        if let Some(values) = decl.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| SchemaAdaptationError::InvalidEnum(name.to_string()))?;
            let values = values
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| SchemaAdaptationError::InvalidEnum(name.to_string()))?;
            return Ok(SchemaKind::Enum(values));
        }

        Ok(match decl.get("type").and_then(Value::as_str) {
            Some("string") => SchemaKind::String,
            Some("number") => SchemaKind::Number,
            Some("boolean") => SchemaKind::Boolean,
            Some("array") => SchemaKind::Array,
            Some("object") => SchemaKind::Object,
            _ => SchemaKind::Any,
        })
    }

    /// Human-readable name used in validation messages
    pub fn expected(&self) -> &'static str {
        match self {
            SchemaKind::String => "string",
            SchemaKind::Number => "number",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Array => "array",
            SchemaKind::Object => "object",
            SchemaKind::Enum(_) => "enum",
            SchemaKind::Any => "any",
        }
    }

    fn to_json_schema(&self) -> Value {
        match self {
            SchemaKind::String => json!({ "type": "string" }),
            SchemaKind::Number => json!({ "type": "number" }),
            SchemaKind::Boolean => json!({ "type": "boolean" }),
            SchemaKind::Array => json!({ "type": "array", "items": {} }),
            SchemaKind::Object => json!({ "type": "object" }),
            SchemaKind::Enum(values) => json!({ "type": "string", "enum": values }),
            SchemaKind::Any => json!({}),
        }
    }
}

/// A named property of an object schema
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub name: String,
    pub kind: SchemaKind,
    pub description: Option<String>,
    pub required: bool,
}

impl PropertySchema {
    pub fn new(name: impl Into<String>, kind: SchemaKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Validated input schema of a tool
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSchema {
    /// Object with named properties, in declaration order
    Object { properties: Vec<PropertySchema> },
    /// Anything goes; arguments are passed through untouched
    AcceptAll,
}

impl Default for ToolSchema {
    fn default() -> Self {
        ToolSchema::AcceptAll
    }
}

impl ToolSchema {
    /// Object schema with no properties
    pub fn empty() -> Self {
        ToolSchema::Object { properties: Vec::new() }
    }

    pub fn object(properties: Vec<PropertySchema>) -> Self {
        ToolSchema::Object { properties }
    }

    /// Adapt a JSON Schema declaration
    ///
    /// Only object roots are understood; any other root yields `AcceptAll`.
    pub fn from_json(schema: &Value) -> Result<Self, SchemaAdaptationError> {
        let root = match schema.as_object() {
            Some(root) if root.get("type").and_then(Value::as_str) == Some("object") => root,
            _ => return Ok(ToolSchema::AcceptAll),
        };

        let required: Vec<&str> = match root.get("required") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(Value::as_str)
                .collect::<Option<Vec<_>>>()
                .ok_or(SchemaAdaptationError::InvalidRequired)?,
            Some(_) => return Err(SchemaAdaptationError::InvalidRequired),
        };

        let declared = match root.get("properties") {
            None | Some(Value::Null) => return Ok(ToolSchema::empty()),
            Some(Value::Object(props)) => props,
            Some(_) => return Err(SchemaAdaptationError::PropertiesNotObject),
        };

        let mut properties = Vec::with_capacity(declared.len());
        for (name, decl) in declared {
            let decl = decl
                .as_object()
                .ok_or_else(|| SchemaAdaptationError::InvalidProperty(name.clone()))?;
            properties.push(PropertySchema {
                name: name.clone(),
                kind: SchemaKind::from_declaration(name, decl)?,
                description: decl
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                required: required.contains(&name.as_str()),
            });
        }

        Ok(ToolSchema::Object { properties })
    }

    /// Adapt, degrading a malformed declaration to `AcceptAll`
    ///
    /// The error is handed to `on_error` so the caller can log it.
    pub fn adapt(schema: &Value, on_error: impl FnOnce(&SchemaAdaptationError)) -> Self {
        match Self::from_json(schema) {
            Ok(adapted) => adapted,
            Err(e) => {
                on_error(&e);
                ToolSchema::AcceptAll
            }
        }
    }

    pub fn properties(&self) -> &[PropertySchema] {
        match self {
            ToolSchema::Object { properties } => properties,
            ToolSchema::AcceptAll => &[],
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties().iter().find(|p| p.name == name)
    }

    /// JSON Schema advertised to the model as the tool's call signature
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for prop in self.properties() {
            let mut decl = prop.kind.to_json_schema();
            if let (Some(description), Some(obj)) = (&prop.description, decl.as_object_mut()) {
                obj.insert("description".to_string(), Value::String(description.clone()));
            }
            properties.insert(prop.name.clone(), decl);
            if prop.required {
                required.push(Value::String(prop.name.clone()));
            }
        }

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}
