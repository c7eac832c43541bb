//! Simple schema shorthand and its JSON-Schema mapping.
//!
//! Callers describe structured output with a compact shorthand instead of
//! hand-written JSON-Schema:
//!
//! | Shorthand | JSON-Schema |
//! |-----------|-------------|
//! | `"text"`, `"string"` | `{"type": "string"}` |
//! | any other string | `{"type": "string", "description": <string>}` |
//! | `"number"`, `"integer"`, `1` | `{"type": "number"}` |
//! | `"boolean"`, `true` | `{"type": "boolean"}` |
//! | `[x]` | `{"type": "array", "items": <x>}` |
//! | `{k: x, ...}` | `{"type": "object", "properties": {...}, "required": [k, ...]}` |
//! | anything else | `{"type": "object"}` |

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Version of the shorthand → JSON-Schema mapping table.
pub const SCHEMA_BRIDGE_VERSION: u32 = 1;

const STRING_KEYWORDS: &[&str] = &["string", "text", "str"];
const NUMBER_KEYWORDS: &[&str] = &["number", "integer", "int", "float"];
const BOOLEAN_KEYWORDS: &[&str] = &["boolean", "bool"];

/// Parsed shorthand schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum SimpleSchema {
    String(Option<String>),
    Number,
    Boolean,
    Array(Box<SimpleSchema>),
    Object(Vec<(String, SimpleSchema)>),
    Unknown,
}

impl SimpleSchema {
    pub fn string() -> Self {
        SimpleSchema::String(None)
    }

    pub fn described(description: impl Into<String>) -> Self {
        SimpleSchema::String(Some(description.into()))
    }

    pub fn array(items: SimpleSchema) -> Self {
        SimpleSchema::Array(Box::new(items))
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, SimpleSchema)>) -> Self {
        SimpleSchema::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// JSON-Schema usable as a tool `input_schema` or `response_format` schema.
    pub fn to_json_schema(&self) -> Value {
        match self {
            SimpleSchema::String(None) => json!({ "type": "string" }),
            SimpleSchema::String(Some(desc)) => {
                json!({ "type": "string", "description": desc })
            }
            SimpleSchema::Number => json!({ "type": "number" }),
            SimpleSchema::Boolean => json!({ "type": "boolean" }),
            SimpleSchema::Array(items) => json!({
                "type": "array",
                "items": items.to_json_schema(),
            }),
            SimpleSchema::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    properties.insert(name.clone(), field.to_json_schema());
                    required.push(Value::String(name.clone()));
                }
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
            SimpleSchema::Unknown => json!({ "type": "object" }),
        }
    }

    /// Placeholder value that satisfies the schema.
    pub fn sample_value(&self) -> Value {
        match self {
            SimpleSchema::String(_) => Value::String("mock".into()),
            SimpleSchema::Number => json!(0),
            SimpleSchema::Boolean => Value::Bool(false),
            SimpleSchema::Array(items) => Value::Array(vec![items.sample_value()]),
            SimpleSchema::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.sample_value()))
                    .collect(),
            ),
            SimpleSchema::Unknown => json!({}),
        }
    }
}

fn classify_string(s: &str) -> SimpleSchema {
    let key = s.trim().to_ascii_lowercase();
    if STRING_KEYWORDS.contains(&key.as_str()) {
        SimpleSchema::String(None)
    } else if NUMBER_KEYWORDS.contains(&key.as_str()) {
        SimpleSchema::Number
    } else if BOOLEAN_KEYWORDS.contains(&key.as_str()) {
        SimpleSchema::Boolean
    } else {
        SimpleSchema::String(Some(s.to_string()))
    }
}

impl From<&Value> for SimpleSchema {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => classify_string(s),
            Value::Number(_) => SimpleSchema::Number,
            Value::Bool(_) => SimpleSchema::Boolean,
            Value::Array(items) => SimpleSchema::Array(Box::new(
                items.first().map(SimpleSchema::from).unwrap_or(SimpleSchema::Unknown),
            )),
            Value::Object(map) => SimpleSchema::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), SimpleSchema::from(v)))
                    .collect(),
            ),
            Value::Null => SimpleSchema::Unknown,
        }
    }
}

impl From<Value> for SimpleSchema {
    fn from(value: Value) -> Self {
        SimpleSchema::from(&value)
    }
}

impl From<SimpleSchema> for Value {
    fn from(schema: SimpleSchema) -> Self {
        match schema {
            SimpleSchema::String(None) => Value::String("string".into()),
            SimpleSchema::String(Some(desc)) => Value::String(desc),
            SimpleSchema::Number => Value::String("number".into()),
            SimpleSchema::Boolean => Value::String("boolean".into()),
            SimpleSchema::Array(items) => Value::Array(vec![Value::from(*items)]),
            SimpleSchema::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
            SimpleSchema::Unknown => Value::Null,
        }
    }
}
