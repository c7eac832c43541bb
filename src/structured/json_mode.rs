//! Structured output request fragments and lenient decoding.
//!
//! Each provider asks for structured output differently:
//! - OpenAI: `response_format: {type: "json_schema", json_schema: {...}}`
//! - Anthropic (and Bedrock Claude): a single forced tool whose `input_schema` is the schema
//! - Gemini: `generationConfig.responseMimeType = "application/json"`

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::schema::SimpleSchema;

/// Tool name used when structured output is requested through tool calling.
pub const STRUCTURED_TOOL_NAME: &str = "structured_output";

/// Structured output request derived from a [`SimpleSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct JsonModeConfig {
    /// Name for the schema (used in OpenAI format and as the Anthropic tool name)
    pub schema_name: String,

    /// Compiled JSON-Schema
    pub schema: Value,

    /// Whether to request strict schema compliance (OpenAI only)
    pub strict: bool,
}

impl JsonModeConfig {
    pub fn from_simple(schema: &SimpleSchema) -> Self {
        Self {
            schema_name: "response".to_string(),
            schema: schema.to_json_schema(),
            strict: false,
        }
    }

    /// Value for the `response_format` parameter of Chat Completions.
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.schema_name,
                "strict": self.strict,
                "schema": self.object_schema(),
            }
        })
    }

    /// Whether the schema root is not an object and gets a `{"value": ...}` envelope.
    pub fn is_wrapped(&self) -> bool {
        self.schema["type"] != "object"
    }

    /// Root-object form of the schema. Tool inputs and OpenAI schemas must be
    /// objects, so anything else is wrapped in a `{"value": ...}` envelope.
    pub fn object_schema(&self) -> Value {
        if self.is_wrapped() {
            json!({
                "type": "object",
                "properties": { "value": self.schema },
                "required": ["value"],
            })
        } else {
            self.schema.clone()
        }
    }

    /// `(tools, tool_choice)` pair forcing the model to answer through one tool.
    pub fn to_anthropic_tool(&self) -> (Value, Value) {
        let tools = json!([{
            "name": STRUCTURED_TOOL_NAME,
            "description": "Respond with structured data matching the input schema.",
            "input_schema": self.object_schema(),
        }]);
        let tool_choice = json!({ "type": "tool", "name": STRUCTURED_TOOL_NAME });
        (tools, tool_choice)
    }

    /// Fields merged into Gemini's `generationConfig`.
    pub fn to_gemini_config(&self) -> Value {
        json!({ "responseMimeType": "application/json" })
    }
}

static FENCED_JSON: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"```json\s*([\s\S]*?)\s*```").ok());
static FENCED_ANY: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"```\s*([\s\S]*?)\s*```").ok());
static BARE_OBJECT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\{[\s\S]*\}").ok());
static BARE_ARRAY: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[[\s\S]*\]").ok());

/// Parse JSON from model text, with support for markdown code blocks.
///
/// Extracts JSON from common formats:
/// - Raw JSON object or array
/// - ```json ... ``` code blocks
/// - ``` ... ``` code blocks
/// - Text containing JSON objects/arrays
pub fn parse_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(parsed) = serde_json::from_str::<Value>(text) {
        return Some(parsed);
    }

    for re in [&FENCED_JSON, &FENCED_ANY, &BARE_OBJECT, &BARE_ARRAY] {
        let Some(re) = (**re).as_ref() else { continue };
        if let Some(captures) = re.captures(text) {
            let candidate = match captures.get(1) {
                Some(inner) => inner.as_str(),
                None => captures.get(0).map(|c| c.as_str()).unwrap_or(text),
            };
            if let Ok(parsed) = serde_json::from_str::<Value>(candidate.trim()) {
                return Some(parsed);
            }
        }
    }

    None
}

/// Decode structured output. Never fails: unparseable text comes back as a JSON string.
pub fn decode_structured(text: &str) -> Value {
    parse_json(text).unwrap_or_else(|| Value::String(text.to_string()))
}

/// Whether text looks like a bare JSON object or array.
pub fn looks_like_json(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('{') || t.starts_with('[')
}
