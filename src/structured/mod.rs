//! Schema bridge for structured batch output.
//!
//! - [`SimpleSchema`]: compact shorthand parsed from caller JSON
//! - [`JsonModeConfig`]: provider-specific request fragments (response format, forced tool, MIME type)
//! - [`decode_structured`]: lenient JSON decoding that falls back to the raw string
//!
//! # Examples
//!
//! ```
//! use ai_batch::structured::{JsonModeConfig, SimpleSchema};
//! use serde_json::json;
//!
//! let schema = SimpleSchema::from(json!({ "name": "text", "age": "number" }));
//! let config = JsonModeConfig::from_simple(&schema);
//!
//! assert_eq!(config.schema["type"], "object");
//! assert_eq!(config.to_openai_format()["type"], "json_schema");
//! ```

pub mod json_mode;
pub mod schema;

pub use json_mode::{decode_structured, looks_like_json, parse_json, JsonModeConfig, STRUCTURED_TOOL_NAME};
pub use schema::{SimpleSchema, SCHEMA_BRIDGE_VERSION};
