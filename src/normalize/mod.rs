//! 结果归一化模块：将各厂商异构响应映射为统一的 BatchResult。
//!
//! # Result Normalizer
//!
//! Every provider wraps generated text differently. This module extracts the
//! text (or tool-call payload) and token usage from each envelope:
//!
//! | Envelope | Text location | Usage fields |
//! |----------|---------------|--------------|
//! | OpenAI chat | `choices[0].message.content` | `prompt_tokens` / `completion_tokens` |
//! | Anthropic message | first `tool_use` block, else first `text` block | `input_tokens` / `output_tokens` |
//! | Bedrock | per [`ModelFamily`] | per family; Titan reports no prompt tokens |
//! | Gemini | `candidates[0].content.parts[0].text` | `usageMetadata` |
//! | Cloudflare gateway | OpenAI, then Anthropic, then Workers AI `response` | whichever shape matched |
//!
//! Structured output that fails to parse is kept as the raw string; decoding
//! never raises.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::structured::{decode_structured, looks_like_json, parse_json, SimpleSchema};
use crate::types::{BatchResult, Usage};

/// How generated output should be decoded for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// No schema: keep text as a string.
    #[default]
    Text,
    /// Object schema: decode JSON leniently.
    Json,
    /// Non-object schema sent inside a `{"value": ...}` envelope.
    WrappedJson,
}

impl OutputMode {
    pub fn for_schema(schema: Option<&SimpleSchema>) -> Self {
        match schema {
            None => OutputMode::Text,
            Some(SimpleSchema::Object(_)) => OutputMode::Json,
            Some(_) => OutputMode::WrappedJson,
        }
    }

    pub fn is_structured(self) -> bool {
        self != OutputMode::Text
    }

    pub fn decode_text(self, text: &str) -> Value {
        match self {
            OutputMode::Text => Value::String(text.to_string()),
            OutputMode::Json => decode_structured(text),
            OutputMode::WrappedJson => unwrap_value(decode_structured(text)),
        }
    }

    fn decode_tool_input(self, input: Value) -> Value {
        match self {
            OutputMode::WrappedJson => unwrap_value(input),
            _ => input,
        }
    }
}

fn unwrap_value(v: Value) -> Value {
    match v {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("value") => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Extracted output of one provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Provider-assigned response id, when the envelope carries one.
    pub id: Option<String>,
    pub result: Value,
    pub usage: Option<Usage>,
}

impl Normalized {
    fn new(id: Option<String>, result: Value, usage: Option<Usage>) -> Self {
        Self { id, result, usage }
    }

    pub fn into_result(self, fallback_id: impl Into<String>, custom_id: impl Into<String>) -> BatchResult {
        let id = self.id.unwrap_or_else(|| fallback_id.into());
        BatchResult::completed(id, custom_id, self.result, self.usage)
    }
}

fn str_at<'a>(body: &'a Value, pointer: &str) -> Option<&'a str> {
    body.pointer(pointer).and_then(Value::as_str)
}

fn u64_at(body: &Value, pointer: &str) -> Option<u64> {
    body.pointer(pointer).and_then(Value::as_u64)
}

fn response_id(body: &Value) -> Option<String> {
    body.get("id").and_then(Value::as_str).map(String::from)
}

/// Usage from a pair of token counters; `None` when neither is present.
fn usage_from(body: &Value, prompt: &str, completion: &str) -> Option<Usage> {
    let p = u64_at(body, prompt);
    let c = u64_at(body, completion);
    if p.is_none() && c.is_none() {
        return None;
    }
    Some(Usage::new(p.unwrap_or(0), c.unwrap_or(0)))
}

/// OpenAI Chat Completions body (also OpenAI-compatible gateway responses).
pub fn openai_chat(body: &Value, mode: OutputMode) -> Option<Normalized> {
    let text = str_at(body, "/choices/0/message/content")?;
    let usage = usage_from(body, "/usage/prompt_tokens", "/usage/completion_tokens");
    Some(Normalized::new(response_id(body), mode.decode_text(text), usage))
}

/// Anthropic Messages body. A `tool_use` block wins over text.
pub fn anthropic_message(body: &Value, mode: OutputMode) -> Option<Normalized> {
    let blocks = body.get("content")?.as_array()?;
    let usage = usage_from(body, "/usage/input_tokens", "/usage/output_tokens");

    let tool = blocks
        .iter()
        .find(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .and_then(|b| b.get("input"));
    if let Some(input) = tool {
        let result = mode.decode_tool_input(input.clone());
        return Some(Normalized::new(response_id(body), result, usage));
    }

    let text = blocks
        .iter()
        .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)?;
    let result = match mode {
        OutputMode::Text => parse_json(text)
            .filter(|_| looks_like_json(text))
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => mode.decode_text(text),
    };
    Some(Normalized::new(response_id(body), result, usage))
}

/// Bedrock model families with distinct invoke payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Anthropic,
    /// Titan text and Nova.
    Amazon,
    Meta,
    Mistral,
    Generic,
}

const INFERENCE_PROFILE_PREFIXES: &[&str] = &["us.", "eu.", "apac.", "global."];

impl ModelFamily {
    /// Family from a Bedrock model id, ignoring cross-region inference profile prefixes.
    pub fn detect(model_id: &str) -> Self {
        let id = INFERENCE_PROFILE_PREFIXES
            .iter()
            .find_map(|p| model_id.strip_prefix(p))
            .unwrap_or(model_id);
        match id.split('.').next().unwrap_or_default() {
            "anthropic" => ModelFamily::Anthropic,
            "amazon" => ModelFamily::Amazon,
            "meta" => ModelFamily::Meta,
            "mistral" => ModelFamily::Mistral,
            _ => ModelFamily::Generic,
        }
    }
}

/// Bedrock `InvokeModel` body for the given family.
pub fn bedrock_invoke(body: &Value, family: ModelFamily, mode: OutputMode) -> Option<Normalized> {
    match family {
        ModelFamily::Anthropic => anthropic_message(body, mode),
        ModelFamily::Amazon => {
            // Nova speaks the converse-style shape; Titan text does not report prompt tokens.
            if let Some(text) = str_at(body, "/output/message/content/0/text") {
                let usage = usage_from(body, "/usage/inputTokens", "/usage/outputTokens");
                return Some(Normalized::new(None, mode.decode_text(text), usage));
            }
            let text = str_at(body, "/results/0/outputText")?;
            let usage = u64_at(body, "/results/0/tokenCount").map(|c| Usage::new(0, c));
            Some(Normalized::new(None, mode.decode_text(text), usage))
        }
        ModelFamily::Meta => {
            let text = str_at(body, "/generation")?;
            let usage = usage_from(body, "/prompt_token_count", "/generation_token_count");
            Some(Normalized::new(None, mode.decode_text(text), usage))
        }
        ModelFamily::Mistral => {
            if let Some(n) = openai_chat(body, mode) {
                return Some(n);
            }
            let text = str_at(body, "/outputs/0/text")?;
            Some(Normalized::new(None, mode.decode_text(text), None))
        }
        ModelFamily::Generic => {
            const TEXT_POINTERS: &[&str] = &[
                "/completion",
                "/generation",
                "/outputText",
                "/text",
                "/outputs/0/text",
                "/results/0/outputText",
                "/output/message/content/0/text",
            ];
            if let Some(n) = openai_chat(body, mode) {
                return Some(n);
            }
            match TEXT_POINTERS.iter().find_map(|p| str_at(body, p)) {
                Some(text) => Some(Normalized::new(None, mode.decode_text(text), None)),
                None => Some(Normalized::new(None, body.clone(), None)),
            }
        }
    }
}

/// Gemini `generateContent` body. Text that looks like JSON is parsed even without a schema.
pub fn google_generate(body: &Value, mode: OutputMode) -> Option<Normalized> {
    let text = str_at(body, "/candidates/0/content/parts/0/text")?;
    let result = if mode.is_structured() {
        mode.decode_text(text)
    } else if looks_like_json(text) {
        decode_structured(text)
    } else {
        Value::String(text.to_string())
    };
    let usage = usage_from(
        body,
        "/usageMetadata/promptTokenCount",
        "/usageMetadata/candidatesTokenCount",
    );
    let id = body.get("responseId").and_then(Value::as_str).map(String::from);
    Some(Normalized::new(id, result, usage))
}

/// Cloudflare AI Gateway body: OpenAI, then Anthropic, then Workers AI shapes.
pub fn cloudflare_gateway(body: &Value, mode: OutputMode) -> Option<Normalized> {
    if body.get("choices").is_some() {
        if let Some(n) = openai_chat(body, mode) {
            return Some(n);
        }
    }
    if body.get("content").map(Value::is_array).unwrap_or(false) {
        if let Some(n) = anthropic_message(body, mode) {
            return Some(n);
        }
    }
    let (text, usage) = if let Some(text) = str_at(body, "/result/response") {
        (
            text,
            usage_from(body, "/result/usage/prompt_tokens", "/result/usage/completion_tokens"),
        )
    } else {
        (
            str_at(body, "/response")?,
            usage_from(body, "/usage/prompt_tokens", "/usage/completion_tokens"),
        )
    };
    Some(Normalized::new(None, mode.decode_text(text), usage))
}

fn error_message(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => str_at(other, "/message")
            .or_else(|| str_at(other, "/error/message"))
            .or_else(|| str_at(other, "/errorMessage"))
            .map(String::from)
            .or_else(|| Some(other.to_string())),
    }
}

/// One line of an OpenAI batch output or error file.
pub fn openai_batch_line(line: &Value, modes: &HashMap<String, OutputMode>) -> Option<BatchResult> {
    let custom_id = line.get("custom_id")?.as_str()?;
    let id = line
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(custom_id)
        .to_string();

    if let Some(err) = line.get("error").and_then(error_message) {
        return Some(BatchResult::failed(id, custom_id, err));
    }
    let status = u64_at(line, "/response/status_code").unwrap_or(200);
    let body = line.pointer("/response/body").unwrap_or(&Value::Null);
    if status >= 400 {
        let err = body
            .get("error")
            .and_then(error_message)
            .unwrap_or_else(|| format!("HTTP {}", status));
        return Some(BatchResult::failed(id, custom_id, err));
    }

    let mode = modes.get(custom_id).copied().unwrap_or_default();
    Some(match openai_chat(body, mode) {
        Some(n) => BatchResult::completed(id, custom_id, n.result, n.usage),
        None => BatchResult::failed(id, custom_id, "response contained no message content"),
    })
}

/// One line of an Anthropic message batch results file.
pub fn anthropic_batch_line(line: &Value, modes: &HashMap<String, OutputMode>) -> Option<BatchResult> {
    let custom_id = line.get("custom_id")?.as_str()?;
    let result = line.get("result").unwrap_or(&Value::Null);
    let kind = result.get("type").and_then(Value::as_str).unwrap_or("unknown");

    Some(match kind {
        "succeeded" => {
            let message = result.get("message").unwrap_or(&Value::Null);
            let mode = modes.get(custom_id).copied().unwrap_or_default();
            match anthropic_message(message, mode) {
                Some(n) => n.into_result(custom_id, custom_id),
                None => BatchResult::failed(custom_id, custom_id, "message contained no content"),
            }
        }
        "errored" => {
            let err = result
                .get("error")
                .and_then(error_message)
                .unwrap_or_else(|| "request errored".to_string());
            BatchResult::failed(custom_id, custom_id, err)
        }
        "canceled" => BatchResult::failed(custom_id, custom_id, "request canceled"),
        "expired" => BatchResult::failed(custom_id, custom_id, "request expired"),
        other => BatchResult::failed(custom_id, custom_id, format!("unknown result type: {}", other)),
    })
}

/// One record of a Bedrock batch inference output file.
pub fn bedrock_job_line(
    line: &Value,
    family: ModelFamily,
    modes: &HashMap<String, OutputMode>,
) -> Option<BatchResult> {
    let record_id = line.get("recordId")?.as_str()?;
    if let Some(err) = line.get("error").and_then(error_message) {
        return Some(BatchResult::failed(record_id, record_id, err));
    }
    let output = line.get("modelOutput").unwrap_or(&Value::Null);
    let mode = modes.get(record_id).copied().unwrap_or_default();
    Some(match bedrock_invoke(output, family, mode) {
        Some(n) => n.into_result(record_id, record_id),
        None => BatchResult::failed(record_id, record_id, "record contained no model output"),
    })
}

/// Enforce one result per submitted id.
///
/// Duplicates keep the first occurrence; ids absent from provider output get a
/// failed result. When `expected` is empty (batch not submitted by this
/// process) results are only de-duplicated.
pub fn reconcile(results: Vec<BatchResult>, expected: &[String]) -> Vec<BatchResult> {
    let mut seen = HashSet::new();
    let mut by_id: HashMap<String, BatchResult> = HashMap::with_capacity(results.len());
    let mut order = Vec::with_capacity(results.len());
    for r in results {
        if seen.insert(r.custom_id.clone()) {
            order.push(r.custom_id.clone());
            by_id.insert(r.custom_id.clone(), r);
        } else {
            tracing::debug!(custom_id = %r.custom_id, "dropping duplicate result");
        }
    }

    if expected.is_empty() {
        return order.into_iter().filter_map(|id| by_id.remove(&id)).collect();
    }

    let wanted: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let unexpected = by_id.keys().filter(|k| !wanted.contains(k.as_str())).count();
    if unexpected > 0 {
        tracing::warn!(unexpected, "provider returned results for unknown ids");
    }
    expected
        .iter()
        .map(|id| {
            by_id.remove(id).unwrap_or_else(|| {
                BatchResult::failed(id.clone(), id.clone(), "no result returned by provider")
            })
        })
        .collect()
}
