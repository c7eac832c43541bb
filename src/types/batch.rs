//! Batch items, jobs and normalized results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::provider::Provider;
use crate::structured::SimpleSchema;

/// Per-item generation overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One prompt in a batch. `id` is the correlation key for its [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SimpleSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BatchItemOptions>,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            schema: None,
            options: None,
        }
    }

    pub fn with_schema(mut self, schema: SimpleSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.options.get_or_insert_with(Default::default).system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.options.get_or_insert_with(Default::default).temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.get_or_insert_with(Default::default).max_tokens = Some(max_tokens);
        self
    }

    pub fn system(&self) -> Option<&str> {
        self.options.as_ref().and_then(|o| o.system.as_deref())
    }

    pub fn temperature(&self) -> Option<f64> {
        self.options.as_ref().and_then(|o| o.temperature)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.options.as_ref().and_then(|o| o.max_tokens)
    }
}

/// Submission-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQueueOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl BatchQueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

/// Common batch lifecycle vocabulary every provider status is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Expired
                | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a submitted batch. Only the owning adapter mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    pub provider: Provider,
    pub status: BatchStatus,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
}

impl BatchJob {
    pub fn new(id: impl Into<String>, provider: Provider, total_items: usize) -> Self {
        Self {
            id: id.into(),
            provider,
            status: BatchStatus::Pending,
            total_items,
            completed_items: 0,
            failed_items: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            expires_at: None,
            webhook_url: None,
            input_file_id: None,
            output_file_id: None,
            error_file_id: None,
        }
    }

    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Outcome of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// Token accounting for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Normalized per-item result, correlated to its [`BatchItem`] by `custom_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub id: String,
    pub custom_id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn completed(
        id: impl Into<String>,
        custom_id: impl Into<String>,
        result: serde_json::Value,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: id.into(),
            custom_id: custom_id.into(),
            status: ResultStatus::Completed,
            result: Some(result),
            usage,
            error: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        custom_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            custom_id: custom_id.into(),
            status: ResultStatus::Failed,
            result: None,
            usage: None,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ResultStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names_and_terminality() {
        assert_eq!(
            serde_json::to_value(BatchStatus::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
        assert!(BatchStatus::Expired.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::Cancelling.is_terminal());
        assert!(!BatchStatus::Finalizing.is_terminal());
    }

    #[test]
    fn item_deserializes_from_camel_case() {
        let item: BatchItem = serde_json::from_value(serde_json::json!({
            "id": "a",
            "prompt": "hi",
            "schema": {"name": "text"},
            "options": {"system": "be brief", "maxTokens": 64}
        }))
        .unwrap();
        assert_eq!(item.id, "a");
        assert_eq!(item.max_tokens(), Some(64));
        assert_eq!(item.system(), Some("be brief"));
        assert!(item.schema.is_some());
    }

    #[test]
    fn result_serializes_custom_id() {
        let r = BatchResult::completed("r1", "a", serde_json::json!("ok"), Some(Usage::new(1, 2)));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["customId"], "a");
        assert_eq!(v["status"], "completed");
        assert_eq!(v["usage"]["totalTokens"], 3);
        assert!(v.get("error").is_none());
    }
}
