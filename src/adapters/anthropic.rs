//! Anthropic Message Batches adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{
    remote_completion, validate_items, BatchAdapter, ItemIndex, PollConfig, Submission,
    SubmittedBatches,
};
use crate::config::{current_settings, process_env, AnthropicConfig, AnthropicSettings};
use crate::normalize;
use crate::structured::JsonModeConfig;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, BatchStatus, Provider};
use crate::{Error, Result};

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
pub const API_VERSION: &str = "2023-06-01";
pub const BATCHES_BETA: &str = "message-batches-2024-09-24";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug)]
struct Inner {
    config: AnthropicConfig,
    transport: HttpTransport,
    submitted: SubmittedBatches,
}

#[derive(Debug, Clone)]
pub struct AnthropicBatchAdapter {
    inner: Arc<Inner>,
}

impl AnthropicBatchAdapter {
    pub fn new() -> Self {
        Self::with_config(AnthropicConfig::default())
    }

    pub fn with_config(config: AnthropicConfig) -> Self {
        Self::with_transport(config, HttpTransport::shared())
    }

    pub fn with_transport(config: AnthropicConfig, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                submitted: SubmittedBatches::default(),
            }),
        }
    }

    fn settings(&self) -> Result<AnthropicSettings> {
        self.inner
            .config
            .clone()
            .or(&current_settings().anthropic)
            .resolve(&process_env)
    }

    async fn fetch_batch(&self, settings: &AnthropicSettings, batch_id: &str) -> Result<Value> {
        let req = authorized(
            HttpRequest::get(format!("{}/messages/batches/{}", settings.base_url, batch_id)),
            settings,
        );
        self.inner.transport.send_json(req).await
    }
}

impl Default for AnthropicBatchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn authorized(req: HttpRequest, settings: &AnthropicSettings) -> HttpRequest {
    req.header("x-api-key", settings.api_key.clone())
        .header("anthropic-version", API_VERSION)
        .header("anthropic-beta", BATCHES_BETA)
}

/// Messages API parameters for one item. A schema becomes a forced tool call.
pub fn message_params(item: &BatchItem, model: &str) -> Value {
    let mut params = json!({
        "model": model,
        "max_tokens": item.max_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": [{ "role": "user", "content": item.prompt }],
    });
    if let Some(system) = item.system() {
        params["system"] = json!(system);
    }
    if let Some(t) = item.temperature() {
        params["temperature"] = json!(t);
    }
    if let Some(schema) = &item.schema {
        let (tools, tool_choice) = JsonModeConfig::from_simple(schema).to_anthropic_tool();
        params["tools"] = tools;
        params["tool_choice"] = tool_choice;
    }
    params
}

pub fn map_status(processing_status: &str, cancel_initiated: bool) -> BatchStatus {
    match (processing_status, cancel_initiated) {
        ("ended", true) => BatchStatus::Cancelled,
        ("canceling", _) | ("in_progress", true) => BatchStatus::Cancelling,
        ("ended", false) => BatchStatus::Completed,
        _ => BatchStatus::InProgress,
    }
}

fn rfc3339(v: &Value, key: &str) -> Option<DateTime<Utc>> {
    v.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Map an Anthropic message batch object onto a [`BatchJob`].
pub(crate) fn job_from_batch(batch: &Value, index: &ItemIndex) -> BatchJob {
    let id = batch.get("id").and_then(Value::as_str).unwrap_or_default();
    let counts = batch.get("request_counts").unwrap_or(&Value::Null);
    let count = |k: &str| counts.get(k).and_then(Value::as_u64).unwrap_or(0) as usize;
    let succeeded = count("succeeded");
    let failed = count("errored") + count("canceled") + count("expired");
    let total = match succeeded + failed + count("processing") {
        0 => index.ids.len(),
        n => n,
    };

    let cancel_initiated = batch
        .get("cancel_initiated_at")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    let processing = batch
        .get("processing_status")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut job = BatchJob::new(id, Provider::Anthropic, total)
        .with_webhook_url(index.webhook_url.clone());
    job.status = map_status(processing, cancel_initiated);
    job.completed_items = succeeded;
    job.failed_items = failed;
    if let Some(created) = rfc3339(batch, "created_at") {
        job.created_at = created;
        job.started_at = Some(created);
    }
    job.completed_at = rfc3339(batch, "ended_at");
    job.expires_at = rfc3339(batch, "expires_at");
    job
}

#[async_trait]
impl BatchAdapter for AnthropicBatchAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn default_poll_config(&self) -> PollConfig {
        PollConfig::every(Duration::from_secs(30))
    }

    fn terminal_failure_is_error(&self) -> bool {
        true
    }

    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission> {
        validate_items(&items)?;
        let settings = self.settings()?;
        let model = options.model_or(DEFAULT_MODEL);

        let requests: Vec<Value> = items
            .iter()
            .map(|i| json!({ "custom_id": i.id, "params": message_params(i, model) }))
            .collect();
        let req = authorized(
            HttpRequest::post_json(
                format!("{}/messages/batches", settings.base_url),
                &json!({ "requests": requests }),
            ),
            &settings,
        );
        let batch = self.inner.transport.send_json(req).await?;

        let index = ItemIndex::new(&items, options.webhook_url.clone());
        let job = job_from_batch(&batch, &index);
        if job.id.is_empty() {
            return Err(Error::batch_state("", "batch create response has no id"));
        }
        self.inner.submitted.remember(&job.id, index).await;
        tracing::info!(provider = "anthropic", batch_id = %job.id, items = items.len(), model, "batch submitted");

        let completion = remote_completion(self.clone(), job.id.clone(), job.webhook_url.clone());
        Ok(Submission { job, completion })
    }

    async fn get_status(&self, batch_id: &str) -> Result<BatchJob> {
        let settings = self.settings()?;
        let batch = self.fetch_batch(&settings, batch_id).await?;
        Ok(job_from_batch(&batch, &self.inner.submitted.get(batch_id).await))
    }

    async fn cancel(&self, batch_id: &str) -> Result<()> {
        let settings = self.settings()?;
        let req = authorized(
            HttpRequest::post(format!(
                "{}/messages/batches/{}/cancel",
                settings.base_url, batch_id
            )),
            &settings,
        );
        self.inner.transport.send_json(req).await?;
        tracing::info!(provider = "anthropic", batch_id, "cancel requested");
        Ok(())
    }

    async fn get_results(&self, batch_id: &str) -> Result<Vec<BatchResult>> {
        let settings = self.settings()?;
        let batch = self.fetch_batch(&settings, batch_id).await?;
        let index = self.inner.submitted.get(batch_id).await;
        let job = job_from_batch(&batch, &index);
        if !job.is_terminal() {
            return Err(Error::not_complete(batch_id, job.status));
        }

        let results_url = batch
            .get("results_url")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("{}/messages/batches/{}/results", settings.base_url, batch_id));
        let lines = self
            .inner
            .transport
            .send_jsonl(authorized(HttpRequest::get(results_url), &settings))
            .await?;
        let results = lines
            .iter()
            .filter_map(|l| normalize::anthropic_batch_line(l, &index.modes))
            .collect();
        Ok(normalize::reconcile(results, &index.ids))
    }
}
