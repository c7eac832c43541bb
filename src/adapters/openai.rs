//! OpenAI Batch API adapter, plus a flex tier over Chat Completions.
//!
//! Batch flow: upload a JSONL file (`POST /files`, `purpose=batch`), create
//! the batch (`POST /batches`), poll `GET /batches/{id}`, then download the
//! output and error files (`GET /files/{id}/content`).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::local::run_flex;
use super::{
    remote_completion, validate_items, BatchAdapter, FlexAdapter, ItemIndex, PollConfig,
    Submission, SubmittedBatches,
};
use crate::batch::BatchExecutor;
use crate::config::{current_settings, process_env, OpenAiConfig, OpenAiSettings};
use crate::normalize::{self, OutputMode};
use crate::structured::JsonModeConfig;
use crate::transport::{jsonl, HttpRequest, HttpTransport};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, BatchStatus, Provider};
use crate::{Error, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";
pub const COMPLETION_WINDOW: &str = "24h";
pub const FLEX_WINDOW: usize = 10;

#[derive(Debug)]
struct Inner {
    config: OpenAiConfig,
    transport: HttpTransport,
    submitted: SubmittedBatches,
    flex: BatchExecutor,
}

#[derive(Debug, Clone)]
pub struct OpenAiBatchAdapter {
    inner: Arc<Inner>,
}

impl OpenAiBatchAdapter {
    pub fn new() -> Self {
        Self::with_config(OpenAiConfig::default())
    }

    /// Adapter whose explicit config takes precedence over `configure_openai` and env.
    pub fn with_config(config: OpenAiConfig) -> Self {
        Self::with_transport(config, HttpTransport::shared())
    }

    pub fn with_transport(config: OpenAiConfig, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                submitted: SubmittedBatches::default(),
                flex: BatchExecutor::windowed(FLEX_WINDOW),
            }),
        }
    }

    fn settings(&self) -> Result<OpenAiSettings> {
        self.inner
            .config
            .clone()
            .or(&current_settings().openai)
            .resolve(&process_env)
    }

    async fn fetch_batch(&self, settings: &OpenAiSettings, batch_id: &str) -> Result<Value> {
        let req = HttpRequest::get(format!("{}/batches/{}", settings.base_url, batch_id))
            .bearer(&settings.api_key);
        self.inner.transport.send_json(req).await
    }

    async fn fetch_file(&self, settings: &OpenAiSettings, file_id: &str) -> Result<Vec<Value>> {
        let req = HttpRequest::get(format!("{}/files/{}/content", settings.base_url, file_id))
            .bearer(&settings.api_key);
        self.inner.transport.send_jsonl(req).await
    }

    async fn chat(&self, settings: &OpenAiSettings, item: BatchItem, model: &str) -> Result<BatchResult> {
        let mode = OutputMode::for_schema(item.schema.as_ref());
        let req = HttpRequest::post_json(
            format!("{}/chat/completions", settings.base_url),
            &chat_body(&item, model),
        )
        .bearer(&settings.api_key);
        let body = self.inner.transport.send_json(req).await?;
        normalize::openai_chat(&body, mode)
            .map(|n| n.into_result(item.id.clone(), item.id.clone()))
            .ok_or_else(|| Error::ItemFailure {
                custom_id: item.id,
                message: "response contained no message content".into(),
            })
    }
}

impl Default for OpenAiBatchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat Completions request body for one item.
pub fn chat_body(item: &BatchItem, model: &str) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = item.system() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": item.prompt }));

    let mut body = json!({ "model": model, "messages": messages });
    if let Some(t) = item.temperature() {
        body["temperature"] = json!(t);
    }
    if let Some(m) = item.max_tokens() {
        body["max_tokens"] = json!(m);
    }
    if let Some(schema) = &item.schema {
        body["response_format"] = JsonModeConfig::from_simple(schema).to_openai_format();
    }
    body
}

/// One line of the batch input file.
pub fn batch_line(item: &BatchItem, model: &str) -> Value {
    json!({
        "custom_id": item.id,
        "method": "POST",
        "url": CHAT_COMPLETIONS_ENDPOINT,
        "body": chat_body(item, model),
    })
}

pub fn map_status(native: &str) -> BatchStatus {
    match native {
        "validating" => BatchStatus::Validating,
        "in_progress" => BatchStatus::InProgress,
        "finalizing" => BatchStatus::Finalizing,
        "completed" => BatchStatus::Completed,
        "failed" => BatchStatus::Failed,
        "expired" => BatchStatus::Expired,
        "cancelling" => BatchStatus::Cancelling,
        "cancelled" => BatchStatus::Cancelled,
        _ => BatchStatus::Pending,
    }
}

fn unix_time(v: &Value, key: &str) -> Option<DateTime<Utc>> {
    v.get(key)
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn string_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(String::from)
}

/// Map an OpenAI batch object onto a [`BatchJob`].
pub(crate) fn job_from_batch(batch: &Value, index: &ItemIndex) -> BatchJob {
    let id = batch.get("id").and_then(Value::as_str).unwrap_or_default();
    let counts = batch.get("request_counts").unwrap_or(&Value::Null);
    let count = |k: &str| counts.get(k).and_then(Value::as_u64).unwrap_or(0) as usize;
    let total = match count("total") {
        0 => index.ids.len(),
        n => n,
    };

    let mut job = BatchJob::new(id, Provider::OpenAi, total)
        .with_webhook_url(index.webhook_url.clone());
    job.status = map_status(batch.get("status").and_then(Value::as_str).unwrap_or_default());
    job.completed_items = count("completed");
    job.failed_items = count("failed");
    if let Some(created) = unix_time(batch, "created_at") {
        job.created_at = created;
    }
    job.started_at = unix_time(batch, "in_progress_at");
    job.completed_at = ["completed_at", "failed_at", "cancelled_at", "expired_at"]
        .iter()
        .find_map(|k| unix_time(batch, k));
    job.expires_at = unix_time(batch, "expires_at");
    job.input_file_id = string_field(batch, "input_file_id");
    job.output_file_id = string_field(batch, "output_file_id");
    job.error_file_id = string_field(batch, "error_file_id");
    job
}

#[async_trait]
impl BatchAdapter for OpenAiBatchAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
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

        let lines: Vec<Value> = items.iter().map(|i| batch_line(i, model)).collect();
        let file = jsonl::encode(&lines)?;
        let file_name = format!("batch_{}.jsonl", uuid::Uuid::new_v4().simple());
        let uploaded = self
            .inner
            .transport
            .upload_file(
                &format!("{}/files", settings.base_url),
                &settings.api_key,
                "batch",
                &file_name,
                file.to_vec(),
            )
            .await?;
        let input_file_id = uploaded
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::batch_state("", "file upload response has no id"))?;

        let metadata: Map<String, Value> = options
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut body = json!({
            "input_file_id": input_file_id,
            "endpoint": CHAT_COMPLETIONS_ENDPOINT,
            "completion_window": COMPLETION_WINDOW,
        });
        if !metadata.is_empty() {
            body["metadata"] = Value::Object(metadata);
        }
        let req = HttpRequest::post_json(format!("{}/batches", settings.base_url), &body)
            .bearer(&settings.api_key);
        let batch = self.inner.transport.send_json(req).await?;

        let index = ItemIndex::new(&items, options.webhook_url.clone());
        let job = job_from_batch(&batch, &index);
        if job.id.is_empty() {
            return Err(Error::batch_state("", "batch create response has no id"));
        }
        self.inner.submitted.remember(&job.id, index).await;
        tracing::info!(
            provider = "openai",
            batch_id = %job.id,
            input_file_id,
            items = items.len(),
            model,
            "batch submitted"
        );

        let completion = remote_completion(self.clone(), job.id.clone(), job.webhook_url.clone());
        Ok(Submission { job, completion })
    }

    async fn get_status(&self, batch_id: &str) -> Result<BatchJob> {
        let settings = self.settings()?;
        let batch = self.fetch_batch(&settings, batch_id).await?;
        let index = self.inner.submitted.get(batch_id).await;
        Ok(job_from_batch(&batch, &index))
    }

    async fn cancel(&self, batch_id: &str) -> Result<()> {
        let settings = self.settings()?;
        let req = HttpRequest::post(format!("{}/batches/{}/cancel", settings.base_url, batch_id))
            .bearer(&settings.api_key);
        self.inner.transport.send_json(req).await?;
        tracing::info!(provider = "openai", batch_id, "cancel requested");
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

        let mut results = Vec::with_capacity(job.total_items);
        for file_id in [&job.output_file_id, &job.error_file_id].into_iter().flatten() {
            for line in self.fetch_file(&settings, file_id).await? {
                if let Some(r) = normalize::openai_batch_line(&line, &index.modes) {
                    results.push(r);
                }
            }
        }
        Ok(normalize::reconcile(results, &index.ids))
    }
}

#[async_trait]
impl FlexAdapter for OpenAiBatchAdapter {
    fn flex_window(&self) -> usize {
        self.inner.flex.window()
    }

    async fn submit_flex(
        &self,
        items: Vec<BatchItem>,
        options: BatchQueueOptions,
    ) -> Result<Vec<BatchResult>> {
        let settings = self.settings()?;
        let model = options.model_or(DEFAULT_MODEL);
        run_flex(Provider::OpenAi, &self.inner.flex, items, |item| {
            self.chat(&settings, item, model)
        })
        .await
    }
}
