//! Google Gemini adapter: concurrent `generateContent` calls with local job bookkeeping.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::local::{run_flex, LocalBatches};
use super::{prompt_with_schema, validate_items, BatchAdapter, FlexAdapter, PollConfig, Submission};
use crate::batch::BatchExecutor;
use crate::config::{current_settings, process_env, GoogleConfig, GoogleSettings};
use crate::normalize::{self, OutputMode};
use crate::structured::JsonModeConfig;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, Provider};
use crate::{Error, Result};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const WINDOW: usize = 10;
pub const FLEX_WINDOW: usize = 10;

#[derive(Debug)]
struct Inner {
    config: GoogleConfig,
    transport: HttpTransport,
}

impl Inner {
    fn settings(&self) -> Result<GoogleSettings> {
        self.config
            .clone()
            .or(&current_settings().google)
            .resolve(&process_env)
    }

    async fn generate(
        &self,
        settings: &GoogleSettings,
        item: BatchItem,
        model: &str,
        batch_id: &str,
    ) -> Result<BatchResult> {
        let mode = OutputMode::for_schema(item.schema.as_ref());
        let body = self
            .transport
            .send_json(generate_request(settings, &item, model))
            .await?;
        normalize::google_generate(&body, mode)
            .map(|n| n.into_result(format!("{}:{}", batch_id, item.id), item.id.clone()))
            .ok_or_else(|| Error::ItemFailure {
                custom_id: item.id,
                message: candidate_failure(&body),
            })
    }
}

/// Why a response carried no candidate text.
fn candidate_failure(body: &Value) -> String {
    if let Some(reason) = body.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
        return format!("prompt blocked: {}", reason);
    }
    match body.pointer("/candidates/0/finishReason").and_then(Value::as_str) {
        Some(reason) => format!("no text in candidate (finishReason: {})", reason),
        None => "response contained no candidates".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    inner: Arc<Inner>,
    local: LocalBatches,
    flex: BatchExecutor,
}

impl GoogleAdapter {
    pub fn new() -> Self {
        Self::with_config(GoogleConfig::default())
    }

    pub fn with_config(config: GoogleConfig) -> Self {
        Self::with_transport(config, HttpTransport::shared())
    }

    pub fn with_transport(config: GoogleConfig, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(Inner { config, transport }),
            local: LocalBatches::new(Provider::Google, WINDOW, Duration::from_secs(1)),
            flex: BatchExecutor::windowed(FLEX_WINDOW),
        }
    }
}

impl Default for GoogleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// `generateContent` request body for one item.
pub fn generate_body(item: &BatchItem) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt_with_schema(item) }] }],
    });
    if let Some(system) = item.system() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    let mut generation = json!({});
    if let Some(t) = item.temperature() {
        generation["temperature"] = json!(t);
    }
    if let Some(m) = item.max_tokens() {
        generation["maxOutputTokens"] = json!(m);
    }
    if let Some(schema) = &item.schema {
        if let (Some(dst), Value::Object(src)) = (
            generation.as_object_mut(),
            JsonModeConfig::from_simple(schema).to_gemini_config(),
        ) {
            dst.extend(src);
        }
    }
    if generation.as_object().map(|g| !g.is_empty()).unwrap_or(false) {
        body["generationConfig"] = generation;
    }
    body
}

/// The key travels in `x-goog-api-key`; request URLs end up in error messages.
pub fn generate_request(settings: &GoogleSettings, item: &BatchItem, model: &str) -> HttpRequest {
    let url = format!("{}/models/{}:generateContent", settings.base_url, model);
    HttpRequest::post_json(url, &generate_body(item))
        .header("x-goog-api-key", settings.api_key.as_str())
}

#[async_trait]
impl BatchAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn default_poll_config(&self) -> PollConfig {
        self.local.poll_config()
    }

    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission> {
        validate_items(&items)?;
        let settings = self.inner.settings()?;
        let model = options.model_or(DEFAULT_MODEL).to_string();
        let inner = self.inner.clone();
        let prefix = format!("gemini_{}", uuid::Uuid::new_v4().simple());
        self.local
            .submit(items, &options, move |item| {
                let inner = inner.clone();
                let settings = settings.clone();
                let model = model.clone();
                let prefix = prefix.clone();
                async move { inner.generate(&settings, item, &model, &prefix).await }
            })
            .await
    }

    async fn get_status(&self, batch_id: &str) -> Result<BatchJob> {
        self.local.status(batch_id).await
    }

    async fn cancel(&self, batch_id: &str) -> Result<()> {
        self.local.cancel(batch_id).await
    }

    async fn get_results(&self, batch_id: &str) -> Result<Vec<BatchResult>> {
        self.local.results(batch_id).await
    }
}

#[async_trait]
impl FlexAdapter for GoogleAdapter {
    fn flex_window(&self) -> usize {
        self.flex.window()
    }

    async fn submit_flex(
        &self,
        items: Vec<BatchItem>,
        options: BatchQueueOptions,
    ) -> Result<Vec<BatchResult>> {
        validate_items(&items)?;
        let settings = self.inner.settings()?;
        let model = options.model_or(DEFAULT_MODEL);
        run_flex(Provider::Google, &self.flex, items, |item| {
            self.inner.generate(&settings, item, model, "gemini_flex")
        })
        .await
    }
}
