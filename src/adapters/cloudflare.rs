//! Cloudflare AI Gateway adapter.
//!
//! One gateway endpoint fronts several upstreams. The upstream is picked from
//! the model prefix:
//!
//! | Model | Upstream | Gateway path |
//! |-------|----------|--------------|
//! | `openai/gpt-4o-mini` | OpenAI | `/openai/chat/completions` |
//! | `anthropic/claude-3-5-haiku-latest` | Anthropic | `/anthropic/v1/messages` |
//! | `@cf/meta/llama-3.1-8b-instruct`, `workers-ai/@cf/...` | Workers AI | `/workers-ai/{model}` |
//!
//! Job state lives in process memory and is lost on restart; use a durable
//! queue in front of this adapter when that matters.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::local::LocalBatches;
use super::{
    anthropic, openai, prompt_with_schema, validate_items, BatchAdapter, PollConfig, Submission,
};
use crate::config::{current_settings, process_env, CloudflareConfig, CloudflareSettings};
use crate::normalize::{self, OutputMode};
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, Provider};
use crate::{Error, Result};

pub const DEFAULT_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";
pub const WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    OpenAi,
    Anthropic,
    WorkersAi,
}

/// Where a model's requests go through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub upstream: Upstream,
    /// Model name as the upstream expects it.
    pub model: String,
    pub url: String,
}

pub fn route(gateway_base: &str, model: &str) -> Route {
    if let Some(m) = model.strip_prefix("openai/") {
        return Route {
            upstream: Upstream::OpenAi,
            model: m.to_string(),
            url: format!("{}/openai/chat/completions", gateway_base),
        };
    }
    if let Some(m) = model.strip_prefix("anthropic/") {
        return Route {
            upstream: Upstream::Anthropic,
            model: m.to_string(),
            url: format!("{}/anthropic/v1/messages", gateway_base),
        };
    }
    let m = model.strip_prefix("workers-ai/").unwrap_or(model);
    Route {
        upstream: Upstream::WorkersAi,
        model: m.to_string(),
        url: format!("{}/workers-ai/{}", gateway_base, m),
    }
}

/// Fail fast when the chosen upstream cannot be authenticated.
fn check_credentials(settings: &CloudflareSettings, upstream: Upstream) -> Result<()> {
    if upstream == Upstream::WorkersAi && settings.api_token.is_none() {
        return Err(Error::missing_config("cloudflare", "CLOUDFLARE_API_TOKEN"));
    }
    Ok(())
}

fn workers_ai_body(item: &BatchItem) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = item.system() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt_with_schema(item) }));
    let mut body = json!({ "messages": messages });
    if let Some(t) = item.temperature() {
        body["temperature"] = json!(t);
    }
    if let Some(m) = item.max_tokens() {
        body["max_tokens"] = json!(m);
    }
    body
}

/// Gateway request for one item.
pub fn build_request(settings: &CloudflareSettings, item: &BatchItem, model: &str) -> HttpRequest {
    let route = route(&settings.gateway_base, model);
    let mut req = match route.upstream {
        Upstream::OpenAi => {
            let req = HttpRequest::post_json(&route.url, &openai::chat_body(item, &route.model));
            match &settings.openai_api_key {
                Some(key) => req.bearer(key),
                None => req,
            }
        }
        Upstream::Anthropic => {
            let req = HttpRequest::post_json(&route.url, &anthropic::message_params(item, &route.model))
                .header("anthropic-version", anthropic::API_VERSION);
            match &settings.anthropic_api_key {
                Some(key) => req.header("x-api-key", key.clone()),
                None => req,
            }
        }
        Upstream::WorkersAi => {
            let req = HttpRequest::post_json(&route.url, &workers_ai_body(item));
            match &settings.api_token {
                Some(token) => req.bearer(token),
                None => req,
            }
        }
    };
    if let Some(token) = &settings.gateway_token {
        req = req.header("cf-aig-authorization", format!("Bearer {}", token));
    }
    req
}

#[derive(Debug)]
struct Inner {
    config: CloudflareConfig,
    transport: HttpTransport,
}

impl Inner {
    fn settings(&self) -> Result<CloudflareSettings> {
        self.config
            .clone()
            .or(&current_settings().cloudflare)
            .resolve(&process_env)
    }

    async fn run(
        &self,
        settings: &CloudflareSettings,
        item: BatchItem,
        model: &str,
        batch_id: &str,
    ) -> Result<BatchResult> {
        let mode = OutputMode::for_schema(item.schema.as_ref());
        let body = self
            .transport
            .send_json(build_request(settings, &item, model))
            .await?;
        normalize::cloudflare_gateway(&body, mode)
            .map(|n| n.into_result(format!("{}:{}", batch_id, item.id), item.id.clone()))
            .ok_or_else(|| Error::ItemFailure {
                custom_id: item.id,
                message: "gateway response matched no known shape".into(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct CloudflareAdapter {
    inner: Arc<Inner>,
    local: LocalBatches,
}

impl CloudflareAdapter {
    pub fn new() -> Self {
        Self::with_config(CloudflareConfig::default())
    }

    pub fn with_config(config: CloudflareConfig) -> Self {
        Self::with_transport(config, HttpTransport::shared())
    }

    pub fn with_transport(config: CloudflareConfig, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(Inner { config, transport }),
            local: LocalBatches::new(Provider::Cloudflare, WINDOW, Duration::from_secs(1)),
        }
    }
}

impl Default for CloudflareAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchAdapter for CloudflareAdapter {
    fn provider(&self) -> Provider {
        Provider::Cloudflare
    }

    fn default_poll_config(&self) -> PollConfig {
        self.local.poll_config()
    }

    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission> {
        validate_items(&items)?;
        let settings = self.inner.settings()?;
        let model = options.model_or(DEFAULT_MODEL).to_string();
        check_credentials(&settings, route(&settings.gateway_base, &model).upstream)?;

        let inner = self.inner.clone();
        let prefix = format!("cf_{}", uuid::Uuid::new_v4().simple());
        self.local
            .submit(items, &options, move |item| {
                let inner = inner.clone();
                let settings = settings.clone();
                let model = model.clone();
                let prefix = prefix.clone();
                async move { inner.run(&settings, item, &model, &prefix).await }
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
