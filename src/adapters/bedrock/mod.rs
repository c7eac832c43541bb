//! AWS Bedrock adapters.
//!
//! - [`BedrockAdapter`]: concurrent `InvokeModel` calls (window 5, flex window 8)
//!   with local job bookkeeping.
//! - [`BedrockJobAdapter`]: native batch inference jobs staged through S3.
//!
//! Every request is SigV4-signed. When an AI gateway URL is configured,
//! runtime calls are sent to the gateway but signed for the native
//! `bedrock-runtime` host the gateway forwards to.

pub mod job;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::local::{run_flex, LocalBatches};
use super::{
    anthropic, prompt_with_schema, validate_items, BatchAdapter, FlexAdapter, PollConfig, Submission,
};
use crate::batch::BatchExecutor;
use crate::config::{current_settings, process_env, BedrockConfig, BedrockSettings};
use crate::normalize::{self, ModelFamily, OutputMode};
use crate::signing::SigV4Signer;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, Provider};
use crate::{Error, Result};

pub use job::BedrockJobAdapter;

pub const DEFAULT_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const WINDOW: usize = 5;
pub const FLEX_WINDOW: usize = 8;
pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

fn llama_prompt(item: &BatchItem) -> String {
    let mut p = String::from("<|begin_of_text|>");
    if let Some(system) = item.system() {
        p.push_str(&format!(
            "<|start_header_id|>system<|end_header_id|>\n\n{}<|eot_id|>",
            system
        ));
    }
    p.push_str(&format!(
        "<|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n",
        prompt_with_schema(item)
    ));
    p
}

fn with_system_prefix(item: &BatchItem) -> String {
    match item.system() {
        Some(system) => format!("{}\n\n{}", system, prompt_with_schema(item)),
        None => prompt_with_schema(item),
    }
}

/// `InvokeModel` body in the shape the model family expects.
pub fn invoke_body(item: &BatchItem, model: &str) -> Value {
    match ModelFamily::detect(model) {
        ModelFamily::Anthropic => {
            let mut params = anthropic::message_params(item, model);
            if let Some(obj) = params.as_object_mut() {
                obj.remove("model");
                obj.insert("anthropic_version".into(), json!(ANTHROPIC_VERSION));
            }
            params
        }
        ModelFamily::Amazon if model.contains("nova") => {
            let mut body = json!({
                "schemaVersion": "messages-v1",
                "messages": [{ "role": "user", "content": [{ "text": prompt_with_schema(item) }] }],
            });
            if let Some(system) = item.system() {
                body["system"] = json!([{ "text": system }]);
            }
            let mut inference = json!({});
            if let Some(m) = item.max_tokens() {
                inference["maxTokens"] = json!(m);
            }
            if let Some(t) = item.temperature() {
                inference["temperature"] = json!(t);
            }
            body["inferenceConfig"] = inference;
            body
        }
        ModelFamily::Amazon => {
            let mut config = json!({});
            if let Some(m) = item.max_tokens() {
                config["maxTokenCount"] = json!(m);
            }
            if let Some(t) = item.temperature() {
                config["temperature"] = json!(t);
            }
            json!({ "inputText": with_system_prefix(item), "textGenerationConfig": config })
        }
        ModelFamily::Meta => {
            let mut body = json!({ "prompt": llama_prompt(item) });
            if let Some(m) = item.max_tokens() {
                body["max_gen_len"] = json!(m);
            }
            if let Some(t) = item.temperature() {
                body["temperature"] = json!(t);
            }
            body
        }
        ModelFamily::Mistral | ModelFamily::Generic => {
            let prompt = match ModelFamily::detect(model) {
                ModelFamily::Mistral => format!("<s>[INST] {} [/INST]", with_system_prefix(item)),
                _ => with_system_prefix(item),
            };
            let mut body = json!({ "prompt": prompt });
            if let Some(m) = item.max_tokens() {
                body["max_tokens"] = json!(m);
            }
            if let Some(t) = item.temperature() {
                body["temperature"] = json!(t);
            }
            body
        }
    }
}

fn invoke_path(model: &str) -> String {
    format!("/model/{}/invoke", urlencoding::encode(model))
}

/// Signed `InvokeModel` request, routed through the gateway when one is configured.
pub fn invoke_request(
    settings: &BedrockSettings,
    item: &BatchItem,
    model: &str,
    now: DateTime<Utc>,
) -> Result<HttpRequest> {
    let native_url = format!("{}{}", settings.runtime_url, invoke_path(model));
    let body = invoke_body(item, model);
    let signer = SigV4Signer::from_settings(settings, "bedrock");

    match &settings.gateway_url {
        Some(gateway) => {
            let url = format!(
                "{}/aws-bedrock/bedrock-runtime/{}{}",
                gateway,
                settings.region,
                invoke_path(model)
            );
            let mut req = HttpRequest::post_json(url, &body).header("accept", "application/json");
            signer.sign_for(&mut req, &native_url, now)?;
            if let Some(token) = &settings.gateway_token {
                req = req.header("cf-aig-authorization", format!("Bearer {}", token));
            }
            Ok(req)
        }
        None => {
            let mut req = HttpRequest::post_json(native_url, &body).header("accept", "application/json");
            signer.sign(&mut req, now)?;
            Ok(req)
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: BedrockConfig,
    transport: HttpTransport,
}

impl Inner {
    fn settings(&self) -> Result<BedrockSettings> {
        self.config
            .clone()
            .or(&current_settings().bedrock)
            .resolve(&process_env)
    }

    async fn invoke(
        &self,
        settings: &BedrockSettings,
        item: BatchItem,
        model: &str,
        batch_id: &str,
    ) -> Result<BatchResult> {
        let mode = OutputMode::for_schema(item.schema.as_ref());
        let req = invoke_request(settings, &item, model, Utc::now())?;
        let body = self.transport.send_json(req).await?;
        normalize::bedrock_invoke(&body, ModelFamily::detect(model), mode)
            .map(|n| n.into_result(format!("{}:{}", batch_id, item.id), item.id.clone()))
            .ok_or_else(|| Error::ItemFailure {
                custom_id: item.id,
                message: "model response contained no output".into(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct BedrockAdapter {
    inner: Arc<Inner>,
    local: LocalBatches,
    flex: BatchExecutor,
}

impl BedrockAdapter {
    pub fn new() -> Self {
        Self::with_config(BedrockConfig::default())
    }

    pub fn with_config(config: BedrockConfig) -> Self {
        Self::with_transport(config, HttpTransport::shared())
    }

    pub fn with_transport(config: BedrockConfig, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(Inner { config, transport }),
            local: LocalBatches::new(Provider::Bedrock, WINDOW, Duration::from_secs(1)),
            flex: BatchExecutor::windowed(FLEX_WINDOW),
        }
    }
}

impl Default for BedrockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchAdapter for BedrockAdapter {
    fn provider(&self) -> Provider {
        Provider::Bedrock
    }

    fn default_poll_config(&self) -> PollConfig {
        self.local.poll_config()
    }

    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission> {
        validate_items(&items)?;
        let settings = self.inner.settings()?;
        let model = options.model_or(DEFAULT_MODEL).to_string();
        let inner = self.inner.clone();
        let prefix = format!("bedrock_{}", uuid::Uuid::new_v4().simple());
        self.local
            .submit(items, &options, move |item| {
                let inner = inner.clone();
                let settings = settings.clone();
                let model = model.clone();
                let prefix = prefix.clone();
                async move { inner.invoke(&settings, item, &model, &prefix).await }
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
impl FlexAdapter for BedrockAdapter {
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
        run_flex(Provider::Bedrock, &self.flex, items, |item| {
            self.inner.invoke(&settings, item, model, "bedrock_flex")
        })
        .await
    }
}
