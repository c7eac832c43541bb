//! 批处理适配器抽象层 — 通过 trait 统一各厂商的批处理提交、轮询、取消与结果获取
//!
//! Batch adapter abstraction. Every backend implements [`BatchAdapter`]:
//! submit a batch, poll its status, cancel it, fetch its results, and wait
//! for completion. Backends suited to medium-sized synchronous fan-out also
//! implement [`FlexAdapter`].
//!
//! Two execution styles sit behind the same contract:
//! - **Native batch APIs** (OpenAI, Anthropic, Bedrock batch inference) upload
//!   work to the provider and poll a provider-side job.
//! - **Concurrent adapters** (Bedrock runtime, Google, Cloudflare, memory) fan
//!   items out in fixed windows and keep job bookkeeping locally.

pub mod anthropic;
pub mod bedrock;
pub mod cloudflare;
pub mod google;
mod local;
pub mod memory;
pub mod openai;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::normalize::OutputMode;
use crate::structured::JsonModeConfig;
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, BatchStatus, Provider};
use crate::{Error, ErrorContext, Result};

pub use anthropic::AnthropicBatchAdapter;
pub use bedrock::{BedrockAdapter, BedrockJobAdapter};
pub use cloudflare::CloudflareAdapter;
pub use google::GoogleAdapter;
pub use memory::{MemoryAdapter, MemoryOptions};
pub use openai::OpenAiBatchAdapter;

/// Future resolving to the results of a batch once it is terminal.
pub type Completion = Pin<Box<dyn Future<Output = Result<Vec<BatchResult>>> + Send + 'static>>;

/// Outcome of [`BatchAdapter::submit`].
pub struct Submission {
    /// Snapshot taken at submit time.
    pub job: BatchJob,
    /// Resolves when the batch is terminal.
    ///
    /// Concurrent adapters start processing at submit time regardless of
    /// whether this future is polled. Native batch adapters poll the provider
    /// only while it is awaited.
    pub completion: Completion,
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

/// Polling policy for [`BatchAdapter::wait_for_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Status checks before giving up; `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Wall-clock budget; `None` is unbounded.
    pub deadline: Option<Duration>,
}

impl PollConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::every(Duration::from_secs(30))
    }
}

/// Uniform batch contract implemented by every provider adapter.
#[async_trait]
pub trait BatchAdapter: Send + Sync + fmt::Debug {
    fn provider(&self) -> Provider;

    fn default_poll_config(&self) -> PollConfig;

    /// Whether a batch ending `failed`, `expired` or `cancelled` is unrecoverable
    /// for [`wait_for_completion`](Self::wait_for_completion).
    fn terminal_failure_is_error(&self) -> bool {
        false
    }

    /// Submit a batch. `items` must be non-empty with unique ids.
    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission>;

    async fn get_status(&self, batch_id: &str) -> Result<BatchJob>;

    /// Best-effort cancellation.
    async fn cancel(&self, batch_id: &str) -> Result<()>;

    /// Results of a terminal batch, one per submitted item.
    async fn get_results(&self, batch_id: &str) -> Result<Vec<BatchResult>>;

    async fn wait_for_completion(
        &self,
        batch_id: &str,
        poll: &PollConfig,
    ) -> Result<Vec<BatchResult>> {
        let job = poll_until_terminal(self, batch_id, poll).await?;
        if self.terminal_failure_is_error() && job.status != BatchStatus::Completed {
            return Err(Error::batch_state(
                batch_id,
                format!("batch ended with status {}", job.status),
            ));
        }
        self.get_results(batch_id).await
    }
}

/// Synchronous bounded-concurrency tier: no job, no polling.
#[async_trait]
pub trait FlexAdapter: Send + Sync + fmt::Debug {
    /// Items in flight at once.
    fn flex_window(&self) -> usize;

    /// Process every item and return once all have settled.
    async fn submit_flex(
        &self,
        items: Vec<BatchItem>,
        options: BatchQueueOptions,
    ) -> Result<Vec<BatchResult>>;
}

/// Poll `get_status` at a fixed interval until the batch is terminal.
pub async fn poll_until_terminal<A: BatchAdapter + ?Sized>(
    adapter: &A,
    batch_id: &str,
    poll: &PollConfig,
) -> Result<BatchJob> {
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        let job = adapter.get_status(batch_id).await?;
        attempts += 1;
        tracing::debug!(
            provider = %adapter.provider(),
            batch_id,
            status = %job.status,
            completed = job.completed_items,
            failed = job.failed_items,
            total = job.total_items,
            attempt = attempts,
            "polled batch status"
        );
        if job.is_terminal() {
            return Ok(job);
        }

        let waited = started.elapsed();
        let out_of_attempts = poll.max_attempts.map(|max| attempts >= max).unwrap_or(false);
        let past_deadline = poll.deadline.map(|d| waited >= d).unwrap_or(false);
        if out_of_attempts || past_deadline {
            return Err(Error::Timeout {
                batch_id: batch_id.to_string(),
                waited,
            });
        }

        let sleep = match poll.deadline {
            Some(d) => poll.interval.min(d.saturating_sub(waited)),
            None => poll.interval,
        };
        tokio::time::sleep(sleep).await;
    }
}

/// Reject empty batches and duplicate item ids.
pub fn validate_items(items: &[BatchItem]) -> Result<()> {
    if items.is_empty() {
        return Err(Error::validation_with_context(
            "batch must contain at least one item",
            ErrorContext::new().with_field_path("items"),
        ));
    }
    let mut seen = HashSet::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if !seen.insert(item.id.as_str()) {
            return Err(Error::validation_with_context(
                format!("duplicate item id: {}", item.id),
                ErrorContext::new()
                    .with_field_path(format!("items[{}].id", i))
                    .with_details("item ids must be unique within a batch"),
            ));
        }
    }
    Ok(())
}

/// Prompt text for backends without native structured output.
pub(crate) fn prompt_with_schema(item: &BatchItem) -> String {
    match &item.schema {
        Some(schema) => format!(
            "{}\n\nRespond only with JSON matching this schema:\n{}",
            item.prompt,
            JsonModeConfig::from_simple(schema).object_schema()
        ),
        None => item.prompt.clone(),
    }
}

pub(crate) fn new_batch_id(provider: Provider) -> String {
    format!("{}_batch_{}", provider, uuid::Uuid::new_v4().simple())
}

/// Ids, decode modes and webhook of a batch submitted by this process.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemIndex {
    pub ids: Vec<String>,
    pub modes: HashMap<String, OutputMode>,
    pub webhook_url: Option<String>,
}

impl ItemIndex {
    pub fn new(items: &[BatchItem], webhook_url: Option<String>) -> Self {
        Self {
            ids: items.iter().map(|i| i.id.clone()).collect(),
            modes: items
                .iter()
                .map(|i| (i.id.clone(), OutputMode::for_schema(i.schema.as_ref())))
                .collect(),
            webhook_url,
        }
    }
}

/// Remote batches submitted through one adapter instance.
#[derive(Debug, Default)]
pub(crate) struct SubmittedBatches {
    batches: RwLock<HashMap<String, ItemIndex>>,
}

impl SubmittedBatches {
    pub async fn remember(&self, batch_id: &str, index: ItemIndex) {
        self.batches.write().await.insert(batch_id.to_string(), index);
    }

    /// Index for `batch_id`; empty when the batch came from elsewhere.
    pub async fn get(&self, batch_id: &str) -> ItemIndex {
        self.batches
            .read()
            .await
            .get(batch_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Completion for native batch adapters: wait, then notify the webhook.
pub(crate) fn remote_completion<A>(adapter: A, batch_id: String, webhook_url: Option<String>) -> Completion
where
    A: BatchAdapter + 'static,
{
    Box::pin(async move {
        let poll = adapter.default_poll_config();
        let outcome = adapter.wait_for_completion(&batch_id, &poll).await;
        if let Some(url) = webhook_url {
            match adapter.get_status(&batch_id).await {
                Ok(job) => crate::webhook::notify(&url, &job).await,
                Err(e) => tracing::warn!(batch_id = %batch_id, error = %e, "skipping webhook"),
            }
        }
        outcome
    })
}
