//! In-process adapter for tests and local development.
//!
//! Items are "answered" after an optional simulated latency with a fixed stub
//! usage of 100 prompt + 200 completion tokens. Items with a schema receive a
//! placeholder value shaped like the schema.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::local::LocalBatches;
use super::{BatchAdapter, PollConfig, Submission};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, Provider, Usage};
use crate::{Error, Result};

pub const STUB_PROMPT_TOKENS: u64 = 100;
pub const STUB_COMPLETION_TOKENS: u64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOptions {
    /// Probability in `[0, 1]` that an item fails.
    pub failure_rate: f64,
    /// Simulated per-item latency.
    pub latency: Duration,
    pub window: usize,
    /// Item ids that always fail.
    pub failing_ids: HashSet<String>,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::from_millis(10),
            window: 10,
            failing_ids: HashSet::new(),
        }
    }
}

impl MemoryOptions {
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_failing_item(mut self, id: impl Into<String>) -> Self {
        self.failing_ids.insert(id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    options: Arc<MemoryOptions>,
    local: LocalBatches,
}

impl MemoryAdapter {
    pub fn new(options: MemoryOptions) -> Self {
        let local = LocalBatches::new(Provider::Memory, options.window, Duration::from_millis(100));
        Self {
            options: Arc::new(options),
            local,
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new(MemoryOptions::default())
    }
}

async fn answer(options: Arc<MemoryOptions>, batch_id: String, item: BatchItem) -> Result<BatchResult> {
    if !options.latency.is_zero() {
        tokio::time::sleep(options.latency).await;
    }
    let unlucky = options.failure_rate > 0.0 && rand::random::<f64>() < options.failure_rate;
    if unlucky || options.failing_ids.contains(&item.id) {
        return Err(Error::ItemFailure {
            custom_id: item.id,
            message: "simulated failure".into(),
        });
    }

    let result = match &item.schema {
        Some(schema) => schema.sample_value(),
        None => Value::String(format!("Mock response for: {}", item.prompt)),
    };
    Ok(BatchResult::completed(
        format!("{}:{}", batch_id, item.id),
        item.id,
        result,
        Some(Usage::new(STUB_PROMPT_TOKENS, STUB_COMPLETION_TOKENS)),
    ))
}

#[async_trait]
impl BatchAdapter for MemoryAdapter {
    fn provider(&self) -> Provider {
        Provider::Memory
    }

    fn default_poll_config(&self) -> PollConfig {
        self.local.poll_config()
    }

    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission> {
        let opts = self.options.clone();
        let prefix = format!("mem_{}", uuid::Uuid::new_v4().simple());
        self.local
            .submit(items, &options, move |item| answer(opts.clone(), prefix.clone(), item))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::structured::SimpleSchema;
    use crate::types::BatchStatus;
    use serde_json::json;

    fn fast() -> MemoryOptions {
        MemoryOptions::default().with_latency(Duration::ZERO)
    }

    #[tokio::test]
    async fn stub_usage_and_schema_samples() {
        let adapter = MemoryAdapter::new(fast());
        let items = vec![
            BatchItem::new("a", "hi"),
            BatchItem::new("b", "who").with_schema(SimpleSchema::object([("name", SimpleSchema::string())])),
        ];
        let sub = adapter.submit(items, BatchQueueOptions::default()).await.unwrap();
        assert_eq!(sub.job.total_items, 2);
        let mut results = sub.completion.await.unwrap();
        results.sort_by(|x, y| x.custom_id.cmp(&y.custom_id));
        assert_eq!(results[0].result, Some(json!("Mock response for: hi")));
        assert_eq!(results[1].result, Some(json!({"name": "mock"})));
        assert!(results.iter().all(|r| r.usage.unwrap().total_tokens == 300));
    }

    #[tokio::test]
    async fn failing_item_marks_job_failed() {
        let adapter = MemoryAdapter::new(fast().with_failing_item("b"));
        let sub = adapter
            .submit(
                vec![BatchItem::new("a", "1"), BatchItem::new("b", "2"), BatchItem::new("c", "3")],
                BatchQueueOptions::default(),
            )
            .await
            .unwrap();
        let id = sub.job.id.clone();
        let results = sub.completion.await.unwrap();
        assert_eq!(results.iter().filter(|r| r.is_completed()).count(), 2);

        let job = adapter.get_status(&id).await.unwrap();
        assert_eq!(job.status, BatchStatus::Failed);
        assert_eq!((job.completed_items, job.failed_items), (2, 1));
    }

    #[tokio::test]
    async fn full_failure_rate() {
        let adapter = MemoryAdapter::new(fast().with_failure_rate(1.0));
        let sub = adapter
            .submit(vec![BatchItem::new("a", "x")], BatchQueueOptions::default())
            .await
            .unwrap();
        let results = sub.completion.await.unwrap();
        assert_eq!(results[0].error.as_deref(), Some("Item a failed: simulated failure"));
    }

    #[tokio::test]
    async fn unknown_batch_and_validation() {
        let adapter = MemoryAdapter::default();
        assert_eq!(adapter.get_status("nope").await.unwrap_err().kind(), ErrorKind::BatchState);
        let err = adapter.submit(vec![], BatchQueueOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
