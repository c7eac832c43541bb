//! Shared machinery for adapters without a native batch API.

use std::future::Future;
use std::time::Duration;

use super::{new_batch_id, validate_items, Completion, PollConfig, Submission};
use crate::batch::{BatchExecutor, JobStore};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, Provider};
use crate::{Error, Result};

/// Local job bookkeeping plus windowed execution for one adapter.
#[derive(Debug, Clone)]
pub(crate) struct LocalBatches {
    provider: Provider,
    executor: BatchExecutor,
    store: JobStore,
    poll_interval: Duration,
}

impl LocalBatches {
    pub fn new(provider: Provider, window: usize, poll_interval: Duration) -> Self {
        Self {
            provider,
            executor: BatchExecutor::windowed(window),
            store: JobStore::new(),
            poll_interval,
        }
    }

    pub fn window(&self) -> usize {
        self.executor.window()
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::every(self.poll_interval)
    }

    /// Register a job and start processing it in the background.
    pub async fn submit<F, Fut>(
        &self,
        items: Vec<BatchItem>,
        options: &BatchQueueOptions,
        process: F,
    ) -> Result<Submission>
    where
        F: Fn(BatchItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BatchResult>> + Send + 'static,
    {
        validate_items(&items)?;
        let batch_id = new_batch_id(self.provider);
        let job = BatchJob::new(&batch_id, self.provider, items.len())
            .with_webhook_url(options.webhook_url.clone());
        self.store.insert(job.clone(), &items).await;
        tracing::info!(
            provider = %self.provider,
            batch_id = %batch_id,
            items = items.len(),
            window = self.executor.window(),
            "batch submitted"
        );

        let store = self.store.clone();
        let executor = self.executor.clone();
        let id = batch_id.clone();
        let worker = tokio::spawn(async move {
            store.mark_started(&id).await;
            for window in executor.windows(items) {
                if store.is_cancelled(&id).await {
                    tracing::debug!(batch_id = %id, "batch cancelled; skipping remaining windows");
                    break;
                }
                let results = executor.run_window(window, &process).await;
                store.record(&id, results).await;
            }
            let job = store.finish(&id).await?;
            tracing::info!(
                batch_id = %id,
                status = %job.status,
                completed = job.completed_items,
                failed = job.failed_items,
                "batch finished"
            );
            if let Some(url) = &job.webhook_url {
                crate::webhook::notify(url, &job).await;
            }
            store.results(&id).await
        });

        // A panicking worker must still leave the job terminal for pollers.
        let store = self.store.clone();
        let id = batch_id.clone();
        let supervisor = tokio::spawn(async move {
            match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = format!("processing task failed: {}", e);
                    tracing::error!(batch_id = %id, error = %e, "batch processing task stopped");
                    store.abort(&id, &message).await?;
                    Err(Error::batch_state(id, message))
                }
            }
        });

        let completion: Completion = Box::pin(async move {
            supervisor
                .await
                .map_err(|e| Error::batch_state(batch_id, format!("processing task failed: {}", e)))?
        });
        Ok(Submission { job, completion })
    }

    pub async fn status(&self, batch_id: &str) -> Result<BatchJob> {
        self.store.snapshot(batch_id).await
    }

    pub async fn cancel(&self, batch_id: &str) -> Result<()> {
        let status = self.store.cancel(batch_id).await?;
        tracing::info!(provider = %self.provider, batch_id, status = %status, "cancel requested");
        Ok(())
    }

    pub async fn results(&self, batch_id: &str) -> Result<Vec<BatchResult>> {
        self.store.results(batch_id).await
    }
}

/// Run items to completion without a job record.
pub(crate) async fn run_flex<F, Fut>(
    provider: Provider,
    executor: &BatchExecutor,
    items: Vec<BatchItem>,
    process: F,
) -> Result<Vec<BatchResult>>
where
    F: Fn(BatchItem) -> Fut,
    Fut: Future<Output = Result<BatchResult>>,
{
    validate_items(&items)?;
    let report = executor.execute(items, process).await;
    tracing::info!(
        provider = %provider,
        succeeded = report.success_count(),
        failed = report.failure_count(),
        elapsed_ms = report.execution_time.as_millis() as u64,
        "flex batch finished"
    );
    Ok(report.results)
}
