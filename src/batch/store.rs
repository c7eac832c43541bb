//! In-memory bookkeeping for adapters that synthesize jobs locally.
//!
//! Each adapter owns its own [`JobStore`]; nothing is shared across adapters
//! and nothing survives a process restart.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{BatchItem, BatchJob, BatchResult, BatchStatus};
use crate::{Error, Result};

pub const CANCELLED_MESSAGE: &str = "batch cancelled";

#[derive(Debug)]
struct LocalJob {
    job: BatchJob,
    expected_ids: Vec<String>,
    results: Vec<BatchResult>,
}

impl LocalJob {
    fn recorded_ids(&self) -> HashSet<&str> {
        self.results.iter().map(|r| r.custom_id.as_str()).collect()
    }

    fn push(&mut self, result: BatchResult) {
        if result.is_completed() {
            self.job.completed_items += 1;
        } else {
            self.job.failed_items += 1;
        }
        self.results.push(result);
    }

    fn fail_missing(&mut self, batch_id: &str, message: &str) {
        let missing: Vec<String> = {
            let recorded = self.recorded_ids();
            self.expected_ids
                .iter()
                .filter(|id| !recorded.contains(id.as_str()))
                .cloned()
                .collect()
        };
        for id in missing {
            self.push(BatchResult::failed(format!("{}:{}", batch_id, id), id, message));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, LocalJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: BatchJob, items: &[BatchItem]) {
        let expected_ids = items.iter().map(|i| i.id.clone()).collect();
        self.jobs.write().await.insert(
            job.id.clone(),
            LocalJob {
                job,
                expected_ids,
                results: Vec::new(),
            },
        );
    }

    pub async fn snapshot(&self, batch_id: &str) -> Result<BatchJob> {
        self.jobs
            .read()
            .await
            .get(batch_id)
            .map(|j| j.job.clone())
            .ok_or_else(|| Error::batch_not_found(batch_id))
    }

    pub async fn contains(&self, batch_id: &str) -> bool {
        self.jobs.read().await.contains_key(batch_id)
    }

    pub async fn mark_started(&self, batch_id: &str) {
        if let Some(j) = self.jobs.write().await.get_mut(batch_id) {
            if j.job.status == BatchStatus::Pending {
                j.job.status = BatchStatus::InProgress;
                j.job.started_at = Some(Utc::now());
            }
        }
    }

    pub async fn is_cancelled(&self, batch_id: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(batch_id)
            .map(|j| j.job.status == BatchStatus::Cancelled)
            .unwrap_or(false)
    }

    /// Record settled results. Results arriving after cancellation are discarded.
    pub async fn record(&self, batch_id: &str, results: Vec<BatchResult>) {
        let mut jobs = self.jobs.write().await;
        let Some(j) = jobs.get_mut(batch_id) else {
            return;
        };
        if j.job.status == BatchStatus::Cancelled {
            tracing::debug!(batch_id, discarded = results.len(), "discarding results of cancelled batch");
            return;
        }
        for r in results {
            j.push(r);
        }
        tracing::debug!(
            batch_id,
            completed = j.job.completed_items,
            failed = j.job.failed_items,
            total = j.job.total_items,
            "window settled"
        );
    }

    /// Move a processed job to its terminal status: `failed` if any item failed.
    pub async fn finish(&self, batch_id: &str) -> Result<BatchJob> {
        let mut jobs = self.jobs.write().await;
        let j = jobs
            .get_mut(batch_id)
            .ok_or_else(|| Error::batch_not_found(batch_id))?;
        if !j.job.status.is_terminal() {
            j.job.status = if j.job.failed_items > 0 {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            j.job.completed_at = Some(Utc::now());
        }
        Ok(j.job.clone())
    }

    /// Cancel a non-terminal job, failing every item without a result yet.
    pub async fn cancel(&self, batch_id: &str) -> Result<BatchStatus> {
        let mut jobs = self.jobs.write().await;
        let j = jobs
            .get_mut(batch_id)
            .ok_or_else(|| Error::batch_not_found(batch_id))?;
        if j.job.status.is_terminal() {
            return Ok(j.job.status);
        }
        j.fail_missing(batch_id, CANCELLED_MESSAGE);
        j.job.status = BatchStatus::Cancelled;
        j.job.completed_at = Some(Utc::now());
        Ok(BatchStatus::Cancelled)
    }

    /// Fail a job whose processing stopped abnormally. Items without a result
    /// get `message`; a job already terminal is left as it is.
    pub async fn abort(&self, batch_id: &str, message: &str) -> Result<BatchJob> {
        let mut jobs = self.jobs.write().await;
        let j = jobs
            .get_mut(batch_id)
            .ok_or_else(|| Error::batch_not_found(batch_id))?;
        if !j.job.status.is_terminal() {
            j.fail_missing(batch_id, message);
            j.job.status = BatchStatus::Failed;
            j.job.completed_at = Some(Utc::now());
        }
        Ok(j.job.clone())
    }

    pub async fn results(&self, batch_id: &str) -> Result<Vec<BatchResult>> {
        let jobs = self.jobs.read().await;
        let j = jobs
            .get(batch_id)
            .ok_or_else(|| Error::batch_not_found(batch_id))?;
        if !j.job.status.is_terminal() {
            return Err(Error::not_complete(batch_id, j.job.status));
        }
        Ok(j.results.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Provider;
    use serde_json::json;

    fn job(id: &str, n: usize) -> (BatchJob, Vec<BatchItem>) {
        let items = (0..n).map(|i| BatchItem::new(format!("i{}", i), "p")).collect();
        (BatchJob::new(id, Provider::Memory, n), items)
    }

    #[tokio::test]
    async fn lifecycle_completed() {
        let store = JobStore::new();
        let (j, items) = job("b1", 2);
        store.insert(j, &items).await;

        assert_eq!(store.snapshot("b1").await.unwrap().status, BatchStatus::Pending);
        let err = store.results("b1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchState);

        store.mark_started("b1").await;
        store
            .record(
                "b1",
                vec![
                    BatchResult::completed("r0", "i0", json!("a"), None),
                    BatchResult::completed("r1", "i1", json!("b"), None),
                ],
            )
            .await;
        let done = store.finish("b1").await.unwrap();
        assert_eq!(done.status, BatchStatus::Completed);
        assert_eq!(done.completed_items, 2);
        assert!(done.started_at.is_some());
        assert_eq!(store.results("b1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn any_failure_marks_failed() {
        let store = JobStore::new();
        let (j, items) = job("b2", 2);
        store.insert(j, &items).await;
        store
            .record(
                "b2",
                vec![
                    BatchResult::completed("r0", "i0", json!("a"), None),
                    BatchResult::failed("r1", "i1", "nope"),
                ],
            )
            .await;
        let done = store.finish("b2").await.unwrap();
        assert_eq!(done.status, BatchStatus::Failed);
        assert_eq!((done.completed_items, done.failed_items), (1, 1));
    }

    #[tokio::test]
    async fn cancel_fills_missing_and_discards_late_results() {
        let store = JobStore::new();
        let (j, items) = job("b3", 3);
        store.insert(j, &items).await;
        store
            .record("b3", vec![BatchResult::completed("r0", "i0", json!("a"), None)])
            .await;

        assert_eq!(store.cancel("b3").await.unwrap(), BatchStatus::Cancelled);
        assert!(store.is_cancelled("b3").await);

        store
            .record("b3", vec![BatchResult::completed("r1", "i1", json!("late"), None)])
            .await;
        let done = store.finish("b3").await.unwrap();
        assert_eq!(done.status, BatchStatus::Cancelled);

        let results = store.results("b3").await.unwrap();
        let mut ids: Vec<_> = results.iter().map(|r| r.custom_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["i0", "i1", "i2"]);
        let late = results.iter().find(|r| r.custom_id == "i1").unwrap();
        assert_eq!(late.error.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[tokio::test]
    async fn abort_fails_the_remaining_items() {
        let store = JobStore::new();
        let (j, items) = job("b4", 3);
        store.insert(j, &items).await;
        store.mark_started("b4").await;
        store
            .record("b4", vec![BatchResult::completed("r0", "i0", json!("a"), None)])
            .await;

        let job = store.abort("b4", "worker stopped").await.unwrap();
        assert_eq!(job.status, BatchStatus::Failed);
        assert_eq!((job.completed_items, job.failed_items), (1, 2));
        let results = store.results("b4").await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].error.as_deref(), Some("worker stopped"));

        // a finished job keeps its status
        assert_eq!(store.abort("b4", "again").await.unwrap().failed_items, 2);
    }

    #[tokio::test]
    async fn unknown_batch() {
        let store = JobStore::new();
        assert_eq!(store.snapshot("nope").await.unwrap_err().kind(), ErrorKind::BatchState);
        assert!(store.cancel("nope").await.is_err());
        assert!(!store.contains("nope").await);
    }
}
