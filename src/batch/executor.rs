//! Batch executor.

use futures::future::join_all;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::types::{BatchItem, BatchResult};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    Sequential,
    /// Fixed windows of `window` items; window N+1 starts only after every
    /// member of window N has settled.
    Windowed { window: usize },
}

impl Default for BatchStrategy {
    fn default() -> Self {
        BatchStrategy::Windowed { window: 5 }
    }
}

/// Summary of an executor run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub results: Vec<BatchResult>,
    pub execution_time: Duration,
}

impl ExecutionReport {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_completed()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Runs per-item work with bounded concurrency and per-item failure isolation.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    strategy: BatchStrategy,
}

impl BatchExecutor {
    pub fn new(strategy: BatchStrategy) -> Self {
        Self { strategy }
    }

    pub fn windowed(window: usize) -> Self {
        Self::new(BatchStrategy::Windowed {
            window: window.max(1),
        })
    }

    pub fn window(&self) -> usize {
        match self.strategy {
            BatchStrategy::Sequential => 1,
            BatchStrategy::Windowed { window } => window.max(1),
        }
    }

    /// Split items into the windows this executor would run.
    pub fn windows(&self, items: Vec<BatchItem>) -> Vec<Vec<BatchItem>> {
        let window = self.window();
        let mut out = Vec::with_capacity(items.len().div_ceil(window));
        let mut iter = items.into_iter().peekable();
        while iter.peek().is_some() {
            out.push(iter.by_ref().take(window).collect());
        }
        out
    }

    /// Run one window concurrently and wait for every member to settle.
    ///
    /// An `Err` from `process` becomes a failed [`BatchResult`] for that item;
    /// it never aborts its siblings.
    pub async fn run_window<F, Fut>(&self, window: Vec<BatchItem>, process: &F) -> Vec<BatchResult>
    where
        F: Fn(BatchItem) -> Fut,
        Fut: Future<Output = Result<BatchResult>>,
    {
        let settled = join_all(window.into_iter().map(|item| {
            let custom_id = item.id.clone();
            let fut = process(item);
            async move { (custom_id, fut.await) }
        }))
        .await;

        settled
            .into_iter()
            .map(|(custom_id, outcome)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::debug!(custom_id = %custom_id, error = %e, "item failed");
                    BatchResult::failed(custom_id.clone(), custom_id, e.to_string())
                }
            })
            .collect()
    }

    /// Run all items window by window.
    pub async fn execute<F, Fut>(&self, items: Vec<BatchItem>, process: F) -> ExecutionReport
    where
        F: Fn(BatchItem) -> Fut,
        Fut: Future<Output = Result<BatchResult>>,
    {
        let start = Instant::now();
        let mut results = Vec::with_capacity(items.len());
        for window in self.windows(items) {
            results.extend(self.run_window(window, &process).await);
        }
        ExecutionReport {
            results,
            execution_time: start.elapsed(),
        }
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(BatchStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn items(n: usize) -> Vec<BatchItem> {
        (0..n).map(|i| BatchItem::new(format!("item-{}", i), "p")).collect()
    }

    #[test]
    fn windows_split_evenly_with_remainder() {
        let exec = BatchExecutor::windowed(3);
        let w = exec.windows(items(7));
        assert_eq!(w.iter().map(|w| w.len()).collect::<Vec<_>>(), vec![3, 3, 1]);
        assert_eq!(w[2][0].id, "item-6");
    }

    #[test]
    fn sequential_is_window_of_one() {
        assert_eq!(BatchExecutor::new(BatchStrategy::Sequential).window(), 1);
        assert_eq!(BatchExecutor::windowed(0).window(), 1);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_window() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let exec = BatchExecutor::windowed(4);

        let report = exec
            .execute(items(11), |item| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(BatchResult::completed(item.id.clone(), item.id, serde_json::json!("ok"), None))
                }
            })
            .await;

        assert_eq!(report.results.len(), 11);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let exec = BatchExecutor::windowed(2);
        let report = exec
            .execute(items(4), |item| async move {
                if item.id == "item-1" {
                    Err(Error::ItemFailure {
                        custom_id: item.id,
                        message: "boom".into(),
                    })
                } else {
                    Ok(BatchResult::completed(item.id.clone(), item.id, serde_json::json!(1), None))
                }
            })
            .await;

        assert_eq!(report.success_count(), 3);
        assert_eq!(report.failure_count(), 1);
        let failed = report.results.iter().find(|r| !r.is_completed()).unwrap();
        assert_eq!(failed.custom_id, "item-1");
        assert!(failed.error.as_deref().unwrap().contains("boom"));
    }
}
