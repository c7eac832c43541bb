//! 批处理执行模块：固定窗口并发执行与本地作业簿记。
//!
//! # Batch Execution
//!
//! Machinery for adapters whose provider has no native batch API:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchExecutor`] | Runs items in fixed-size windows with per-item failure isolation |
//! | [`BatchStrategy`] | Sequential or windowed execution |
//! | [`JobStore`] | Adapter-private job records, counts and accumulated results |
//!
//! Windows are all-or-nothing: window N+1 does not start until every member
//! of window N has settled. This bounds the peak outbound request rate at the
//! cost of idle slots when latencies vary.
//!
//! ## Example
//!
//! ```rust
//! use ai_batch::batch::BatchExecutor;
//! use ai_batch::types::{BatchItem, BatchResult};
//!
//! # tokio_test::block_on(async {
//! let exec = BatchExecutor::windowed(2);
//! let items = vec![BatchItem::new("a", "x"), BatchItem::new("b", "y"), BatchItem::new("c", "z")];
//! let report = exec
//!     .execute(items, |item| async move {
//!         Ok(BatchResult::completed(item.id.clone(), item.id, serde_json::json!(item.prompt), None))
//!     })
//!     .await;
//! assert_eq!(report.success_count(), 3);
//! # });
//! ```

mod executor;
mod store;

pub use executor::{BatchExecutor, BatchStrategy, ExecutionReport};
pub use store::{JobStore, CANCELLED_MESSAGE};
