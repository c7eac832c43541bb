//! 类型系统模块：批处理请求、作业与结果的统一数据模型。
//!
//! # Types Module
//!
//! Provider-neutral data model shared by every adapter.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BatchItem`] | One prompt with optional schema and per-item options |
//! | [`BatchQueueOptions`] | Submission-wide model, webhook and metadata |
//! | [`BatchJob`] | Adapter-owned snapshot of a batch |
//! | [`BatchStatus`] | Common lifecycle vocabulary |
//! | [`BatchResult`] | Normalized per-item outcome |
//! | [`Provider`] | Backend tag |
//!
//! ## Example
//!
//! ```rust
//! use ai_batch::types::{BatchItem, BatchQueueOptions};
//!
//! let items = vec![
//!     BatchItem::new("a", "Summarize the release notes").with_max_tokens(256),
//!     BatchItem::new("b", "Translate to French: hello"),
//! ];
//! let options = BatchQueueOptions::new().with_model("gpt-4o-mini");
//! assert_eq!(items.len(), 2);
//! assert_eq!(options.model.as_deref(), Some("gpt-4o-mini"));
//! ```

pub mod batch;
pub mod provider;

pub use batch::{
    BatchItem, BatchItemOptions, BatchJob, BatchQueueOptions, BatchResult, BatchStatus,
    ResultStatus, Usage,
};
pub use provider::Provider;
