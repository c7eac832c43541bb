//! # ai-batch
//!
//! 多厂商大模型批处理调度核心：统一提交、轮询、取消与结果归一化。
//!
//! Provider-agnostic batch dispatch for large language model prompts. Submit
//! a list of prompts once and get back one normalized result per prompt,
//! whether the backend has a native batch API or is driven with bounded
//! concurrent calls.
//!
//! ## Core Ideas
//!
//! - **One contract**: every backend implements [`BatchAdapter`]; the optional
//!   [`FlexAdapter`] tier runs medium-sized batches synchronously.
//! - **Name-based dispatch**: adapters are looked up by name in the
//!   [`registry`]; call [`registry::initialize_adapters`] once at startup.
//! - **Exactly one result per item**: results are keyed by `custom_id` and
//!   reconciled against the submitted ids.
//! - **Structured output**: a compact [`structured::SimpleSchema`] becomes each
//!   provider's native JSON-mode request.
//!
//! ## Quick Start
//!
//! ```rust
//! use ai_batch::{registry, BatchItem, BatchQueueOptions};
//!
//! #[tokio::main]
//! async fn main() -> ai_batch::Result<()> {
//!     registry::initialize_adapters();
//!     let adapter = registry::get_batch_adapter("memory")?;
//!
//!     let items = vec![BatchItem::new("a", "hi"), BatchItem::new("b", "bye")];
//!     let submission = adapter.submit(items, BatchQueueOptions::new()).await?;
//!     let results = submission.completion.await?;
//!
//!     assert_eq!(results.len(), 2);
//!     assert_eq!(results[0].custom_id, "a");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`registry`] | Name → adapter lookup |
//! | [`adapters`] | Adapter contract and provider implementations |
//! | [`batch`] | Windowed executor and in-process job store |
//! | [`normalize`] | Provider envelopes → [`BatchResult`] |
//! | [`structured`] | Schema bridge and lenient JSON decoding |
//! | [`config`] | Credentials and endpoints per provider |
//! | [`signing`] | AWS SigV4 for Bedrock and S3 |
//! | [`transport`] | HTTP request model, client and JSONL |
//! | [`types`] | Items, jobs, results, statuses |
//! | [`webhook`] | Completion notifications |

pub mod adapters;
pub mod batch;
pub mod config;
pub mod normalize;
pub mod registry;
pub mod signing;
pub mod structured;
pub mod transport;
pub mod types;
pub mod webhook;

pub use adapters::{BatchAdapter, Completion, FlexAdapter, PollConfig, Submission};
pub use registry::{
    get_batch_adapter, get_flex_adapter, initialize_adapters, register_batch_adapter,
    register_flex_adapter,
};
pub use types::{
    BatchItem, BatchJob, BatchQueueOptions, BatchResult, BatchStatus, Provider, ResultStatus,
    Usage,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind};
