//! 适配器注册表 — 按名称查找批处理与 Flex 适配器
//!
//! Adapter registry. Decouples "which provider" from "how to call it": callers
//! look adapters up by name and talk to them through [`BatchAdapter`] and
//! [`FlexAdapter`].
//!
//! Registration overwrites silently; the last write for a name wins. Nothing
//! is registered at load time. Call [`initialize_adapters`] once at startup to
//! install the built-in adapters.
//!
//! ```
//! use ai_batch::registry;
//!
//! registry::initialize_adapters();
//! let adapter = registry::get_batch_adapter("memory").unwrap();
//! assert_eq!(adapter.provider().as_str(), "memory");
//! ```

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapters::{
    AnthropicBatchAdapter, BatchAdapter, BedrockAdapter, BedrockJobAdapter, CloudflareAdapter,
    FlexAdapter, GoogleAdapter, MemoryAdapter, OpenAiBatchAdapter,
};
use crate::{Error, Result};

/// What is registered under one name. Either tier may be absent.
#[derive(Debug, Clone)]
pub struct AdapterEntry {
    pub name: String,
    pub implementation: Option<Arc<dyn BatchAdapter>>,
    pub flex_implementation: Option<Arc<dyn FlexAdapter>>,
}

impl AdapterEntry {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            implementation: None,
            flex_implementation: None,
        }
    }
}

/// Name → adapter map. The process-wide instance sits behind [`register_batch_adapter`]
/// and friends; standalone values are useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    entries: BTreeMap<String, AdapterEntry>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in adapter.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.install_builtin();
        registry
    }

    pub fn register_batch(&mut self, name: &str, adapter: Arc<dyn BatchAdapter>) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| AdapterEntry::empty(name))
            .implementation = Some(adapter);
    }

    pub fn register_flex(&mut self, name: &str, adapter: Arc<dyn FlexAdapter>) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| AdapterEntry::empty(name))
            .flex_implementation = Some(adapter);
    }

    pub fn batch(&self, name: &str) -> Result<Arc<dyn BatchAdapter>> {
        self.entries
            .get(name)
            .and_then(|e| e.implementation.clone())
            .ok_or_else(|| not_found("batch adapter", name))
    }

    pub fn flex(&self, name: &str) -> Result<Arc<dyn FlexAdapter>> {
        self.entries
            .get(name)
            .and_then(|e| e.flex_implementation.clone())
            .ok_or_else(|| not_found("flex adapter", name))
    }

    pub fn entry(&self, name: &str) -> Option<&AdapterEntry> {
        self.entries.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn install_builtin(&mut self) {
        let openai = Arc::new(OpenAiBatchAdapter::new());
        let bedrock = Arc::new(BedrockAdapter::new());
        let google = Arc::new(GoogleAdapter::new());

        self.register_batch("openai", openai.clone());
        self.register_batch("anthropic", Arc::new(AnthropicBatchAdapter::new()));
        self.register_batch("bedrock", bedrock.clone());
        self.register_batch("bedrock-batch", Arc::new(BedrockJobAdapter::new()));
        self.register_batch("google", google.clone());
        self.register_batch("cloudflare", Arc::new(CloudflareAdapter::new()));
        self.register_batch("memory", Arc::new(MemoryAdapter::default()));

        self.register_flex("openai", openai);
        self.register_flex("bedrock", bedrock);
        self.register_flex("google", google);
    }
}

fn not_found(kind: &'static str, name: &str) -> Error {
    Error::NotFound {
        kind,
        id: name.to_string(),
    }
}

static GLOBAL: Lazy<ArcSwap<AdapterRegistry>> =
    Lazy::new(|| ArcSwap::from_pointee(AdapterRegistry::new()));

fn update(f: impl Fn(&mut AdapterRegistry)) {
    GLOBAL.rcu(|current| {
        let mut next = AdapterRegistry::clone(current);
        f(&mut next);
        next
    });
}

/// Snapshot of the process-wide registry.
pub fn global() -> Arc<AdapterRegistry> {
    GLOBAL.load_full()
}

pub fn register_batch_adapter(name: &str, adapter: Arc<dyn BatchAdapter>) {
    update(|r| r.register_batch(name, adapter.clone()));
    tracing::debug!(name, "batch adapter registered");
}

pub fn register_flex_adapter(name: &str, adapter: Arc<dyn FlexAdapter>) {
    update(|r| r.register_flex(name, adapter.clone()));
    tracing::debug!(name, "flex adapter registered");
}

pub fn get_batch_adapter(name: &str) -> Result<Arc<dyn BatchAdapter>> {
    GLOBAL.load().batch(name)
}

pub fn get_flex_adapter(name: &str) -> Result<Arc<dyn FlexAdapter>> {
    GLOBAL.load().flex(name)
}

pub fn adapter_entry(name: &str) -> Option<AdapterEntry> {
    GLOBAL.load().entry(name).cloned()
}

pub fn registered_adapters() -> Vec<String> {
    GLOBAL.load().names()
}

/// Install every built-in adapter into the process-wide registry.
///
/// Safe to call more than once; later calls replace the built-ins with fresh
/// instances and leave custom names untouched.
pub fn initialize_adapters() {
    update(AdapterRegistry::install_builtin);
    tracing::info!(adapters = GLOBAL.load().len(), "adapters initialized");
}
