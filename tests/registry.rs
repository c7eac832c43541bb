//! Process-wide adapter registry

use ai_batch::adapters::{GoogleAdapter, MemoryAdapter, MemoryOptions};
use ai_batch::registry::{adapter_entry, registered_adapters};
use ai_batch::{
    get_batch_adapter, get_flex_adapter, initialize_adapters, register_batch_adapter,
    register_flex_adapter, BatchItem, BatchQueueOptions, ErrorKind, Provider,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn builtins_are_installed_on_request() {
    initialize_adapters();
    for name in ["openai", "anthropic", "bedrock", "bedrock-batch", "google", "cloudflare", "memory"] {
        assert!(get_batch_adapter(name).is_ok(), "{name}");
    }
    for name in ["openai", "bedrock", "google"] {
        assert!(get_flex_adapter(name).is_ok(), "{name}");
    }
    assert_eq!(get_flex_adapter("memory").unwrap_err().kind(), ErrorKind::BatchState);
    assert!(get_batch_adapter("nonexistent").is_err());

    initialize_adapters();
    let names = registered_adapters();
    assert_eq!(names.iter().filter(|n| n.as_str() == "openai").count(), 1);
    assert!(get_batch_adapter("openai").is_ok());
}

#[tokio::test]
async fn last_registration_wins() {
    let slow = MemoryAdapter::new(MemoryOptions::default().with_latency(Duration::from_secs(60)));
    let fast = MemoryAdapter::new(MemoryOptions::default().with_latency(Duration::ZERO));
    register_batch_adapter("x", Arc::new(slow));
    register_batch_adapter("x", Arc::new(fast));

    let adapter = get_batch_adapter("x").unwrap();
    let submission = adapter
        .submit(vec![BatchItem::new("only", "hi")], BatchQueueOptions::new())
        .await
        .unwrap();
    let results = tokio::time::timeout(Duration::from_secs(5), submission.completion)
        .await
        .expect("the fast adapter should have been used")
        .unwrap();
    assert_eq!(results[0].custom_id, "only");
}

#[test]
fn flex_registration_keeps_batch_entry() {
    register_batch_adapter("combo", Arc::new(MemoryAdapter::default()));
    register_flex_adapter("combo", Arc::new(GoogleAdapter::new()));

    let entry = adapter_entry("combo").unwrap();
    assert_eq!(entry.name, "combo");
    assert_eq!(
        entry.implementation.map(|a| a.provider()),
        Some(Provider::Memory)
    );
    assert_eq!(entry.flex_implementation.map(|f| f.flex_window()), Some(10));
}
