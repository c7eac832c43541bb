//! Anthropic Message Batches flow against a mock server

mod common;

use ai_batch::adapters::AnthropicBatchAdapter;
use ai_batch::config::AnthropicConfig;
use ai_batch::structured::SimpleSchema;
use ai_batch::{BatchAdapter, BatchItem, BatchQueueOptions, BatchStatus, ErrorKind, PollConfig};
use common::{json_mock, jsonl_mock};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn adapter(server: &mockito::ServerGuard) -> AnthropicBatchAdapter {
    AnthropicBatchAdapter::with_transport(
        AnthropicConfig::default()
            .with_api_key("sk-ant-test")
            .with_base_url(server.url()),
        common::transport(),
    )
}

fn batch(status: &str, cancel_initiated: bool, results_url: Option<String>) -> serde_json::Value {
    json!({
        "id": "msgbatch_01",
        "type": "message_batch",
        "processing_status": status,
        "cancel_initiated_at": if cancel_initiated { json!("2024-09-24T18:40:00Z") } else { json!(null) },
        "created_at": "2024-09-24T18:37:24.100435Z",
        "ended_at": if status == "ended" { json!("2024-09-24T18:45:00Z") } else { json!(null) },
        "results_url": results_url,
        "request_counts": {"processing": 0, "succeeded": 2, "errored": 1, "canceled": 0, "expired": 0}
    })
}

#[tokio::test]
async fn structured_and_failed_items_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/messages/batches")
        .match_header("x-api-key", "sk-ant-test")
        .match_header("anthropic-version", "2023-06-01")
        .match_header("anthropic-beta", "message-batches-2024-09-24")
        .match_body(Matcher::Regex(r#""custom_id":"tags""#.to_string()))
        .with_status(200)
        .with_body(batch("in_progress", false, None).to_string())
        .create_async()
        .await;
    let results_url = format!("{}/results/msgbatch_01", server.url());
    json_mock(
        &mut server,
        "GET",
        "/messages/batches/msgbatch_01",
        batch("ended", false, Some(results_url)),
    )
    .await;
    jsonl_mock(
        &mut server,
        "/results/msgbatch_01",
        &[
            json!({"custom_id": "tags", "result": {"type": "succeeded", "message": {
                "id": "msg_1",
                "content": [{"type": "tool_use", "name": "structured_output", "input": {"value": ["red", "blue"]}}],
                "usage": {"input_tokens": 20, "output_tokens": 9}
            }}}),
            json!({"custom_id": "hello", "result": {"type": "succeeded", "message": {
                "id": "msg_2",
                "content": [{"type": "text", "text": "Hi there"}],
                "usage": {"input_tokens": 4, "output_tokens": 3}
            }}}),
            json!({"custom_id": "bad", "result": {"type": "errored", "error": {
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "max_tokens too large"}
            }}}),
        ],
    )
    .await;

    let adapter = adapter(&server);
    let items = vec![
        BatchItem::new("tags", "list two colours").with_schema(SimpleSchema::array(SimpleSchema::string())),
        BatchItem::new("hello", "say hi"),
        BatchItem::new("bad", "oops").with_max_tokens(1_000_000),
    ];
    let submission = adapter.submit(items, BatchQueueOptions::new()).await.unwrap();
    create.assert_async().await;
    assert_eq!(submission.job.id, "msgbatch_01");
    assert_eq!(submission.job.status, BatchStatus::InProgress);

    let results = adapter
        .wait_for_completion("msgbatch_01", &PollConfig::every(Duration::from_millis(5)))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].custom_id, "tags");
    assert_eq!(results[0].result, Some(json!(["red", "blue"])));
    assert_eq!(results[0].usage.unwrap().total_tokens, 29);
    assert_eq!(results[1].result, Some(json!("Hi there")));
    assert_eq!(results[2].error.as_deref(), Some("max_tokens too large"));
}

#[tokio::test]
async fn cancelled_batch_is_unrecoverable() {
    let mut server = mockito::Server::new_async().await;
    json_mock(
        &mut server,
        "GET",
        "/messages/batches/msgbatch_01",
        batch("ended", true, None),
    )
    .await;

    let adapter = adapter(&server);
    let job = adapter.get_status("msgbatch_01").await.unwrap();
    assert_eq!(job.status, BatchStatus::Cancelled);
    assert_eq!((job.completed_items, job.failed_items), (2, 1));

    let err = adapter
        .wait_for_completion("msgbatch_01", &PollConfig::every(Duration::from_millis(5)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BatchState);
}

#[tokio::test]
async fn missing_key_names_the_variable() {
    let adapter = AnthropicBatchAdapter::with_transport(
        AnthropicConfig::default().with_base_url("http://127.0.0.1:9"),
        common::transport(),
    );
    if std::env::var("ANTHROPIC_API_KEY").is_ok() {
        return;
    }
    let err = adapter
        .submit(vec![BatchItem::new("a", "x")], BatchQueueOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
}

#[tokio::test]
async fn cancel_hits_the_cancel_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let cancel = server
        .mock("POST", "/messages/batches/msgbatch_01/cancel")
        .match_header("x-api-key", "sk-ant-test")
        .match_header("anthropic-version", "2023-06-01")
        .match_header("anthropic-beta", "message-batches-2024-09-24")
        .with_status(200)
        .with_body(batch("canceling", true, None).to_string())
        .expect(1)
        .create_async()
        .await;

    adapter(&server).cancel("msgbatch_01").await.unwrap();
    cancel.assert_async().await;
}
