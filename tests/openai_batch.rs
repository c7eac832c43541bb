//! OpenAI Batch API flow against a mock server

mod common;

use ai_batch::adapters::OpenAiBatchAdapter;
use ai_batch::config::OpenAiConfig;
use ai_batch::structured::SimpleSchema;
use ai_batch::{BatchAdapter, BatchItem, BatchQueueOptions, BatchStatus, ErrorKind, FlexAdapter, PollConfig};
use common::{json_mock, jsonl_mock};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn adapter(server: &mockito::ServerGuard) -> OpenAiBatchAdapter {
    OpenAiBatchAdapter::with_transport(
        OpenAiConfig::default()
            .with_api_key("sk-test")
            .with_base_url(server.url()),
        common::transport(),
    )
}

fn items() -> Vec<BatchItem> {
    vec![
        BatchItem::new("a", "name a colour"),
        BatchItem::new("b", "describe a user").with_schema(SimpleSchema::object([
            ("name", SimpleSchema::string()),
            ("age", SimpleSchema::Number),
        ])),
        BatchItem::new("c", "never answered"),
    ]
}

#[tokio::test]
async fn submit_poll_and_collect_results() {
    let mut server = mockito::Server::new_async().await;
    let upload = server
        .mock("POST", "/files")
        .match_header("authorization", "Bearer sk-test")
        .match_header(
            "content-type",
            Matcher::Regex(r"^multipart/form-data; boundary=.*".to_string()),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": "file-in", "purpose": "batch"}).to_string())
        .create_async()
        .await;
    let create = server
        .mock("POST", "/batches")
        .match_body(Matcher::PartialJson(json!({
            "input_file_id": "file-in",
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h",
            "metadata": {"run": "nightly"}
        })))
        .with_status(200)
        .with_body(
            json!({
                "id": "batch_1",
                "status": "validating",
                "created_at": 1714500000,
                "request_counts": {"total": 3, "completed": 0, "failed": 0}
            })
            .to_string(),
        )
        .create_async()
        .await;
    json_mock(
        &mut server,
        "GET",
        "/batches/batch_1",
        json!({
            "id": "batch_1",
            "status": "completed",
            "output_file_id": "file-out",
            "error_file_id": "file-err",
            "completed_at": 1714503600,
            "request_counts": {"total": 3, "completed": 2, "failed": 1}
        }),
    )
    .await;
    jsonl_mock(
        &mut server,
        "/files/file-out/content",
        &[
            json!({
                "id": "resp_b", "custom_id": "b", "error": null,
                "response": {"status_code": 200, "body": {
                    "choices": [{"message": {"content": "{\"name\":\"Ada\",\"age\":36}"}}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 8}
                }}
            }),
            json!({
                "id": "resp_a", "custom_id": "a", "error": null,
                "response": {"status_code": 200, "body": {
                    "choices": [{"message": {"content": "teal"}}],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 1}
                }}
            }),
            // duplicate line for "a"; the first one wins
            json!({
                "id": "resp_a2", "custom_id": "a", "error": null,
                "response": {"status_code": 200, "body": {"choices": [{"message": {"content": "red"}}]}}
            }),
        ],
    )
    .await;
    jsonl_mock(
        &mut server,
        "/files/file-err/content",
        &[json!({
            "id": "resp_c", "custom_id": "c",
            "response": {"status_code": 400, "body": {"error": {"message": "context length exceeded"}}},
            "error": null
        })],
    )
    .await;

    let adapter = adapter(&server);
    let submission = adapter
        .submit(items(), BatchQueueOptions::new().with_metadata("run", "nightly"))
        .await
        .unwrap();
    assert_eq!(submission.job.id, "batch_1");
    assert_eq!(submission.job.status, BatchStatus::Validating);
    assert_eq!(submission.job.total_items, 3);
    upload.assert_async().await;
    create.assert_async().await;

    let results = adapter
        .wait_for_completion("batch_1", &PollConfig::every(Duration::from_millis(5)))
        .await
        .unwrap();

    let ids: Vec<_> = results.iter().map(|r| r.custom_id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(results[0].result, Some(json!("teal")));
    assert_eq!(results[0].usage.unwrap().total_tokens, 6);
    assert_eq!(results[1].result, Some(json!({"name": "Ada", "age": 36})));
    assert!(!results[2].is_completed());
    assert_eq!(results[2].error.as_deref(), Some("context length exceeded"));
}

#[tokio::test]
async fn results_before_terminal_are_refused() {
    let mut server = mockito::Server::new_async().await;
    json_mock(
        &mut server,
        "GET",
        "/batches/batch_2",
        json!({"id": "batch_2", "status": "in_progress", "request_counts": {"total": 4}}),
    )
    .await;

    let err = adapter(&server).get_results("batch_2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BatchState);
    assert!(err.to_string().contains("not complete"));
}

#[tokio::test]
async fn expired_batch_fails_the_wait() {
    let mut server = mockito::Server::new_async().await;
    json_mock(
        &mut server,
        "GET",
        "/batches/batch_3",
        json!({"id": "batch_3", "status": "expired"}),
    )
    .await;

    let err = adapter(&server)
        .wait_for_completion("batch_3", &PollConfig::every(Duration::from_millis(5)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BatchState);
    assert!(err.to_string().contains("expired"));
}

#[tokio::test]
async fn polling_gives_up_after_max_attempts() {
    let mut server = mockito::Server::new_async().await;
    let status = server
        .mock("GET", "/batches/batch_4")
        .with_status(200)
        .with_body(json!({"id": "batch_4", "status": "in_progress"}).to_string())
        .expect(3)
        .create_async()
        .await;

    let poll = PollConfig::every(Duration::from_millis(1)).with_max_attempts(3);
    let err = adapter(&server)
        .wait_for_completion("batch_4", &poll)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    status.assert_async().await;
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/batches/batch_5/cancel")
        .with_status(404)
        .with_body(r#"{"error":{"message":"No batch found"}}"#)
        .create_async()
        .await;

    let err = adapter(&server).cancel("batch_5").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.status_code(), Some(404));
    assert!(err.to_string().contains("No batch found"));
}

#[tokio::test]
async fn flex_isolates_item_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"messages": [{"role": "user", "content": "ok"}]})))
        .with_status(200)
        .with_body(json!({"id": "chatcmpl-1", "choices": [{"message": {"content": "fine"}}]}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"messages": [{"role": "user", "content": "boom"}]})))
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let adapter = adapter(&server);
    assert_eq!(adapter.flex_window(), 10);
    let results = adapter
        .submit_flex(
            vec![BatchItem::new("x", "ok"), BatchItem::new("y", "boom")],
            BatchQueueOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].custom_id, "x");
    assert_eq!(results[0].result, Some(json!("fine")));
    assert_eq!(results[1].custom_id, "y");
    assert!(results[1].error.as_deref().unwrap_or_default().contains("500"));
}

#[tokio::test]
async fn cancel_hits_the_cancel_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let cancel = server
        .mock("POST", "/batches/batch_7/cancel")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_body(json!({"id": "batch_7", "status": "cancelling"}).to_string())
        .expect(1)
        .create_async()
        .await;

    adapter(&server).cancel("batch_7").await.unwrap();
    cancel.assert_async().await;
}

#[tokio::test]
async fn repeated_status_polls_are_read_only() {
    let mut server = mockito::Server::new_async().await;
    let status = server
        .mock("GET", "/batches/batch_8")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_body(
            json!({
                "id": "batch_8",
                "status": "in_progress",
                "created_at": 1714500000,
                "request_counts": {"total": 5, "completed": 2, "failed": 1}
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;
    let mut writes = Vec::new();
    for method in ["POST", "PUT", "PATCH", "DELETE"] {
        writes.push(server.mock(method, Matcher::Any).expect(0).create_async().await);
    }

    let adapter = adapter(&server);
    let first = adapter.get_status("batch_8").await.unwrap();
    let second = adapter.get_status("batch_8").await.unwrap();
    assert_eq!(first.status, BatchStatus::InProgress);
    assert_eq!(first.status, second.status);
    assert_eq!(
        (first.total_items, first.completed_items, first.failed_items),
        (second.total_items, second.completed_items, second.failed_items)
    );
    assert_eq!((first.completed_items, first.failed_items), (2, 1));
    status.assert_async().await;
    for write in writes {
        write.assert_async().await;
    }
}
