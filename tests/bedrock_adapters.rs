//! Bedrock runtime and batch-job flows against a mock server

mod common;

use ai_batch::adapters::{BedrockAdapter, BedrockJobAdapter};
use ai_batch::config::BedrockConfig;
use ai_batch::structured::SimpleSchema;
use ai_batch::{BatchAdapter, BatchItem, BatchQueueOptions, BatchStatus, ErrorKind, FlexAdapter, PollConfig};
use common::{json_mock, jsonl_mock};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn config() -> BedrockConfig {
    BedrockConfig::default()
        .with_region("us-east-1")
        .with_credentials("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG")
}

fn signed_for(service: &str) -> Matcher {
    Matcher::Regex(format!(
        r"^AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/\d{{8}}/us-east-1/{}/aws4_request, SignedHeaders=.+, Signature=[0-9a-f]{{64}}$",
        service
    ))
}

fn claude_message(text: &str) -> serde_json::Value {
    json!({
        "id": "msg_bdrk_1",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 11, "output_tokens": 4}
    })
}

#[tokio::test]
async fn runtime_invocations_are_signed_and_normalized() {
    let mut server = mockito::Server::new_async().await;
    let invoke = server
        .mock("POST", Matcher::Regex(r"^/model/anthropic\.claude-3-haiku.+/invoke$".to_string()))
        .match_header("authorization", signed_for("bedrock"))
        .match_header("x-amz-date", Matcher::Regex(r"^\d{8}T\d{6}Z$".to_string()))
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"anthropic_version": "bedrock-2023-05-31"})),
            Matcher::Regex("how do you feel".to_string()),
        ]))
        .with_status(200)
        .with_body(claude_message("{\"mood\": \"calm\"}").to_string())
        .create_async()
        .await;
    server
        .mock("POST", Matcher::Regex(r"^/model/.+/invoke$".to_string()))
        .match_body(Matcher::Regex("echo".to_string()))
        .with_status(200)
        .with_body(claude_message("echo echo").to_string())
        .create_async()
        .await;

    let mut config = config();
    config.runtime_url = Some(server.url());
    let adapter = BedrockAdapter::with_transport(config, common::transport());

    let items = vec![
        BatchItem::new("m", "how do you feel?")
            .with_schema(SimpleSchema::object([("mood", SimpleSchema::string())])),
        BatchItem::new("raw", "echo"),
    ];
    let submission = adapter.submit(items, BatchQueueOptions::new()).await.unwrap();
    assert!(submission.job.id.starts_with("bedrock_batch_"));
    let results = submission.completion.await.unwrap();
    invoke.assert_async().await;

    assert_eq!(results[0].custom_id, "m");
    assert_eq!(results[0].result, Some(json!({"mood": "calm"})));
    assert_eq!(results[0].usage.unwrap().total_tokens, 15);
    assert_eq!(results[1].result, Some(json!("echo echo")));
}

#[tokio::test]
async fn runtime_flex_reports_http_failures_per_item() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", Matcher::Regex(r"^/model/.+/invoke$".to_string()))
        .with_status(429)
        .with_body(r#"{"message":"Too many requests"}"#)
        .create_async()
        .await;

    let mut config = config();
    config.runtime_url = Some(server.url());
    let adapter = BedrockAdapter::with_transport(config, common::transport());
    assert_eq!(adapter.flex_window(), 8);

    let results = adapter
        .submit_flex(vec![BatchItem::new("a", "x"), BatchItem::new("b", "y")], BatchQueueOptions::new())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.is_completed()));
    assert!(results[0].error.as_deref().unwrap_or_default().contains("429"));
}

#[tokio::test]
async fn batch_job_stages_input_and_reads_output() {
    let mut server = mockito::Server::new_async().await;
    let upload = server
        .mock("PUT", Matcher::Regex(r"^/bkt/ai-batch/ai-batch-[0-9a-f]+/input\.jsonl$".to_string()))
        .match_header("authorization", signed_for("s3"))
        .match_body(Matcher::Regex(r#""recordId":"r1""#.to_string()))
        .with_status(200)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/model-invocation-job")
        .match_header("authorization", signed_for("bedrock"))
        .match_body(Matcher::PartialJson(json!({
            "roleArn": "arn:aws:iam::123456789012:role/batch",
            "modelId": "anthropic.claude-3-haiku-20240307-v1:0",
            "inputDataConfig": {"s3InputDataConfig": {"s3InputFormat": "JSONL"}}
        })))
        .with_status(200)
        .with_body(json!({"jobArn": "job-abc"}).to_string())
        .create_async()
        .await;
    json_mock(
        &mut server,
        "GET",
        "/model-invocation-job/job-abc",
        json!({
            "jobArn": "job-abc",
            "status": "Completed",
            "modelId": "anthropic.claude-3-haiku-20240307-v1:0",
            "submitTime": "2024-05-01T00:00:00Z",
            "endTime": "2024-05-01T01:00:00Z",
            "totalRecordCount": 2,
            "successRecordCount": 1,
            "errorRecordCount": 1,
            "outputDataConfig": {"s3OutputDataConfig": {"s3Uri": "s3://bkt/out/"}}
        }),
    )
    .await;
    jsonl_mock(
        &mut server,
        "/bkt/out/job-abc/input.jsonl.out",
        &[
            json!({"recordId": "r1", "modelInput": {}, "modelOutput": claude_message("Hello")}),
            json!({"recordId": "r2", "modelInput": {}, "error": {"errorCode": 400, "errorMessage": "bad input"}}),
        ],
    )
    .await;

    let mut config = config().with_batch_storage("bkt", "arn:aws:iam::123456789012:role/batch");
    config.control_url = Some(server.url());
    config.s3_url = Some(server.url());
    let adapter = BedrockJobAdapter::with_transport(config, common::transport());

    let submission = adapter
        .submit(
            vec![BatchItem::new("r1", "greet"), BatchItem::new("r2", "oops")],
            BatchQueueOptions::new(),
        )
        .await
        .unwrap();
    upload.assert_async().await;
    create.assert_async().await;
    assert_eq!(submission.job.id, "job-abc");

    let job = adapter.get_status("job-abc").await.unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!((job.completed_items, job.failed_items), (1, 1));

    let results = adapter
        .wait_for_completion("job-abc", &PollConfig::every(Duration::from_millis(5)))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].result, Some(json!("Hello")));
    assert_eq!(results[1].custom_id, "r2");
    assert_eq!(results[1].error.as_deref(), Some("bad input"));
}

#[tokio::test]
async fn batch_job_without_storage_is_a_configuration_error() {
    if std::env::var("AWS_BEDROCK_BATCH_BUCKET").is_ok() {
        return;
    }
    let adapter = BedrockJobAdapter::with_transport(config(), common::transport());
    let err = adapter
        .submit(vec![BatchItem::new("a", "x")], BatchQueueOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("AWS_BEDROCK_BATCH_BUCKET"));
}

#[tokio::test]
async fn batch_job_cancel_stops_the_job() {
    let mut server = mockito::Server::new_async().await;
    let stop = server
        .mock("POST", "/model-invocation-job/job-abc/stop")
        .match_header("authorization", signed_for("bedrock"))
        .match_header("x-amz-date", Matcher::Regex(r"^\d{8}T\d{6}Z$".to_string()))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let mut config = config();
    config.control_url = Some(server.url());
    let adapter = BedrockJobAdapter::with_transport(config, common::transport());
    adapter.cancel("job-abc").await.unwrap();
    stop.assert_async().await;
}
