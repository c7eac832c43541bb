//! Bedrock batch inference jobs.
//!
//! Input records (`{recordId, modelInput}`) are written as JSONL to the batch
//! bucket, a model invocation job is created against it, and results are read
//! back from `{outputUri}{jobId}/input.jsonl.out` once the job has ended.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::invoke_body;
use crate::adapters::{
    remote_completion, validate_items, BatchAdapter, ItemIndex, PollConfig, Submission,
    SubmittedBatches,
};
use crate::config::{current_settings, process_env, BedrockConfig, BedrockSettings};
use crate::normalize::{self, ModelFamily};
use crate::signing::SigV4Signer;
use crate::transport::{jsonl, HttpRequest, HttpTransport};
use crate::types::{BatchItem, BatchJob, BatchQueueOptions, BatchResult, BatchStatus, Provider};
use crate::{Error, Result};

const INPUT_FILE: &str = "input.jsonl";
const KEY_PREFIX: &str = "ai-batch";
/// Bedrock rejects jobs below this record count under default quotas.
const MIN_RECORDS: usize = 100;

pub fn map_status(native: &str) -> BatchStatus {
    match native {
        "Submitted" | "Scheduled" => BatchStatus::Pending,
        "Validating" => BatchStatus::Validating,
        "InProgress" => BatchStatus::InProgress,
        "Stopping" => BatchStatus::Cancelling,
        "Stopped" => BatchStatus::Cancelled,
        "Completed" | "PartiallyCompleted" => BatchStatus::Completed,
        "Failed" => BatchStatus::Failed,
        "Expired" => BatchStatus::Expired,
        _ => BatchStatus::Pending,
    }
}

/// One record of the job input file.
pub fn job_record(item: &BatchItem, model: &str) -> Value {
    json!({ "recordId": item.id, "modelInput": invoke_body(item, model) })
}

/// `s3://bucket/some/prefix/` into `("bucket", "some/prefix/")`.
pub fn split_s3_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("s3://")?;
    match rest.split_once('/') {
        Some((bucket, prefix)) if !bucket.is_empty() => Some((bucket, prefix)),
        None if !rest.is_empty() => Some((rest, "")),
        _ => None,
    }
}

/// Key of the output file Bedrock writes for our single input file.
pub fn output_key(output_prefix: &str, job_arn: &str) -> String {
    let job_id = job_arn.rsplit('/').next().unwrap_or(job_arn);
    let prefix = if output_prefix.is_empty() || output_prefix.ends_with('/') {
        output_prefix.to_string()
    } else {
        format!("{}/", output_prefix)
    };
    format!("{}{}/{}.out", prefix, job_id, INPUT_FILE)
}

fn timestamp(v: &Value, key: &str) -> Option<DateTime<Utc>> {
    v.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn output_uri(job: &Value) -> Option<&str> {
    job.pointer("/outputDataConfig/s3OutputDataConfig/s3Uri")
        .and_then(Value::as_str)
}

/// Map a `GetModelInvocationJob` response onto a [`BatchJob`].
pub(crate) fn job_from_response(v: &Value, index: &ItemIndex) -> BatchJob {
    let arn = v.get("jobArn").and_then(Value::as_str).unwrap_or_default();
    let count = |k: &str| v.get(k).and_then(Value::as_u64).map(|n| n as usize);
    let total = count("totalRecordCount").unwrap_or(index.ids.len());

    let mut job = BatchJob::new(arn, Provider::Bedrock, total)
        .with_webhook_url(index.webhook_url.clone());
    job.status = map_status(v.get("status").and_then(Value::as_str).unwrap_or_default());
    job.completed_items = count("successRecordCount").unwrap_or(0);
    job.failed_items = count("errorRecordCount").unwrap_or(0);
    if let Some(submitted) = timestamp(v, "submitTime") {
        job.created_at = submitted;
    }
    job.completed_at = timestamp(v, "endTime");
    job.expires_at = timestamp(v, "jobExpirationTime");
    job.input_file_id = v
        .pointer("/inputDataConfig/s3InputDataConfig/s3Uri")
        .and_then(Value::as_str)
        .map(String::from);
    job.output_file_id = output_uri(v).map(String::from);
    job
}

#[derive(Debug)]
struct Inner {
    config: BedrockConfig,
    transport: HttpTransport,
    submitted: SubmittedBatches,
}

#[derive(Debug, Clone)]
pub struct BedrockJobAdapter {
    inner: Arc<Inner>,
}

impl BedrockJobAdapter {
    pub fn new() -> Self {
        Self::with_config(BedrockConfig::default())
    }

    pub fn with_config(config: BedrockConfig) -> Self {
        Self::with_transport(config, HttpTransport::shared())
    }

    pub fn with_transport(config: BedrockConfig, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                submitted: SubmittedBatches::default(),
            }),
        }
    }

    fn settings(&self) -> Result<BedrockSettings> {
        self.inner
            .config
            .clone()
            .or(&current_settings().bedrock)
            .resolve(&process_env)
    }

    fn signed(settings: &BedrockSettings, service: &str, mut req: HttpRequest) -> Result<HttpRequest> {
        SigV4Signer::from_settings(settings, service).sign(&mut req, Utc::now())?;
        Ok(req)
    }

    fn job_url(settings: &BedrockSettings, job_arn: &str) -> String {
        format!(
            "{}/model-invocation-job/{}",
            settings.control_url,
            urlencoding::encode(job_arn)
        )
    }

    async fn fetch_job(&self, settings: &BedrockSettings, job_arn: &str) -> Result<Value> {
        let req = Self::signed(settings, "bedrock", HttpRequest::get(Self::job_url(settings, job_arn)))?;
        self.inner.transport.send_json(req).await
    }
}

impl Default for BedrockJobAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchAdapter for BedrockJobAdapter {
    fn provider(&self) -> Provider {
        Provider::Bedrock
    }

    fn default_poll_config(&self) -> PollConfig {
        PollConfig::every(Duration::from_secs(60))
    }

    fn terminal_failure_is_error(&self) -> bool {
        true
    }

    async fn submit(&self, items: Vec<BatchItem>, options: BatchQueueOptions) -> Result<Submission> {
        validate_items(&items)?;
        let settings = self.settings()?;
        let (bucket, role_arn) = settings.require_batch_storage()?;
        let model = options.model_or(super::DEFAULT_MODEL);
        if items.len() < MIN_RECORDS {
            tracing::warn!(
                items = items.len(),
                minimum = MIN_RECORDS,
                "Bedrock batch inference usually rejects jobs this small"
            );
        }

        let job_name = format!("ai-batch-{}", uuid::Uuid::new_v4().simple());
        let input_key = format!("{}/{}/{}", KEY_PREFIX, job_name, INPUT_FILE);
        let records: Vec<Value> = items.iter().map(|i| job_record(i, model)).collect();
        let upload = HttpRequest::new(Method::PUT, settings.s3_object_url(bucket, &input_key))
            .bytes("application/jsonl", jsonl::encode(&records)?);
        let upload = Self::signed(&settings, "s3", upload)?;
        self.inner.transport.send_text(upload).await?;

        let input_uri = format!("s3://{}/{}", bucket, input_key);
        let body = json!({
            "jobName": job_name,
            "roleArn": role_arn,
            "modelId": model,
            "inputDataConfig": {
                "s3InputDataConfig": { "s3Uri": input_uri, "s3InputFormat": "JSONL" }
            },
            "outputDataConfig": {
                "s3OutputDataConfig": { "s3Uri": format!("s3://{}/{}/{}/output/", bucket, KEY_PREFIX, job_name) }
            },
        });
        let create = HttpRequest::post_json(format!("{}/model-invocation-job", settings.control_url), &body);
        let create = Self::signed(&settings, "bedrock", create)?;
        let created = self.inner.transport.send_json(create).await?;
        let job_arn = created
            .get("jobArn")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::batch_state(job_name.as_str(), "create response has no jobArn"))?;

        let index = ItemIndex::new(&items, options.webhook_url.clone());
        let mut job = BatchJob::new(job_arn, Provider::Bedrock, items.len())
            .with_webhook_url(options.webhook_url.clone());
        job.input_file_id = Some(input_uri);
        self.inner.submitted.remember(job_arn, index).await;
        tracing::info!(provider = "bedrock", batch_id = job_arn, items = items.len(), model, "batch job submitted");

        let completion = remote_completion(self.clone(), job.id.clone(), job.webhook_url.clone());
        Ok(Submission { job, completion })
    }

    async fn get_status(&self, batch_id: &str) -> Result<BatchJob> {
        let settings = self.settings()?;
        let v = self.fetch_job(&settings, batch_id).await?;
        Ok(job_from_response(&v, &self.inner.submitted.get(batch_id).await))
    }

    async fn cancel(&self, batch_id: &str) -> Result<()> {
        let settings = self.settings()?;
        let url = format!("{}/stop", Self::job_url(&settings, batch_id));
        let req = Self::signed(&settings, "bedrock", HttpRequest::post(url))?;
        self.inner.transport.send_text(req).await?;
        tracing::info!(provider = "bedrock", batch_id, "stop requested");
        Ok(())
    }

    async fn get_results(&self, batch_id: &str) -> Result<Vec<BatchResult>> {
        let settings = self.settings()?;
        let v = self.fetch_job(&settings, batch_id).await?;
        let index = self.inner.submitted.get(batch_id).await;
        let job = job_from_response(&v, &index);
        if !job.is_terminal() {
            return Err(Error::not_complete(batch_id, job.status));
        }

        let (bucket, prefix) = output_uri(&v)
            .and_then(split_s3_uri)
            .ok_or_else(|| Error::batch_state(batch_id, "job has no S3 output location"))?;
        let family = ModelFamily::detect(v.get("modelId").and_then(Value::as_str).unwrap_or_default());
        let key = output_key(prefix, batch_id);
        let req = Self::signed(&settings, "s3", HttpRequest::get(settings.s3_object_url(bucket, &key)))?;
        let lines = self.inner.transport.send_jsonl(req).await?;
        let results = lines
            .iter()
            .filter_map(|l| normalize::bedrock_job_line(l, family, &index.modes))
            .collect();
        Ok(normalize::reconcile(results, &index.ids))
    }
}
