//! Completion webhooks.
//!
//! When a submission carries a `webhook_url`, the terminal [`BatchJob`] is
//! POSTed to it once. Delivery is best effort: failures are logged and never
//! surface to the caller.

use crate::transport::{HttpRequest, HttpTransport};
use crate::types::BatchJob;

pub async fn notify(url: &str, job: &BatchJob) {
    notify_with(&HttpTransport::shared(), url, job).await
}

pub async fn notify_with(transport: &HttpTransport, url: &str, job: &BatchJob) {
    let body = match serde_json::to_value(job) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(batch_id = %job.id, error = %e, "could not serialize webhook payload");
            return;
        }
    };
    let request = HttpRequest::post_json(url, &body).header("x-batch-id", job.id.clone());
    match transport.send_text(request).await {
        Ok(_) => tracing::debug!(batch_id = %job.id, url, "webhook delivered"),
        Err(e) => tracing::warn!(batch_id = %job.id, url, error = %e, "webhook delivery failed"),
    }
}
