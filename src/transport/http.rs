use crate::{Error, Result};
use futures::TryStreamExt;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tokio_util::io::StreamReader;

use super::{jsonl, HttpRequest, TransportError};

static SHARED: Lazy<HttpTransport> = Lazy::new(|| {
    HttpTransport::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default HTTP client");
        HttpTransport {
            client: reqwest::Client::new(),
        }
    })
});

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Process-wide transport; the underlying connection pool is shared.
    pub fn shared() -> Self {
        SHARED.clone()
    }

    pub fn from_env() -> Result<Self> {
        // Minimal production-friendly defaults (env-overridable).
        // Batch result files can be large, so the default is more generous than for chat.
        let timeout_secs = env_parse::<u64>("AI_HTTP_TIMEOUT_SECS")
            .or_else(|| env_parse::<u64>("AI_TIMEOUT_SECS"))
            .unwrap_or(120);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(env_parse::<usize>("AI_HTTP_POOL_MAX_IDLE_PER_HOST").unwrap_or(32))
            .pool_idle_timeout(Some(Duration::from_secs(
                env_parse::<u64>("AI_HTTP_POOL_IDLE_TIMEOUT_SECS").unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: HttpRequest) -> Result<reqwest::Response> {
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header name {}: {}", k, e)))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| TransportError::Other(format!("invalid header value for {}: {}", k, e)))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::trace!(method = %request.method, url = %request.url, "sending request");
        let response = builder.send().await.map_err(http_error)?;
        check_status(response).await
    }

    /// Send and decode a JSON response. Empty bodies decode as `null`.
    pub async fn send_json(&self, request: HttpRequest) -> Result<Value> {
        let text = self.send_text(request).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn send_text(&self, request: HttpRequest) -> Result<String> {
        let response = self.send(request).await?;
        Ok(response.text().await.map_err(http_error)?)
    }

    /// Send and decode a newline-delimited JSON body record by record.
    pub async fn send_jsonl(&self, request: HttpRequest) -> Result<Vec<Value>> {
        let response = self.send(request).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.without_url()));
        jsonl::read_records(StreamReader::new(stream)).await
    }

    /// Multipart file upload (OpenAI `/files`).
    pub async fn upload_file(
        &self,
        url: &str,
        bearer: &str,
        purpose: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<Value> {
        let part = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(http_error)?;
        let form = Form::new().text("purpose", purpose.to_string()).part("file", part);

        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .multipart(form)
            .send()
            .await
            .map_err(http_error)?;
        let response = check_status(response).await?;
        Ok(response.json().await.map_err(http_error)?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Transport(TransportError::Status {
        status: status.as_u16(),
        body,
    }))
}

/// Request URLs can carry credentials, so they never reach error text.
fn http_error(e: reqwest::Error) -> TransportError {
    TransportError::Http(e.without_url())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}
