//! 传输层：统一的 HTTP 请求描述、客户端与 JSONL 编解码。
//!
//! HTTP transport shared by all adapters. Adapters describe a call as an
//! [`HttpRequest`] (so request shaping is testable without a network), then
//! hand it to [`HttpTransport`] which applies timeouts, proxying and status
//! checking uniformly.

pub mod http;
pub mod jsonl;

use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;

pub use http::HttpTransport;

/// Provider-bound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        Self::post(url).json(body)
    }

    pub fn json(mut self, body: &Value) -> Self {
        self.headers
            .insert("content-type".into(), "application/json".into());
        self.body = Some(Bytes::from(body.to_string()));
        self
    }

    pub fn bytes(mut self, content_type: &str, body: Bytes) -> Self {
        self.headers.insert("content-type".into(), content_type.into());
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {}", token))
    }

    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    /// Parsed JSON body, if any.
    pub fn json_body(&self) -> Option<Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Other(String),
}
