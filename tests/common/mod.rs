//! Mock HTTP fixtures shared by the integration tests

#![allow(dead_code)]

use ai_batch::transport::HttpTransport;
use mockito::{Mock, ServerGuard};
use serde_json::Value;

/// Fresh client per test so pooled connections never outlive a test runtime.
pub fn transport() -> HttpTransport {
    HttpTransport::with_client(reqwest::Client::new())
}

/// JSON response for `method path`.
pub async fn json_mock(server: &mut ServerGuard, method: &str, path: &str, body: Value) -> Mock {
    server
        .mock(method, path)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

/// Newline-delimited JSON response, one record per line.
pub async fn jsonl_mock(server: &mut ServerGuard, path: &str, records: &[Value]) -> Mock {
    let body = records
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", "application/jsonl")
        .with_body(body)
        .create_async()
        .await
}

/// Peak number of requests a [`slow_server`] held at the same time.
#[derive(Debug, Default)]
pub struct InFlight {
    now: std::sync::atomic::AtomicUsize,
    pub peak: std::sync::atomic::AtomicUsize,
    pub served: std::sync::atomic::AtomicUsize,
}

/// Plain HTTP/1.1 server answering every request with `body` after `delay`.
///
/// mockito answers immediately, so it cannot show how many requests an
/// adapter keeps open at once.
pub async fn slow_server(
    delay: std::time::Duration,
    body: String,
) -> (String, std::sync::Arc<InFlight>) {
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let stats = std::sync::Arc::new(InFlight::default());
    let shared = stats.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let stats = shared.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf);
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .filter_map(|l| l.split_once(':'))
                            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() >= end + 4 + length {
                            break;
                        }
                    }
                }

                let now = stats.now.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                stats.now.fetch_sub(1, Ordering::SeqCst);
                stats.served.fetch_add(1, Ordering::SeqCst);

                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (url, stats)
}
