//! JSONL (newline-delimited JSON) encoding and decoding for batch input/output files.

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};

use super::TransportError;
use crate::Result;

/// Provider result files carry one full completion per line; cap a line at 16 MiB.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Serialize records into a JSONL payload, one record per line.
pub fn encode<T: Serialize>(records: &[T]) -> Result<Bytes> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}

/// Decode JSONL from an async reader without buffering the whole body as one string.
/// Blank and unparseable lines are skipped.
pub async fn read_records<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<Value>> {
    let mut frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut records = Vec::new();
    while let Some(line) = frames.next().await {
        let line = line.map_err(|e| TransportError::Other(format!("JSONL read failed: {}", e)))?;
        if let Some(v) = parse_line(&line) {
            records.push(v);
        }
    }
    Ok(records)
}

fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "skipping unparseable JSONL line");
            None
        }
    }
}
