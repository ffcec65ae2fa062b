// Transport layer - the wire contract with the lecture-manager server
//
// The debug stream is plain SSE: each `data:` line carries one JSON frame
// `{reset, logs, enabled, next}`. Servers that cannot hold a push
// connection open still expose the same records through a poll endpoint,
// so the transport is a strategy trait: `HttpTransport` is production,
// tests substitute fakes, and demo mode fabricates traffic.
//
// Endpoints:
// - GET  /api/debug/stream[?after=<id>]  SSE push (resume from cursor)
// - GET  /api/debug/logs[?after=<id>]    poll fallback
// - POST /api/debug/ack  {"last_id": n}  checkpoint acknowledgment
// - GET  /api/debug/export               opaque log blob download

use bytes::{Bytes, BytesMut};
use futures::{Future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One push-connection message: zero or more raw records plus the resume
/// cursor to use for the next reconnect and acknowledgment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Frame {
    /// Server restarted; discard prior client state before applying `logs`.
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub logs: Vec<Value>,
    /// Server-side toggle for the whole debug stream.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Resume cursor (`after` on the next connect, `last_id` in acks).
    #[serde(default)]
    pub next: u64,
}

fn default_true() -> bool {
    true
}

/// Response shape of the poll fallback endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PollBatch {
    #[serde(default)]
    pub logs: Vec<Value>,
    #[serde(default)]
    pub next: u64,
}

impl From<PollBatch> for Frame {
    fn from(batch: PollBatch) -> Self {
        Frame {
            reset: false,
            logs: batch.logs,
            enabled: true,
            next: batch.next,
        }
    }
}

/// Transport failures. Everything here is recoverable at the session
/// level: `PushUnsupported` routes to the poll fallback, the rest schedule
/// a reconnect or an ack retry.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("push connection not supported: {0}")]
    PushUnsupported(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("stream closed by server")]
    StreamClosed,
}

/// Stream of parsed push frames. Malformed frames are dropped inside the
/// transport (with a warning), so consumers only see frames or terminal
/// errors.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Strategy interface over the wire. The session picks push or poll once
/// at start based on `supports_push` / `PushUnsupported`, instead of
/// branching per call site.
pub trait Transport: Send + Sync + 'static {
    /// Whether this transport can hold a push connection open at all.
    /// `open_push` may still fail with `PushUnsupported` at connect time.
    fn supports_push(&self) -> bool;

    /// Open a push connection delivering frames strictly after `after`
    /// (0 requests a full resync).
    fn open_push(
        &self,
        after: u64,
    ) -> impl Future<Output = Result<FrameStream, TransportError>> + Send;

    /// One-shot catch-up fetch of records strictly after `after`.
    fn poll(&self, after: u64) -> impl Future<Output = Result<PollBatch, TransportError>> + Send;

    /// Acknowledge the cursor `last_id`. Fire-and-forget semantics; the
    /// checkpoint tracker retries on failure.
    fn ack(&self, last_id: u64) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Download the full server-side log as an opaque blob.
    fn export(&self) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Production transport speaking HTTP/SSE to the lecture-manager server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Transport for HttpTransport {
    fn supports_push(&self) -> bool {
        true
    }

    async fn open_push(&self, after: u64) -> Result<FrameStream, TransportError> {
        let mut request = self
            .client
            .get(self.url("/api/debug/stream"))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if after > 0 {
            request = request.query(&[("after", after)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::METHOD_NOT_ALLOWED
        {
            return Err(TransportError::PushUnsupported(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        if !is_event_stream(response.headers()) {
            return Err(TransportError::PushUnsupported(
                "response is not text/event-stream".to_string(),
            ));
        }

        // Decode the byte stream into frames on a dedicated task; the
        // session consumes parsed frames through the channel.
        let (tx, rx) = mpsc::channel::<Result<Frame, TransportError>>(64);
        let mut bytes = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = LineBuffer::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for line in buffer.push(&chunk) {
                            if let Some(frame) = parse_sse_frame(&line) {
                                if tx.send(Ok(frame)).await.is_err() {
                                    return; // consumer gone, stop decoding
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(TransportError::Request(e.to_string()))).await;
                        return;
                    }
                }
            }
            let _ = tx.send(Err(TransportError::StreamClosed)).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn poll(&self, after: u64) -> Result<PollBatch, TransportError> {
        let mut request = self.client.get(self.url("/api/debug/logs"));
        if after > 0 {
            request = request.query(&[("after", after)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        response
            .json::<PollBatch>()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn ack(&self, last_id: u64) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url("/api/debug/ack"))
            .json(&serde_json::json!({ "last_id": last_id }))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn export(&self) -> Result<Bytes, TransportError> {
        let response = self
            .client
            .get(self.url("/api/debug/export"))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }
}

/// Accumulates raw SSE bytes and yields complete lines.
///
/// Splitting happens at the byte level: `\n` is ASCII and never occurs
/// inside a multi-byte UTF-8 sequence, so a character spanning two network
/// chunks stays intact in the buffer and is decoded once, as part of a
/// complete line. Decoding per chunk would tear such characters into
/// replacement chars without any parse error to flag it.
struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append one network chunk, returning every line it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let mut line = &line[..line.len() - 1];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }
        lines
    }
}

/// Check if a response is SSE based on the content-type header
fn is_event_stream(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Parse one SSE line into a frame.
///
/// Returns None if:
/// - the line isn't a `data:` line (comments, `event:` lines, keep-alives)
/// - the payload is empty or `[DONE]`
/// - the JSON is malformed (logged and dropped; never kills the stream)
fn parse_sse_frame(line: &str) -> Option<Frame> {
    let json_str = line.strip_prefix("data:")?.trim();
    if json_str.is_empty() || json_str == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<Frame>(json_str) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("Dropping malformed frame: {}", e);
            None
        }
    }
}
