// Demo mode: generate realistic mock frames to showcase the console
//
// `DemoTransport` implements the same strategy interface as the HTTP
// transport but fabricates a plausible lecture-manager session: uploads,
// transcode jobs that retry and fail, free-text server lines. Useful for
// trying the console without a server.
//
// Run with: LECTAIL_DEMO=1 cargo run --release

use crate::transport::{Frame, FrameStream, PollBatch, Transport, TransportError};
use bytes::Bytes;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;

/// Transport that pushes a scripted sequence of frames forever.
#[derive(Debug, Default)]
pub struct DemoTransport;

impl Transport for DemoTransport {
    fn supports_push(&self) -> bool {
        true
    }

    async fn open_push(&self, after: u64) -> Result<FrameStream, TransportError> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(feed_frames(tx, after));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn poll(&self, after: u64) -> Result<PollBatch, TransportError> {
        Ok(PollBatch {
            logs: vec![],
            next: after,
        })
    }

    async fn ack(&self, _last_id: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn export(&self) -> Result<Bytes, TransportError> {
        Ok(Bytes::from_static(
            b"[demo] lectail demo transport has no server-side log\n",
        ))
    }
}

async fn feed_frames(tx: mpsc::Sender<Result<Frame, TransportError>>, after: u64) {
    // Initial delay so the first frames land after the console is up
    sleep(Duration::from_millis(500)).await;

    let mut next = after;
    loop {
        for (delay_ms, logs) in demo_sequence() {
            next += 1;
            let frame = Frame {
                reset: false,
                logs,
                enabled: true,
                next,
            };
            if tx.send(Ok(frame)).await.is_err() {
                return; // consumer hung up
            }
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

/// One loop of scripted activity: a lecture upload, a transcode job that
/// retries and eventually fails, and interleaved server log lines.
fn demo_sequence() -> Vec<(u64, Vec<Value>)> {
    let now = chrono::Utc::now().timestamp_millis();
    vec![
        (
            900,
            vec![json!({
                "id": format!("app-{now}-1"),
                "severity": "info",
                "category": "uploads",
                "message": "Lecture video upload started: intro-to-rust.mp4",
                "request_id": "req-upload-01",
                "timestamp": now,
            })],
        ),
        (
            700,
            vec![json!({
                "task_id": "job-transcode-01",
                "status": "running",
                "name": "transcode",
                "job_id": "job-transcode-01",
                "timestamp": now + 900,
            })],
        ),
        (
            1_200,
            vec![json!("INFO worker-2 picked up job-transcode-01 (1080p preset)")],
        ),
        (
            1_500,
            vec![json!({
                "task_id": "job-transcode-01",
                "status": "failed",
                "name": "transcode",
                "retries": 1,
                "error": "ffmpeg exited with code 1",
                "timestamp": now + 3_100,
                "context": {"request_id": "req-upload-01"},
            })],
        ),
        (
            800,
            vec![json!("WARN worker-2 retrying job-transcode-01 (attempt 2)")],
        ),
        (
            1_000,
            vec![
                json!({
                    "id": format!("app-{now}-2"),
                    "severity": "warning",
                    "category": "storage",
                    "message": "Storage bucket at 85% capacity",
                    "timestamp": now + 4_900,
                }),
                json!({
                    "task_id": "job-transcode-01",
                    "status": "completed",
                    "name": "transcode",
                    "retries": 2,
                    "timestamp": now + 5_000,
                }),
            ],
        ),
        (
            2_000,
            vec![json!({
                "id": format!("app-{now}-3"),
                "severity": "error",
                "category": "auth",
                "message": "Session token refresh failed for instructor account",
                "request_id": "req-auth-77",
                "stack": "TokenError: expired\n  at refresh (auth.py:88)",
                "timestamp": now + 7_000,
            })],
        ),
    ]
}
