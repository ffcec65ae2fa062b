// Stream session - one push-connection lifecycle
//
// A session owns exactly one causal line of frames: connect, receive,
// detect failure, reconnect after a fixed delay, or degrade to polling
// when the transport cannot push. It never touches the store; it forwards
// frames and status changes to the controller over a channel, each tagged
// with the session epoch so the controller can discard stale events after
// a restart.
//
// State Diagram:
//
//   [Disconnected] ──start──▶ [Connecting] ──▶ [Open] ──error──┐
//         ▲                        │                           │
//         │                        │ push unsupported          ▼
//         │                        ▼                   [Disconnected]
//         │                   [Polling] ◀── poll loop          │
//         │                                                    │
//         └────────────── one reconnect timer ◀────────────────┘
//
//   stop() from any state ──▶ [Closed] (terminal)
//
// The session is a single sequential task, so "never stack reconnect
// timers" holds structurally: there is exactly one sleep between attempts
// and no code path that can schedule a second.

use crate::transport::{Frame, Transport, TransportError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Fixed delay before the single reconnect attempt after a drop.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Fixed interval between fetches in poll-fallback mode.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Connection status surfaced to the renderer as a transient string.
/// Nothing here is fatal to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Disconnected,
    /// Push unsupported; degraded to fixed-interval fetches.
    Polling,
    /// Explicit teardown; terminal.
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting…",
            ConnectionStatus::Open => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Polling => "unsupported — falling back to polling",
            ConnectionStatus::Closed => "closed",
        }
    }
}

/// What a session reports back to the controller.
#[derive(Debug)]
pub enum SessionEventKind {
    Status(ConnectionStatus),
    Frame(Frame),
}

/// Session event tagged with the epoch of the session that produced it.
/// The controller drops events whose epoch is not current.
#[derive(Debug)]
pub struct SessionEvent {
    pub epoch: u64,
    pub kind: SessionEventKind,
}

/// Timing knobs, injected so tests can run under a paused clock.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Owns one push-connection lifecycle against a `Transport` strategy.
pub struct StreamSession<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    epoch: u64,
    events: mpsc::Sender<SessionEvent>,
    stop: watch::Receiver<bool>,
}

impl<T: Transport> StreamSession<T> {
    pub fn new(
        transport: Arc<T>,
        config: SessionConfig,
        epoch: u64,
        events: mpsc::Sender<SessionEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            config,
            epoch,
            events,
            stop,
        }
    }

    /// Drive the session until stopped. `after` is the resume cursor;
    /// 0 requests a full resync.
    pub async fn run(mut self, after: u64) {
        if self.transport.supports_push() {
            self.push_loop(after).await;
        } else {
            self.poll_loop(after).await;
        }
        self.emit(SessionEventKind::Status(ConnectionStatus::Closed))
            .await;
        tracing::debug!(epoch = self.epoch, "Session closed");
    }

    async fn push_loop(&mut self, mut after: u64) {
        loop {
            if self.stopped() {
                return;
            }
            self.emit(SessionEventKind::Status(ConnectionStatus::Connecting))
                .await;

            match self.transport.open_push(after).await {
                Ok(mut frames) => {
                    self.emit(SessionEventKind::Status(ConnectionStatus::Open))
                        .await;
                    loop {
                        tokio::select! {
                            _ = self.stop.changed() => {
                                if *self.stop.borrow() {
                                    return;
                                }
                            }
                            item = frames.next() => match item {
                                Some(Ok(frame)) => {
                                    if frame.next > after {
                                        after = frame.next;
                                    }
                                    self.emit(SessionEventKind::Frame(frame)).await;
                                }
                                Some(Err(e)) => {
                                    tracing::warn!(epoch = self.epoch, "Push stream error: {}", e);
                                    break;
                                }
                                None => {
                                    tracing::debug!(epoch = self.epoch, "Push stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(TransportError::PushUnsupported(reason)) => {
                    tracing::warn!("Push unsupported ({}), degrading to polling", reason);
                    self.poll_loop(after).await;
                    return;
                }
                Err(e) => {
                    tracing::debug!(epoch = self.epoch, "Connect failed: {}", e);
                }
            }

            if self.stopped() {
                return;
            }
            self.emit(SessionEventKind::Status(ConnectionStatus::Disconnected))
                .await;
            if !self.sleep_or_stop(self.config.reconnect_delay).await {
                return;
            }
        }
    }

    /// Poll fallback: immediate catch-up fetch, then a fixed-interval loop.
    async fn poll_loop(&mut self, mut after: u64) {
        self.emit(SessionEventKind::Status(ConnectionStatus::Polling))
            .await;
        let mut degraded = false;
        loop {
            if self.stopped() {
                return;
            }
            match self.transport.poll(after).await {
                Ok(batch) => {
                    if degraded {
                        degraded = false;
                        self.emit(SessionEventKind::Status(ConnectionStatus::Polling))
                            .await;
                    }
                    // Idle fetches (nothing new, cursor unchanged) are not
                    // forwarded; otherwise every interval would wake all
                    // snapshot subscribers with no new data
                    let advanced = batch.next > after;
                    if advanced {
                        after = batch.next;
                    }
                    if advanced || !batch.logs.is_empty() {
                        self.emit(SessionEventKind::Frame(batch.into())).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(epoch = self.epoch, "Poll failed: {}", e);
                    if !degraded {
                        degraded = true;
                        self.emit(SessionEventKind::Status(ConnectionStatus::Disconnected))
                            .await;
                    }
                }
            }
            if !self.sleep_or_stop(self.config.poll_interval).await {
                return;
            }
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep for `duration` unless stopped first. Returns false on stop.
    async fn sleep_or_stop(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop.changed() => !*self.stop.borrow(),
        }
    }

    async fn emit(&self, kind: SessionEventKind) {
        // Receiver gone means the controller is shutting down; nothing to do
        let _ = self
            .events
            .send(SessionEvent {
                epoch: self.epoch,
                kind,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{FakeTransport, PushScript};
    use serde_json::json;

    fn config() -> SessionConfig {
        SessionConfig {
            reconnect_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(2),
        }
    }

    fn spawn_session(
        transport: Arc<FakeTransport>,
        after: u64,
    ) -> (mpsc::Receiver<SessionEvent>, watch::Sender<bool>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let session = StreamSession::new(transport, config(), 1, events_tx, stop_rx);
        tokio::spawn(session.run(after));
        (events_rx, stop_tx)
    }

    async fn next_status(rx: &mut mpsc::Receiver<SessionEvent>) -> ConnectionStatus {
        loop {
            match rx.recv().await.expect("session hung up").kind {
                SessionEventKind::Status(s) => return s,
                SessionEventKind::Frame(_) => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_forwarded_with_epoch() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_push(PushScript::frames(
            vec![Frame {
                logs: vec![json!({"id": "1", "message": "hi"})],
                next: 5,
                ..Default::default()
            }],
            true,
        ));
        let (mut rx, _stop) = spawn_session(transport, 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.epoch, 1);
        match event.kind {
            SessionEventKind::Frame(frame) => assert_eq!(frame.next, 5),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reconnect_timer_after_error() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_push(PushScript::fail(TransportError::Connect("refused".into())));
        // Second attempt opens and stays open
        transport.script_push(PushScript::frames(vec![], true));
        let (mut rx, _stop) = spawn_session(transport.clone(), 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);
        assert_eq!(transport.push_opens(), 1);

        // Just inside the backoff window: no second attempt yet
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(transport.push_opens(), 1);

        // Past the window: exactly one reconnect fires
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
        assert_eq!(transport.push_opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_cursor_advances_across_reconnects() {
        let transport = Arc::new(FakeTransport::new());
        // First connection delivers a frame with cursor 7 then drops
        transport.script_push(PushScript::frames(
            vec![Frame {
                next: 7,
                ..Default::default()
            }],
            false,
        ));
        transport.script_push(PushScript::frames(vec![], true));
        let (mut rx, _stop) = spawn_session(transport.clone(), 0);

        // Drain until the second connect happens
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);

        assert_eq!(transport.push_after_log(), vec![0, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_fallback_when_push_unsupported() {
        let transport = Arc::new(FakeTransport::without_push());
        transport.script_poll(Ok(crate::transport::PollBatch {
            logs: vec![json!({"id": "1", "message": "m"})],
            next: 3,
        }));
        transport.script_poll(Ok(crate::transport::PollBatch {
            logs: vec![],
            next: 3,
        }));
        let (mut rx, _stop) = spawn_session(transport.clone(), 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Polling);
        // Immediate catch-up fetch
        let event = rx.recv().await.unwrap();
        match event.kind {
            SessionEventKind::Frame(frame) => assert_eq!(frame.next, 3),
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(transport.poll_count(), 1);

        // Interval fetch follows, resuming from the advanced cursor
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(transport.poll_count(), 2);
        assert_eq!(transport.poll_after_log(), vec![0, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poll_batches_are_not_forwarded() {
        let transport = Arc::new(FakeTransport::without_push());
        transport.script_poll(Ok(crate::transport::PollBatch {
            logs: vec![json!({"id": "1", "message": "m"})],
            next: 3,
        }));
        // Every further poll returns the unscripted empty default
        let (mut rx, _stop) = spawn_session(transport.clone(), 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Polling);
        let event = rx.recv().await.expect("session hung up");
        assert!(matches!(event.kind, SessionEventKind::Frame(_)));

        // Several idle intervals pass: fetches keep running, but nothing
        // is forwarded to wake the controller
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(transport.poll_count() >= 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_at_connect_time_degrades_to_polling() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_push(PushScript::fail(TransportError::PushUnsupported(
            "status 404".into(),
        )));
        transport.script_poll(Ok(crate::transport::PollBatch::default()));
        let (mut rx, _stop) = spawn_session(transport.clone(), 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Polling);
        assert_eq!(transport.push_opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_sleep_closes_session() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_push(PushScript::fail(TransportError::Connect("refused".into())));
        let (mut rx, stop) = spawn_session(transport.clone(), 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Disconnected);

        stop.send(true).unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Closed);
        // The pending reconnect timer was cancelled with the session
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.push_opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_open_closes_session() {
        let transport = Arc::new(FakeTransport::new());
        transport.script_push(PushScript::frames(vec![], true));
        let (mut rx, stop) = spawn_session(transport, 0);

        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Open);

        stop.send(true).unwrap();
        assert_eq!(next_status(&mut rx).await, ConnectionStatus::Closed);
    }
}
