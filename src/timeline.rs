// Timeline controller - owns the whole streaming pipeline
//
// One task owns the retention store, the filter spec, the checkpoint
// tracker, and the current stream session. All mutation happens on
// messages dispatched to that task (commands, session events, ack timer
// fires), each processed to completion, so pipeline state needs no locks.
// External consumers see only immutable snapshots through a watch channel.
//
// Sessions and ack requests run as spawned tasks that report back tagged
// with the session epoch; `disable()` bumps the epoch, which makes any
// stale in-flight result inert. Nothing a session or the server does can
// mutate the store after disable.
//
// Data flow:
//
//   StreamSession ──frames──▶ normalize ──▶ RetentionStore (merge+evict)
//        ▲                                        │
//        │ ack (debounced)                        ▼ filter
//   CheckpointTracker ◀── frame cursors      Snapshot ──▶ subscribers

use crate::checkpoint::{CheckpointTracker, DEFAULT_ACK_DEBOUNCE};
use crate::events::{LogEntry, StreamKind};
use crate::filter::{self, FilterPatch, FilterSpec};
use crate::normalize;
use crate::session::{
    ConnectionStatus, SessionConfig, SessionEvent, SessionEventKind, StreamSession,
};
use crate::store::{RetentionStore, DEFAULT_RETENTION_WINDOW_MS};
use crate::transport::{Frame, Transport, TransportError};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Injected wall clock (epoch millis) so tests control ingestion time and
/// retention arithmetic deterministically.
pub type ClockFn = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock() -> ClockFn {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Pipeline tunables; all have production defaults.
#[derive(Debug, Clone)]
pub struct TimelineConfig {
    pub retention_window_ms: i64,
    pub ack_debounce: Duration,
    pub session: SessionConfig,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            retention_window_ms: DEFAULT_RETENTION_WINDOW_MS,
            ack_debounce: DEFAULT_ACK_DEBOUNCE,
            session: SessionConfig::default(),
        }
    }
}

/// Immutable, render-ready view of the pipeline. Consumers never get a
/// live reference into the store.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Filtered timeline, (timestamp, id) ascending.
    pub entries: Vec<LogEntry>,
    /// Index of the first error/critical entry after filtering.
    pub first_failure: Option<usize>,
    /// True when this snapshot was produced by ingestion (renderer may
    /// pin to bottom); false for filter-only recomputes.
    pub auto_scroll: bool,
    pub status: ConnectionStatus,
    pub enabled: bool,
    /// Emission counter, strictly increasing per pipeline instance.
    /// Lets consumers tell a fresh emission from the initial value.
    pub revision: u64,
}

impl Snapshot {
    fn initial() -> Self {
        Self {
            entries: Vec::new(),
            first_failure: None,
            auto_scroll: false,
            status: ConnectionStatus::Closed,
            enabled: false,
            revision: 0,
        }
    }
}

#[derive(Debug)]
enum Command {
    Enable,
    Disable,
    SetFilter(FilterPatch),
}

/// Result of one fire-and-forget ack request.
#[derive(Debug)]
struct AckResult {
    epoch: u64,
    id: u64,
    ok: bool,
}

/// Handle to a running timeline pipeline.
///
/// The consumer-facing surface of the subsystem: `enable`, `disable`,
/// `set_filter`, `subscribe`, plus the export passthrough. Dropping the
/// handle (or calling `shutdown`) ends the controller task.
pub struct Timeline<T: Transport> {
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<Arc<Snapshot>>,
    transport: Arc<T>,
    task: tokio::task::JoinHandle<()>,
    #[cfg(test)]
    session_tx: mpsc::Sender<SessionEvent>,
}

impl<T: Transport> Timeline<T> {
    /// Spawn the controller task with the real wall clock.
    pub fn spawn(transport: Arc<T>, config: TimelineConfig) -> Self {
        Self::spawn_with_clock(transport, config, wall_clock())
    }

    pub fn spawn_with_clock(transport: Arc<T>, config: TimelineConfig, clock: ClockFn) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (session_tx, session_rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::initial()));

        let controller = Controller {
            transport: transport.clone(),
            store: RetentionStore::new(config.retention_window_ms),
            config,
            clock,
            filter: FilterSpec::default(),
            checkpoint: CheckpointTracker::new(),
            epoch: 0,
            enabled: false,
            status: ConnectionStatus::Closed,
            stop_tx: None,
            session_tx: session_tx.clone(),
            snapshot_tx,
            revision: 0,
        };
        let task = tokio::spawn(controller.run(cmd_rx, session_rx));

        Self {
            cmd_tx,
            snapshot_rx,
            transport,
            task,
            #[cfg(test)]
            session_tx,
        }
    }

    /// Reset all pipeline state and start streaming from id 0.
    pub async fn enable(&self) {
        let _ = self.cmd_tx.send(Command::Enable).await;
    }

    /// Stop the session, clear the store, reset the checkpoint, and emit
    /// an empty snapshot. Safe to call in any state.
    pub async fn disable(&self) {
        let _ = self.cmd_tx.send(Command::Disable).await;
    }

    /// Partial filter update; a no-change patch does nothing, and calls
    /// before `enable()` are no-ops. Never touches the network.
    pub async fn set_filter(&self, patch: FilterPatch) {
        let _ = self.cmd_tx.send(Command::SetFilter(patch)).await;
    }

    /// Observe snapshots. Each subscriber gets the latest snapshot
    /// immediately and every subsequent emission (bursts coalesce).
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_rx.clone()
    }

    /// Download the full server-side log blob. Outside the streaming
    /// path; plain passthrough to the transport.
    pub async fn export(&self) -> Result<bytes::Bytes, TransportError> {
        self.transport.export().await
    }

    /// Tear down the controller task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Disable).await;
        drop(self.cmd_tx);
        let _ = self.task.await;
    }

    #[cfg(test)]
    pub(crate) async fn inject_session_event(&self, event: SessionEvent) {
        let _ = self.session_tx.send(event).await;
    }
}

/// Controller task state. Lives entirely inside the spawned task.
struct Controller<T: Transport> {
    transport: Arc<T>,
    config: TimelineConfig,
    clock: ClockFn,
    store: RetentionStore,
    filter: FilterSpec,
    checkpoint: CheckpointTracker,
    /// Session generation counter; bumped on every enable/disable so
    /// events from torn-down sessions are discarded.
    epoch: u64,
    enabled: bool,
    status: ConnectionStatus,
    stop_tx: Option<watch::Sender<bool>>,
    session_tx: mpsc::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    revision: u64,
}

impl<T: Transport> Controller<T> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut session_rx: mpsc::Receiver<SessionEvent>,
    ) {
        let (ack_tx, mut ack_rx) = mpsc::channel::<AckResult>(8);
        let mut ack_timer: Option<Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Enable) => self.enable(),
                    Some(Command::Disable) => {
                        ack_timer = None;
                        self.disable();
                    }
                    Some(Command::SetFilter(patch)) => self.set_filter(patch),
                    // Handle dropped: tear down and exit
                    None => {
                        self.disable();
                        break;
                    }
                },
                Some(event) = session_rx.recv() => {
                    if event.epoch != self.epoch {
                        tracing::trace!(
                            stale = event.epoch,
                            current = self.epoch,
                            "Discarding stale session event"
                        );
                        continue;
                    }
                    match event.kind {
                        SessionEventKind::Status(status) => {
                            self.status = status;
                            self.emit_snapshot(false);
                        }
                        SessionEventKind::Frame(frame) => {
                            if self.on_frame(frame) && ack_timer.is_none() {
                                ack_timer =
                                    Some(Box::pin(tokio::time::sleep(self.config.ack_debounce)));
                            }
                        }
                    }
                },
                Some(result) = ack_rx.recv() => {
                    if result.epoch != self.epoch {
                        continue;
                    }
                    let rearm = if result.ok {
                        self.checkpoint.on_ack_success(result.id)
                    } else {
                        self.checkpoint.on_ack_failure()
                    };
                    if rearm && ack_timer.is_none() {
                        ack_timer = Some(Box::pin(tokio::time::sleep(self.config.ack_debounce)));
                    }
                },
                _ = async { ack_timer.as_mut().unwrap().await }, if ack_timer.is_some() => {
                    ack_timer = None;
                    if let Some(id) = self.checkpoint.begin_ack() {
                        self.spawn_ack(id, ack_tx.clone());
                    }
                },
            }
        }
    }

    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.epoch += 1;
        self.enabled = true;
        self.store.reset();
        self.checkpoint.reset();
        self.status = ConnectionStatus::Connecting;

        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);
        let session = StreamSession::new(
            self.transport.clone(),
            self.config.session.clone(),
            self.epoch,
            self.session_tx.clone(),
            stop_rx,
        );
        // Full resync: every enable starts a fresh logical session at id 0
        tokio::spawn(session.run(0));

        tracing::info!(epoch = self.epoch, "Timeline enabled");
        self.emit_snapshot(false);
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        // Bump first: anything still in flight now carries a stale epoch
        self.epoch += 1;
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(true);
        }
        self.store.reset();
        self.checkpoint.reset();
        self.status = ConnectionStatus::Closed;

        tracing::info!("Timeline disabled");
        self.emit_snapshot(false);
    }

    fn set_filter(&mut self, patch: FilterPatch) {
        // UI races (filter change before enable) are no-ops, not errors
        if !self.enabled {
            return;
        }
        if self.filter.apply(patch) {
            self.emit_snapshot(false);
        }
    }

    /// Ingest one frame. Returns true when the checkpoint tracker wants
    /// the ack debounce timer started.
    fn on_frame(&mut self, frame: Frame) -> bool {
        if !frame.enabled {
            tracing::info!("Server disabled the debug stream");
            self.disable();
            return false;
        }
        if frame.reset {
            // Server restarted; its cursor space is new, so prior entries
            // no longer correspond to anything it can resend
            tracing::debug!("Server reset, discarding prior entries");
            self.store.reset();
        }

        let now = (self.clock)();
        let mut app = Vec::new();
        let mut server = Vec::new();
        let mut task = Vec::new();
        for raw in &frame.logs {
            if let Some(entry) = normalize::normalize(raw, now) {
                match entry.stream {
                    StreamKind::App => app.push(entry),
                    StreamKind::Server => server.push(entry),
                    StreamKind::Task => task.push(entry),
                }
            }
        }
        self.store.merge(StreamKind::App, app, now);
        self.store.merge(StreamKind::Server, server, now);
        self.store.merge(StreamKind::Task, task, now);

        self.emit_snapshot(true);
        frame.next > 0 && self.checkpoint.observe(frame.next)
    }

    fn spawn_ack(&self, id: u64, ack_tx: mpsc::Sender<AckResult>) {
        let transport = self.transport.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = transport.ack(id).await;
            if let Err(ref e) = result {
                tracing::debug!("Ack of cursor {} failed: {}", id, e);
            }
            let _ = ack_tx
                .send(AckResult {
                    epoch,
                    id,
                    ok: result.is_ok(),
                })
                .await;
        });
    }

    fn emit_snapshot(&mut self, auto_scroll: bool) {
        let entries: Vec<LogEntry> = self
            .store
            .timeline()
            .into_iter()
            .filter(|e| filter::matches(e, &self.filter))
            .cloned()
            .collect();
        let first_failure = entries.iter().position(|e| e.severity.is_failure());
        self.revision += 1;
        let _ = self.snapshot_tx.send(Arc::new(Snapshot {
            entries,
            first_failure,
            auto_scroll,
            status: self.status,
            enabled: self.enabled,
            revision: self.revision,
        }));
    }
}
