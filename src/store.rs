// Retention store - bounded in-memory timeline buffers
//
// Three parallel logical streams (app, server, task), each an append-only
// buffer that is deduplicated by id and evicted by age. Nothing here does
// I/O; the controller owns the single instance and hands consumers only
// immutable snapshots.
//
// Invariants after every mutation:
// - each stream is sorted by (timestamp, id) ascending with no duplicate ids
// - no entry is older than `now - retention_window_ms`
//
// Eviction is O(n) over the affected stream per mutation, which is fine at
// console cardinalities (hundreds of entries, minutes of retention).

use crate::events::{LogEntry, StreamKind};

/// Default sliding retention window: 10 minutes.
pub const DEFAULT_RETENTION_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Time-bounded, deduplicated storage for the three logical streams.
#[derive(Debug)]
pub struct RetentionStore {
    app: Vec<LogEntry>,
    server: Vec<LogEntry>,
    task: Vec<LogEntry>,
    retention_window_ms: i64,
}

impl RetentionStore {
    pub fn new(retention_window_ms: i64) -> Self {
        Self {
            app: Vec::new(),
            server: Vec::new(),
            task: Vec::new(),
            retention_window_ms,
        }
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut Vec<LogEntry> {
        match kind {
            StreamKind::App => &mut self.app,
            StreamKind::Server => &mut self.server,
            StreamKind::Task => &mut self.task,
        }
    }

    /// Entries of one stream, sorted by (timestamp, id).
    pub fn stream(&self, kind: StreamKind) -> &[LogEntry] {
        match kind {
            StreamKind::App => &self.app,
            StreamKind::Server => &self.server,
            StreamKind::Task => &self.task,
        }
    }

    /// Upsert a batch into one stream, then trim and re-sort it.
    ///
    /// Re-ingesting an existing id replaces the stored entry
    /// (last-write-wins), so merging the same batch twice converges to the
    /// same state. Eviction runs on every merge across all streams.
    pub fn merge(&mut self, kind: StreamKind, incoming: Vec<LogEntry>, now_ms: i64) {
        if !incoming.is_empty() {
            let stream = self.stream_mut(kind);
            for entry in incoming {
                match stream.iter_mut().find(|e| e.id == entry.id) {
                    Some(existing) => *existing = entry,
                    None => stream.push(entry),
                }
            }
            stream.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        }
        self.evict(now_ms);
    }

    /// Drop entries strictly older than `now - retention_window` from every
    /// stream. Safe to call redundantly.
    pub fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.retention_window_ms;
        for stream in [&mut self.app, &mut self.server, &mut self.task] {
            stream.retain(|e| e.timestamp >= cutoff);
        }
    }

    /// Clear all three streams. Used on session restart and pipeline
    /// disable.
    pub fn reset(&mut self) {
        self.app.clear();
        self.server.clear();
        self.task.clear();
    }

    /// Merged view across all streams, (timestamp, id) ascending.
    /// This is the order snapshots present to the renderer.
    pub fn timeline(&self) -> Vec<&LogEntry> {
        let mut all: Vec<&LogEntry> = self
            .app
            .iter()
            .chain(self.server.iter())
            .chain(self.task.iter())
            .collect();
        all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        all
    }

    pub fn len(&self) -> usize {
        self.app.len() + self.server.len() + self.task.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RetentionStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_WINDOW_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;
    use std::collections::BTreeSet;

    fn entry(id: &str, ts: i64, msg: &str) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            stream: StreamKind::App,
            severity: Severity::Info,
            category: "app".to_string(),
            timestamp: ts,
            message: msg.to_string(),
            correlation_ids: BTreeSet::new(),
            task_id: None,
            context: serde_json::Map::new(),
            retry_count: None,
            is_duplicate: false,
        }
    }

    #[test]
    fn test_merge_upserts_by_id_last_write_wins() {
        let mut store = RetentionStore::new(60_000);
        store.merge(StreamKind::App, vec![entry("1", 1000, "a")], 1000);
        store.merge(StreamKind::App, vec![entry("1", 1000, "b")], 1000);

        let stream = store.stream(StreamKind::App);
        assert_eq!(stream.len(), 1);
        assert_eq!(stream[0].message, "b");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![entry("1", 1000, "a"), entry("2", 2000, "b")];
        let mut once = RetentionStore::new(60_000);
        once.merge(StreamKind::App, batch.clone(), 2000);

        let mut twice = RetentionStore::new(60_000);
        twice.merge(StreamKind::App, batch.clone(), 2000);
        twice.merge(StreamKind::App, batch, 2000);

        assert_eq!(once.stream(StreamKind::App), twice.stream(StreamKind::App));
    }

    #[test]
    fn test_eviction_drops_entries_past_the_window() {
        let mut store = RetentionStore::new(60_000);
        store.merge(StreamKind::App, vec![entry("1", 30_000, "old")], 100_000);
        assert!(store.is_empty());
    }

    #[test]
    fn test_eviction_keeps_entries_at_the_boundary() {
        let mut store = RetentionStore::new(60_000);
        store.merge(StreamKind::App, vec![entry("1", 40_000, "edge")], 100_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_merge_evicts_other_streams_too() {
        let mut store = RetentionStore::new(60_000);
        store.merge(StreamKind::Server, vec![entry("s1", 10_000, "old")], 10_000);
        // A later app merge advances "now" past the server entry's window
        store.merge(StreamKind::App, vec![entry("a1", 100_000, "new")], 100_000);
        assert!(store.stream(StreamKind::Server).is_empty());
        assert_eq!(store.stream(StreamKind::App).len(), 1);
    }

    #[test]
    fn test_streams_sorted_by_timestamp_then_id() {
        let mut store = RetentionStore::new(600_000);
        store.merge(
            StreamKind::App,
            vec![entry("b", 2000, "x"), entry("a", 2000, "y"), entry("c", 1000, "z")],
            2000,
        );
        let ids: Vec<&str> = store
            .stream(StreamKind::App)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_timeline_merges_across_streams() {
        let mut store = RetentionStore::new(600_000);
        store.merge(StreamKind::App, vec![entry("a", 3000, "app")], 3000);
        store.merge(StreamKind::Server, vec![entry("s", 1000, "srv")], 3000);
        store.merge(StreamKind::Task, vec![entry("t", 2000, "task")], 3000);

        let order: Vec<&str> = store.timeline().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["s", "t", "a"]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = RetentionStore::new(600_000);
        store.merge(StreamKind::App, vec![entry("a", 1000, "x")], 1000);
        store.merge(StreamKind::Task, vec![entry("t", 1000, "y")], 1000);
        store.reset();
        assert!(store.is_empty());
        assert!(store.timeline().is_empty());
    }
}
