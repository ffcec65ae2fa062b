// Canonical timeline entry types
//
// Every raw record the server pushes at us (structured app log entries,
// free-text server log lines, task status updates) is normalized into one
// `LogEntry` shape before it touches the store. Downstream code (retention,
// filtering, snapshots, the renderer) only ever sees this shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which logical stream an entry belongs to.
///
/// The retention store keeps one buffer per kind; ids are only unique
/// within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    App,
    Server,
    Task,
}

impl StreamKind {
    /// Default category for entries of this stream that carry none
    pub fn default_category(&self) -> &'static str {
        match self {
            StreamKind::App => "app",
            StreamKind::Server => "server",
            StreamKind::Task => "task",
        }
    }
}

/// Normalized log level, never absent (defaults to `Info` during
/// normalization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Display string for filtering and rendering
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Error and critical entries count as failures for first-failure
    /// detection in snapshots.
    pub fn is_failure(&self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }

    /// Parse a severity string as it appears in raw payloads.
    /// `failed`/`failure` come from task status fields.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "information" => Some(Severity::Info),
            "warn" | "warning" => Some(Severity::Warning),
            "error" | "err" | "failed" | "failure" => Some(Severity::Error),
            "critical" | "fatal" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// One canonical timeline entry, immutable once created.
///
/// `id` is stable for the lifetime of the entry and unique within its
/// stream; re-ingesting the same id replaces the stored entry
/// (last-write-wins) rather than duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub stream: StreamKind,
    pub severity: Severity,
    pub category: String,
    /// Epoch milliseconds; derived from the best available payload field,
    /// falling back to ingestion time so ordering stays total.
    pub timestamp: i64,
    pub message: String,
    /// Request/job/trace/span/actor identifiers collected from the payload.
    /// BTreeSet keeps serialization deterministic; insertion order is
    /// irrelevant to filtering.
    pub correlation_ids: BTreeSet<String>,
    pub task_id: Option<String>,
    /// Merged free-form metadata, kept for detail rendering and full-text
    /// filtering only.
    pub context: serde_json::Map<String, serde_json::Value>,
    pub retry_count: Option<u32>,
    pub is_duplicate: bool,
}

impl LogEntry {
    /// Sort key used everywhere entries are ordered: `(timestamp, id)`
    /// ascending, id as the tie-break.
    pub fn sort_key(&self) -> (i64, &str) {
        (self.timestamp, self.id.as_str())
    }
}
