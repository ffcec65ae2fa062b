// Event normalization - raw wire records to canonical LogEntry
//
// The debug stream multiplexes three record shapes over one wire:
//
// 1. Structured app log entries (objects with id/severity/message/context)
// 2. Free-text server log lines (bare JSON strings, or objects with a line)
// 3. Task status updates (objects with task_id/status/retries)
//
// Normalization is a pure function: one raw `serde_json::Value` plus the
// ingestion wall-clock time in, `Option<LogEntry>` out. `None` means the
// record carries no usable message and no identifying fields and is dropped.

use crate::events::{LogEntry, Severity, StreamKind};
use serde_json::Value;
use std::collections::BTreeSet;

/// Candidate keys scanned for correlation identifiers, in the order they
/// were observed across payload shapes.
const CORRELATION_KEYS: &[&str] = &[
    "request_id",
    "job_id",
    "actor",
    "correlation_id",
    "task_id",
    "trace_id",
    "span_id",
    "parent_request_id",
];

/// Candidate timestamp fields, best first.
const TIMESTAMP_KEYS: &[&str] = &["last_seen", "first_seen", "timestamp", "time", "created_at"];

/// Normalize one raw record into a canonical entry.
///
/// `ingested_at_ms` is the wall-clock fallback used when no payload field
/// yields a parsable timestamp. The fallback keeps ordering total, at the
/// cost of a known edge case: a late-arriving historical record with a
/// broken timestamp sorts as "now".
pub fn normalize(raw: &Value, ingested_at_ms: i64) -> Option<LogEntry> {
    // Bare strings are free-text server log lines
    if let Some(line) = raw.as_str() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        return Some(server_line_entry(trimmed, ingested_at_ms));
    }

    let obj = raw.as_object()?;
    let stream = classify(raw);

    let task_id = find_str_deep(raw, "task_id").map(str::to_string);
    let explicit_id = first_str(obj, &["id", "log_id", "entry_id"]).map(str::to_string);
    let message = resolve_message(raw, stream);

    // No message and nothing to identify the record by: drop it
    if message.is_none() && explicit_id.is_none() && task_id.is_none() {
        return None;
    }

    let severity = resolve_severity(raw);
    let timestamp = resolve_timestamp(raw, ingested_at_ms);
    let category = resolve_category(raw, stream, task_id.is_some());
    let message = message.unwrap_or_else(|| format!("({} event)", stream.default_category()));
    let id = explicit_id
        .or_else(|| task_id.clone())
        .unwrap_or_else(|| synthetic_id(stream, timestamp, &message));

    Some(LogEntry {
        id,
        stream,
        severity,
        category,
        timestamp,
        message,
        correlation_ids: collect_correlation_ids(raw),
        task_id,
        context: merged_context(raw),
        retry_count: first_u64(obj, &["retry_count", "retries"])
            .and_then(|n| u32::try_from(n).ok()),
        is_duplicate: first_bool(obj, &["is_duplicate", "duplicate"]).unwrap_or(false),
    })
}

/// Determine which logical stream a raw record belongs to.
///
/// The tag is in-band: an explicit `source`/`kind`/`stream` field wins,
/// bare strings are server lines, a task id implies a task update, and
/// everything else is an app log entry.
pub fn classify(raw: &Value) -> StreamKind {
    if raw.is_string() {
        return StreamKind::Server;
    }
    let Some(obj) = raw.as_object() else {
        return StreamKind::App;
    };
    if let Some(tag) = first_str(obj, &["source", "kind", "stream"]) {
        match tag.to_ascii_lowercase().as_str() {
            "server" => return StreamKind::Server,
            "task" | "job" => return StreamKind::Task,
            "app" | "application" => return StreamKind::App,
            _ => {}
        }
    }
    if find_str_deep(raw, "task_id").is_some() && obj.contains_key("status") {
        return StreamKind::Task;
    }
    StreamKind::App
}

fn server_line_entry(line: &str, ingested_at_ms: i64) -> LogEntry {
    // Server lines carry no id of their own; a deterministic hash of the
    // content dedupes re-delivered lines across reconnects.
    let id = synthetic_id(StreamKind::Server, ingested_at_ms, line);
    LogEntry {
        id,
        stream: StreamKind::Server,
        severity: sniff_line_severity(line),
        category: "server".to_string(),
        timestamp: ingested_at_ms,
        message: line.to_string(),
        correlation_ids: BTreeSet::new(),
        task_id: None,
        context: serde_json::Map::new(),
        retry_count: None,
        is_duplicate: false,
    }
}

/// Cheap severity sniff for free-text server lines.
fn sniff_line_severity(line: &str) -> Severity {
    let lower = line.to_ascii_lowercase();
    if lower.contains("critical") || lower.contains("fatal") {
        Severity::Critical
    } else if lower.contains("error") {
        Severity::Error
    } else if lower.contains("warn") {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Severity resolution order: explicit `severity` → `level` → `status`
/// (failed/failure map to error) → nested `context.severity` /
/// `payload.severity` → default `info`.
fn resolve_severity(raw: &Value) -> Severity {
    let Some(obj) = raw.as_object() else {
        return Severity::Info;
    };
    for key in ["severity", "level", "status"] {
        if let Some(s) = obj.get(key).and_then(Value::as_str) {
            if let Some(sev) = Severity::parse(s) {
                return sev;
            }
        }
    }
    for nest in ["context", "payload"] {
        if let Some(s) = obj
            .get(nest)
            .and_then(|v| v.get("severity"))
            .and_then(Value::as_str)
        {
            if let Some(sev) = Severity::parse(s) {
                return sev;
            }
        }
    }
    Severity::Info
}

fn resolve_category(raw: &Value, stream: StreamKind, has_task_id: bool) -> String {
    if let Some(c) = raw.get("category").and_then(Value::as_str) {
        if !c.trim().is_empty() {
            return c.trim().to_string();
        }
    }
    if has_task_id {
        return "task".to_string();
    }
    stream.default_category().to_string()
}

/// First parsable of the candidate timestamp fields; epoch millis, epoch
/// seconds, and RFC 3339 strings are accepted. Falls back to the ingestion
/// clock so the sort order never degenerates.
fn resolve_timestamp(raw: &Value, ingested_at_ms: i64) -> i64 {
    for key in TIMESTAMP_KEYS {
        if let Some(ts) = raw.get(*key).and_then(parse_timestamp) {
            return ts;
        }
    }
    ingested_at_ms
}

fn parse_timestamp(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(normalize_epoch(n));
    }
    if let Some(f) = v.as_f64() {
        return Some(normalize_epoch(f as i64));
    }
    let s = v.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(normalize_epoch(n));
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Heuristic: epoch values below ~1e11 are seconds, not millis
/// (1e11 ms is 1973; 1e11 s is the year 5138).
fn normalize_epoch(n: i64) -> i64 {
    if n != 0 && n.abs() < 100_000_000_000 {
        n * 1000
    } else {
        n
    }
}

fn resolve_message(raw: &Value, stream: StreamKind) -> Option<String> {
    let obj = raw.as_object()?;
    if let Some(m) = first_str(obj, &["message", "msg", "text", "line"]) {
        if !m.trim().is_empty() {
            return Some(m.to_string());
        }
    }
    if let Some(e) = obj.get("error").and_then(Value::as_str) {
        if !e.trim().is_empty() {
            return Some(e.to_string());
        }
    }
    // Task updates often carry only a status; synthesize a readable line
    if stream == StreamKind::Task {
        if let Some(status) = obj.get("status").and_then(Value::as_str) {
            let name = first_str(obj, &["name", "task", "type"]).unwrap_or("task");
            return Some(format!("{} {}", name, status));
        }
    }
    None
}

/// Union of correlation identifiers across the top-level record, its
/// `context`, its `payload`, and an optional `correlation_ids` array.
fn collect_correlation_ids(raw: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for scope in [Some(raw), raw.get("context"), raw.get("payload")] {
        let Some(Value::Object(obj)) = scope else {
            continue;
        };
        for key in CORRELATION_KEYS {
            if let Some(s) = obj.get(*key).and_then(Value::as_str) {
                if !s.is_empty() {
                    ids.insert(s.to_string());
                }
            }
        }
    }
    if let Some(arr) = raw.get("correlation_ids").and_then(Value::as_array) {
        for v in arr {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    ids.insert(s.to_string());
                }
            }
        }
    }
    ids
}

/// Merge `context` and `payload` objects into one metadata map.
/// Used only for detail rendering and full-text filtering.
fn merged_context(raw: &Value) -> serde_json::Map<String, Value> {
    let mut merged = serde_json::Map::new();
    for nest in ["context", "payload"] {
        if let Some(Value::Object(obj)) = raw.get(nest) {
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    // Keep the raw event type visible for the full-text index
    if let Some(t) = raw.get("event_type").or_else(|| raw.get("type")) {
        merged.insert("event_type".to_string(), t.clone());
    }
    if let Some(stack) = raw.get("stack") {
        merged.insert("stack".to_string(), stack.clone());
    }
    if let Some(err) = raw.get("error") {
        merged.insert("error".to_string(), err.clone());
    }
    merged
}

/// Deterministic id for records that carry none of their own.
/// Stable across re-ingestion of the same content, which keeps the
/// store's upsert idempotent.
fn synthetic_id(stream: StreamKind, timestamp: i64, message: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    message.hash(&mut hasher);
    format!(
        "{}-{}-{:016x}",
        stream.default_category(),
        timestamp,
        hasher.finish()
    )
}

fn first_str<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

fn first_u64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64))
}

fn first_bool(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_bool))
}

/// Look up a string field at the top level, then under `context` and
/// `payload`.
fn find_str_deep<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    for scope in [Some(raw), raw.get("context"), raw.get("payload")] {
        if let Some(s) = scope.and_then(|v| v.get(key)).and_then(Value::as_str) {
            return Some(s);
        }
    }
    None
}
