// Filter engine - pure predicate evaluation over timeline entries
//
// A `FilterSpec` narrows the timeline along five independent dimensions
// without ever re-fetching from the server: severity, category, correlation
// substring, task substring, and a free-text query. Evaluation is pure and
// stateless; checks run cheapest-first and short-circuit.

use crate::events::{LogEntry, Severity};
use serde::{Deserialize, Serialize};

/// Severity constraint. `Exact(Error)` also matches `Critical` so the
/// console's "errors" view includes everything that went wrong.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityFilter {
    #[default]
    All,
    Exact(Severity),
}

impl SeverityFilter {
    fn matches(&self, severity: Severity) -> bool {
        match self {
            SeverityFilter::All => true,
            SeverityFilter::Exact(Severity::Error) => severity.is_failure(),
            SeverityFilter::Exact(wanted) => severity == *wanted,
        }
    }
}

/// Category constraint: exact match, `All` means no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryFilter {
    #[default]
    All,
    Exact(String),
}

impl CategoryFilter {
    fn matches(&self, category: &str) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Exact(wanted) => wanted.eq_ignore_ascii_case(category),
        }
    }
}

/// Multi-dimensional filter over the timeline. All substring dimensions
/// are case-insensitive; empty strings mean no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub severity: SeverityFilter,
    pub category: CategoryFilter,
    pub correlation: String,
    pub task: String,
    pub query: String,
}

/// Partial update to a `FilterSpec`. Unset fields leave the current value
/// untouched; the controller treats a no-change patch as a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterPatch {
    pub severity: Option<SeverityFilter>,
    pub category: Option<CategoryFilter>,
    pub correlation: Option<String>,
    pub task: Option<String>,
    pub query: Option<String>,
}

impl FilterSpec {
    /// Apply a patch, returning true if anything actually changed.
    pub fn apply(&mut self, patch: FilterPatch) -> bool {
        let before = self.clone();
        if let Some(severity) = patch.severity {
            self.severity = severity;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(correlation) = patch.correlation {
            self.correlation = correlation;
        }
        if let Some(task) = patch.task {
            self.task = task;
        }
        if let Some(query) = patch.query {
            self.query = query;
        }
        *self != before
    }

    /// True when no dimension constrains anything.
    pub fn is_unconstrained(&self) -> bool {
        *self == FilterSpec::default()
    }
}

/// Does `entry` pass `spec`? Checks are ordered cheapest-first:
/// severity, category, correlation substring, task substring, full-text.
pub fn matches(entry: &LogEntry, spec: &FilterSpec) -> bool {
    if !spec.severity.matches(entry.severity) {
        return false;
    }
    if !spec.category.matches(&entry.category) {
        return false;
    }
    if !spec.correlation.is_empty() {
        let needle = spec.correlation.to_lowercase();
        let hit = entry
            .correlation_ids
            .iter()
            .any(|id| id.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    if !spec.task.is_empty() {
        let needle = spec.task.to_lowercase();
        let hit = entry
            .task_id
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    if !spec.query.is_empty() {
        return text_index(entry).contains(&spec.query.to_lowercase());
    }
    true
}

/// Lowercased concatenation of the entry's stringifiable fields.
/// The merged context map already carries payload, event type, stack, and
/// error fields from normalization. A field that fails to stringify is
/// simply left out of the index; the predicate never errors.
fn text_index(entry: &LogEntry) -> String {
    let mut index = String::new();
    index.push_str(&entry.message.to_lowercase());
    index.push('\n');
    index.push_str(&entry.category.to_lowercase());
    if !entry.context.is_empty() {
        if let Ok(ctx) = serde_json::to_string(&entry.context) {
            index.push('\n');
            index.push_str(&ctx.to_lowercase());
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamKind;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn entry() -> LogEntry {
        let mut context = serde_json::Map::new();
        context.insert("event_type".to_string(), json!("upload.finished"));
        context.insert("stack".to_string(), json!("at line 7"));
        LogEntry {
            id: "1".to_string(),
            stream: StreamKind::App,
            severity: Severity::Warning,
            category: "uploads".to_string(),
            timestamp: 1000,
            message: "Slow Upload detected".to_string(),
            correlation_ids: BTreeSet::from(["req-ABC".to_string(), "job-9".to_string()]),
            task_id: Some("task-42".to_string()),
            context,
            retry_count: None,
            is_duplicate: false,
        }
    }

    #[test]
    fn test_default_spec_matches_everything() {
        let spec = FilterSpec::default();
        assert!(spec.is_unconstrained());
        assert!(matches(&entry(), &spec));
    }

    #[test]
    fn test_severity_exact_match() {
        let mut spec = FilterSpec::default();
        spec.severity = SeverityFilter::Exact(Severity::Warning);
        assert!(matches(&entry(), &spec));

        spec.severity = SeverityFilter::Exact(Severity::Info);
        assert!(!matches(&entry(), &spec));
    }

    #[test]
    fn test_error_filter_includes_critical() {
        let mut e = entry();
        e.severity = Severity::Critical;
        let mut spec = FilterSpec::default();
        spec.severity = SeverityFilter::Exact(Severity::Error);
        assert!(matches(&e, &spec));

        // But not the other way around
        e.severity = Severity::Error;
        spec.severity = SeverityFilter::Exact(Severity::Critical);
        assert!(!matches(&e, &spec));
    }

    #[test]
    fn test_category_exact_case_insensitive() {
        let mut spec = FilterSpec::default();
        spec.category = CategoryFilter::Exact("Uploads".to_string());
        assert!(matches(&entry(), &spec));

        spec.category = CategoryFilter::Exact("upload".to_string());
        assert!(!matches(&entry(), &spec)); // exact, not substring
    }

    #[test]
    fn test_correlation_substring() {
        let mut spec = FilterSpec::default();
        spec.correlation = "abc".to_string();
        assert!(matches(&entry(), &spec));

        spec.correlation = "zzz".to_string();
        assert!(!matches(&entry(), &spec));
    }

    #[test]
    fn test_task_substring_requires_task_id() {
        let mut spec = FilterSpec::default();
        spec.task = "42".to_string();
        assert!(matches(&entry(), &spec));

        let mut e = entry();
        e.task_id = None;
        assert!(!matches(&e, &spec));
    }

    #[test]
    fn test_query_searches_message_and_context() {
        let mut spec = FilterSpec::default();
        spec.query = "slow upload".to_string();
        assert!(matches(&entry(), &spec));

        // event type lives in the merged context
        spec.query = "upload.finished".to_string();
        assert!(matches(&entry(), &spec));

        spec.query = "line 7".to_string();
        assert!(matches(&entry(), &spec));

        spec.query = "no such text".to_string();
        assert!(!matches(&entry(), &spec));
    }

    #[test]
    fn test_patch_apply_reports_change() {
        let mut spec = FilterSpec::default();
        let changed = spec.apply(FilterPatch {
            severity: Some(SeverityFilter::Exact(Severity::Error)),
            ..Default::default()
        });
        assert!(changed);

        // Applying the same value again is a no-op
        let changed = spec.apply(FilterPatch {
            severity: Some(SeverityFilter::Exact(Severity::Error)),
            ..Default::default()
        });
        assert!(!changed);
    }
}
