use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ApprovalLevel;

/// One committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: String,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<String>,
    pub reason: Option<String>,
    /// Whole days spent in the previous status, when it is known.
    pub duration_days: Option<i64>,
}

impl StatusHistoryEntry {
    /// Entry for a change committed at `changed_at`, measuring the time since
    /// `previous` was recorded.
    #[must_use]
    pub fn new(
        status: impl Into<String>,
        changed_at: DateTime<Utc>,
        changed_by: Option<String>,
        reason: Option<String>,
        previous: Option<&Self>,
    ) -> Self {
        Self {
            status: status.into(),
            changed_at,
            changed_by,
            reason,
            duration_days: previous.map(|prev| (changed_at - prev.changed_at).num_days()),
        }
    }
}

/// Read model of an entity's workflow position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub current_status: String,
    /// `false` when the current status is not part of the lifecycle; such
    /// entities allow no transitions.
    pub recognized: bool,
    pub allowed_transitions: Vec<String>,
    pub requires_approval: bool,
    pub approval_level: Option<ApprovalLevel>,
    pub status_history: Vec<StatusHistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn duration_counts_whole_days_since_previous() {
        let first = StatusHistoryEntry::new(
            "in_progress",
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            Some("u1".into()),
            None,
            None,
        );
        assert_eq!(first.duration_days, None);

        let second = StatusHistoryEntry::new(
            "on_hold",
            Utc.with_ymd_and_hms(2026, 3, 4, 7, 0, 0).unwrap(),
            None,
            Some("waiting on permits".into()),
            Some(&first),
        );
        assert_eq!(second.duration_days, Some(2));
    }
}
