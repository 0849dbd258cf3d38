use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{WorkItemId, WorkerId};

/// Lifecycle status of a worker (one execution attempt realized as a
/// container).
///
/// State machine:
///   starting → running (register / first heartbeat)
///   starting|running → completed | failed | stuck | killed
/// Terminal states are sinks; no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stuck,
    Killed,
}

impl WorkerStatus {
    /// `status ∈ {starting, running}` — eligible for register/heartbeat/
    /// complete/fail and counted against the at-most-one-active invariant.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stuck | Self::Killed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stuck => "stuck",
            Self::Killed => "killed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stuck" => Some(Self::Stuck),
            "killed" => Some(Self::Killed),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: WorkerId,
    pub work_item_id: WorkItemId,
    pub status: WorkerStatus,
    pub iteration: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub error: Option<String>,
}

impl Worker {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold_seconds: i64) -> bool {
        self.status.is_active()
            && (now - self.last_heartbeat).num_seconds() > stale_threshold_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_valid_statuses() {
        for s in ["starting", "running", "completed", "failed", "stuck", "killed"] {
            assert!(WorkerStatus::parse(s).is_some());
        }
    }

    #[test]
    fn parse_unknown_returns_none() {
        assert_eq!(WorkerStatus::parse("queued"), None);
        assert_eq!(WorkerStatus::parse(""), None);
    }

    #[test]
    fn terminal_and_active_are_complementary() {
        for status in [
            WorkerStatus::Starting,
            WorkerStatus::Running,
            WorkerStatus::Completed,
            WorkerStatus::Failed,
            WorkerStatus::Stuck,
            WorkerStatus::Killed,
        ] {
            assert_ne!(status.is_terminal(), status.is_active());
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        for status in [
            WorkerStatus::Starting,
            WorkerStatus::Running,
            WorkerStatus::Completed,
            WorkerStatus::Failed,
            WorkerStatus::Stuck,
            WorkerStatus::Killed,
        ] {
            let s = status.to_string();
            assert_eq!(WorkerStatus::parse(&s), Some(status));
        }
    }
}
