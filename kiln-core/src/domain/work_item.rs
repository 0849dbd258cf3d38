use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{WorkItemId, WorkerId};

/// Lifecycle status of a work item.
///
/// State machine:
///   generating|queued → assigned|in_progress (scheduler spawn)
///   in_progress → completed | queued (fail/kill, retry budget remaining)
///   in_progress|queued|generating → failed (retry budget exhausted, or kill)
///   generating|queued → cancelled
///
/// Terminal states (`completed`, `failed`, `cancelled`) are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Generating,
    Queued,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl WorkItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Generating | Self::Queued)
    }

    pub fn is_requeueable(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(Self::Generating),
            "queued" => Some(Self::Queued),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work item: an original execution task, or a follow-up
/// verification task bound to the PR an execution item produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    Execution,
    Verification,
}

impl WorkItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Verification => "verification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "execution" => Some(Self::Execution),
            "verification" => Some(Self::Verification),
            _ => None,
        }
    }
}

impl fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Ordered `Critical > High > Medium > Low` for the
/// queue's selection predicate (derive order matches declaration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled unit: repository × specification × type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: WorkItemId,
    pub repo: String,
    pub branch: String,
    #[serde(rename = "type")]
    pub item_type: WorkItemType,
    pub spec: Option<String>,
    pub description: Option<String>,
    pub status: WorkItemStatus,
    pub priority: Priority,
    pub worker_id: Option<WorkerId>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub parent_work_item_id: Option<WorkItemId>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub verification_passed: Option<bool>,
    pub source: Option<String>,
    pub source_ref: Option<String>,
    pub error: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// `maxRetries(type)` from §4.5/§4.6 — execution items use the fixed
    /// default of 3; verification items use the configurable
    /// `verificationMaxRetries` (also defaulting to 3).
    pub fn max_retries(&self, verification_max_retries: u32) -> u32 {
        match self.item_type {
            WorkItemType::Execution => 3,
            WorkItemType::Verification => verification_max_retries,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkItemStatus::Queued
            && self.next_retry_at.map(|t| now >= t).unwrap_or(true)
    }
}
