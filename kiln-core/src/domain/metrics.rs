use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{WorkItemId, WorkerId};

/// An append-only row recorded when a worker completes (successfully or
/// not). Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    pub id: uuid::Uuid,
    pub work_item_id: WorkItemId,
    pub worker_id: WorkerId,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_seconds: u64,
    pub files_modified: u32,
    pub tests_run: u32,
    pub tests_passed: u32,
    pub iteration: u32,
    pub recorded_at: DateTime<Utc>,
}
