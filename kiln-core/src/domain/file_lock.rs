use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkerId;

/// An exclusive per-(repo, path) token held by a worker for cooperative
/// mutual exclusion. Uniqueness on `(repo, file_path)` is enforced by the
/// durable store, not by this type — the Conflict Arbiter is the only
/// writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLock {
    pub worker_id: WorkerId,
    pub repo: String,
    pub file_path: String,
    pub acquired_at: DateTime<Utc>,
}
