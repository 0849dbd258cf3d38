//! Named SQL constants for the Persistence Gateway.
//!
//! Kept here, next to the gateway, rather than embedded inline in business
//! logic — §9's design note on string-SQL composition. `gateway/mod.rs`
//! binds parameters and maps rows; no other module in the kernel ever
//! writes SQL.

pub const INSERT_WORK_ITEM: &str = r#"
INSERT INTO work_items (
    id, repo, branch, type, spec, description, status, priority,
    worker_id, iteration, max_iterations, retry_count, next_retry_at,
    parent_work_item_id, pr_number, pr_url, verification_passed,
    source, source_ref, error, metadata, created_at, updated_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
    $17, $18, $19, $20, $21, $22, $23
)
"#;

pub const SELECT_WORK_ITEM_BY_ID: &str = "SELECT * FROM work_items WHERE id = $1";

pub const SELECT_WORK_ITEM_BY_BRANCH: &str =
    "SELECT * FROM work_items WHERE repo = $1 AND branch = $2";

pub const SELECT_WORK_ITEMS_BY_TYPE: &str =
    "SELECT * FROM work_items WHERE type = $1 ORDER BY created_at ASC";

pub const SELECT_ALL_WORK_ITEMS: &str = "SELECT * FROM work_items ORDER BY created_at ASC";

/// §3's at-most-one-verification-chain-per-PR invariant is enforced by
/// checking for an existing row before inserting a new one, rather than a
/// unique index, since the pair is only unique among `verification`-typed
/// rows, not across the whole table.
pub const SELECT_VERIFICATION_FOR_PARENT_PR: &str = r#"
SELECT * FROM work_items
WHERE type = 'verification' AND parent_work_item_id = $1 AND pr_number = $2
"#;

/// Eligible items per §4.4's selection predicate: queued, and either no
/// `next_retry_at` or it has already elapsed. `priority` is stored as its
/// `snake_case` text (`low`/`medium`/`high`/`critical`), which does not
/// sort correctly alphabetically, so the ordering ranks it explicitly
/// before falling back to FIFO by `created_at`.
pub const SELECT_ELIGIBLE_WORK_ITEMS: &str = r#"
SELECT * FROM work_items
WHERE status = 'queued' AND (next_retry_at IS NULL OR next_retry_at <= $1)
ORDER BY
    CASE priority
        WHEN 'critical' THEN 3
        WHEN 'high' THEN 2
        WHEN 'medium' THEN 1
        WHEN 'low' THEN 0
        ELSE -1
    END DESC,
    created_at ASC
"#;

pub const UPDATE_WORK_ITEM_STATUS: &str = r#"
UPDATE work_items SET status = $2, updated_at = $3 WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_SPAWNED: &str = r#"
UPDATE work_items
SET status = 'in_progress', worker_id = $2, updated_at = $3
WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_ROLLBACK_SPAWN: &str = r#"
UPDATE work_items
SET status = 'queued', worker_id = NULL, updated_at = $2
WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_CANCEL: &str = r#"
UPDATE work_items SET status = 'cancelled', updated_at = $2
WHERE id = $1 AND status IN ('generating', 'queued')
"#;

pub const UPDATE_WORK_ITEM_REQUEUE: &str = r#"
UPDATE work_items
SET status = 'queued', retry_count = 0, next_retry_at = NULL,
    worker_id = NULL, error = NULL, updated_at = $2
WHERE id = $1 AND status IN ('failed', 'cancelled')
"#;

pub const UPDATE_WORK_ITEM_COMPLETE_EXECUTION: &str = r#"
UPDATE work_items
SET status = 'completed', pr_url = $2, pr_number = $3, updated_at = $4
WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_COMPLETE_VERIFICATION: &str = r#"
UPDATE work_items
SET status = 'completed', verification_passed = $2, updated_at = $3
WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_MERGE_METADATA: &str = r#"
UPDATE work_items SET metadata = $2, updated_at = $3 WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_FAIL_RETRY: &str = r#"
UPDATE work_items
SET status = 'queued', worker_id = NULL, retry_count = $2, iteration = $3,
    next_retry_at = $4, updated_at = $5
WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_FAIL_TERMINAL: &str = r#"
UPDATE work_items SET status = 'failed', error = $2, updated_at = $3
WHERE id = $1
"#;

pub const UPDATE_WORK_ITEM_APPEND_ERROR: &str = r#"
UPDATE work_items
SET error = COALESCE(error || E'\n', '') || $2, updated_at = $3
WHERE id = $1
"#;

pub const INSERT_WORKER: &str = r#"
INSERT INTO workers (
    id, work_item_id, status, iteration, last_heartbeat, started_at,
    completed_at, container_id, error
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

pub const SELECT_WORKER_BY_ID: &str = "SELECT * FROM workers WHERE id = $1";

pub const SELECT_ACTIVE_WORKER_FOR_WORK_ITEM: &str = r#"
SELECT * FROM workers
WHERE work_item_id = $1 AND status IN ('starting', 'running')
"#;

pub const SELECT_ALL_WORKERS: &str = "SELECT * FROM workers ORDER BY started_at ASC";

pub const SELECT_ACTIVE_WORKERS: &str =
    "SELECT * FROM workers WHERE status IN ('starting', 'running')";

pub const DELETE_WORKER: &str = "DELETE FROM workers WHERE id = $1";

pub const UPDATE_WORKER_CONTAINER_ID: &str = "UPDATE workers SET container_id = $2 WHERE id = $1";

pub const UPDATE_WORKER_TO_RUNNING: &str = r#"
UPDATE workers
SET status = 'running', iteration = $2, last_heartbeat = $3
WHERE id = $1 AND status IN ('starting', 'running')
"#;

/// Conditional update gating every terminal transition on the worker's
/// current status still being active — the sole guard against a late
/// `complete`/`fail` on an already-terminal worker (§5, §8 property 10).
pub const UPDATE_WORKER_TERMINAL: &str = r#"
UPDATE workers
SET status = $2, completed_at = $3, error = $4
WHERE id = $1 AND status IN ('starting', 'running')
"#;

pub const INSERT_FILE_LOCK: &str = r#"
INSERT INTO file_locks (worker_id, repo, file_path, acquired_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (repo, file_path) DO NOTHING
"#;

pub const SELECT_FILE_LOCK: &str =
    "SELECT * FROM file_locks WHERE repo = $1 AND file_path = $2";

pub const SELECT_FILE_LOCKS_FOR_WORKER: &str =
    "SELECT * FROM file_locks WHERE worker_id = $1 ORDER BY acquired_at ASC";

pub const DELETE_FILE_LOCK_OWNED: &str = r#"
DELETE FROM file_locks WHERE worker_id = $1 AND repo = $2 AND file_path = $3
"#;

pub const DELETE_ALL_FILE_LOCKS_FOR_WORKER: &str = "DELETE FROM file_locks WHERE worker_id = $1";

pub const INSERT_WORKER_METRICS: &str = r#"
INSERT INTO worker_metrics (
    id, work_item_id, worker_id, tokens_in, tokens_out, duration_seconds,
    files_modified, tests_run, tests_passed, iteration, recorded_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
"#;

pub const COUNT_WORK_ITEMS_BY_STATUS: &str = r#"
SELECT status, COUNT(*) AS count FROM work_items GROUP BY status
"#;

pub const COUNT_WORK_ITEMS_BY_PRIORITY: &str = r#"
SELECT priority, COUNT(*) AS count FROM work_items GROUP BY priority
"#;

pub const COUNT_ACTIVE_WORKERS: &str =
    "SELECT COUNT(*) AS count FROM workers WHERE status IN ('starting', 'running')";

pub const COUNT_QUEUED_WORK_ITEMS: &str =
    "SELECT COUNT(*) AS count FROM work_items WHERE status = 'queued'";

pub const COUNT_COMPLETED_TODAY: &str = r#"
SELECT COUNT(*) AS count FROM work_items
WHERE status = 'completed' AND updated_at >= $1
"#;

pub const COUNT_FAILED_TODAY: &str = r#"
SELECT COUNT(*) AS count FROM work_items
WHERE status = 'failed' AND updated_at >= $1
"#;

pub const SUM_ITERATIONS_TODAY: &str = r#"
SELECT COALESCE(SUM(iteration), 0) AS total FROM worker_metrics
WHERE recorded_at >= $1
"#;

pub const AVG_COMPLETION_DURATION_SECONDS: &str = r#"
SELECT COALESCE(AVG(duration_seconds), 0) AS avg_duration FROM worker_metrics
"#;
