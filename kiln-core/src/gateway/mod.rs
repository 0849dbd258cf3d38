//! Persistence Gateway — typed access to the durable relational store.
//!
//! Offers `insert`/`update`/`query` plus entity-typed accessors
//! (`get_work_item`, `get_worker`, …), translating the store's snake_case
//! rows into the kernel's domain types. Does not interpret semantics: no
//! caller outside this module ever writes SQL (see `sql.rs`), and no
//! business rule (retry caps, eligibility, lock ownership) lives here.
//!
//! Errors are surfaced verbatim as `KernelError::Transient`, except the
//! well-known unique-violation on `(repo, file_path)`, which the Conflict
//! Arbiter relies on `is_unique_violation` to recognize as "already
//! locked" rather than a generic I/O failure.

mod sql;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::domain::{
    FileLock, Priority, WorkItem, WorkItemId, WorkItemStatus, WorkItemType, Worker, WorkerId,
    WorkerMetrics, WorkerStatus,
};
use crate::error::{KernelError, KernelResult};

#[derive(Clone)]
pub struct PersistenceGateway {
    pool: PgPool,
}

/// True for Postgres' `23505` (`unique_violation`) SQLSTATE — the signal
/// the Conflict Arbiter normalizes into "blocked" rather than a transient
/// failure (§4.1, §7 item 4).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

impl PersistenceGateway {
    pub async fn connect(database_url: &str) -> KernelResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| KernelError::transient(e))?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---- WorkItem ----------------------------------------------------

    pub async fn insert_work_item(&self, item: &WorkItem) -> KernelResult<()> {
        sqlx::query(sql::INSERT_WORK_ITEM)
            .bind(item.id)
            .bind(&item.repo)
            .bind(&item.branch)
            .bind(item.item_type.as_str())
            .bind(&item.spec)
            .bind(&item.description)
            .bind(item.status.as_str())
            .bind(item.priority.as_str())
            .bind(item.worker_id)
            .bind(item.iteration as i64)
            .bind(item.max_iterations as i64)
            .bind(item.retry_count as i64)
            .bind(item.next_retry_at)
            .bind(item.parent_work_item_id)
            .bind(item.pr_number.map(|n| n as i64))
            .bind(&item.pr_url)
            .bind(item.verification_passed)
            .bind(&item.source)
            .bind(&item.source_ref)
            .bind(&item.error)
            .bind(&item.metadata)
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(())
    }

    pub async fn get_work_item(&self, id: WorkItemId) -> KernelResult<Option<WorkItem>> {
        let row = sqlx::query(sql::SELECT_WORK_ITEM_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.map(|r| work_item_from_row(&r)).transpose()
    }

    pub async fn get_work_item_by_branch(
        &self,
        repo: &str,
        branch: &str,
    ) -> KernelResult<Option<WorkItem>> {
        let row = sqlx::query(sql::SELECT_WORK_ITEM_BY_BRANCH)
            .bind(repo)
            .bind(branch)
            .fetch_optional(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.map(|r| work_item_from_row(&r)).transpose()
    }

    pub async fn list_work_items(
        &self,
        type_filter: Option<WorkItemType>,
    ) -> KernelResult<Vec<WorkItem>> {
        let rows = match type_filter {
            Some(t) => sqlx::query(sql::SELECT_WORK_ITEMS_BY_TYPE)
                .bind(t.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(KernelError::transient)?,
            None => sqlx::query(sql::SELECT_ALL_WORK_ITEMS)
                .fetch_all(&self.pool)
                .await
                .map_err(KernelError::transient)?,
        };
        rows.iter().map(work_item_from_row).collect()
    }

    /// §4.4's selection predicate: `status = queued` and `next_retry_at`
    /// unset or elapsed, ordered priority-descending then FIFO.
    pub async fn list_eligible_work_items(&self, now: DateTime<Utc>) -> KernelResult<Vec<WorkItem>> {
        let rows = sqlx::query(sql::SELECT_ELIGIBLE_WORK_ITEMS)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        rows.iter().map(work_item_from_row).collect()
    }

    pub async fn find_verification_chain(
        &self,
        parent_id: WorkItemId,
        pr_number: u64,
    ) -> KernelResult<Option<WorkItem>> {
        let row = sqlx::query(sql::SELECT_VERIFICATION_FOR_PARENT_PR)
            .bind(parent_id)
            .bind(pr_number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.map(|r| work_item_from_row(&r)).transpose()
    }

    pub async fn update_work_item_status(
        &self,
        id: WorkItemId,
        status: WorkItemStatus,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_STATUS)
            .bind(id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn update_work_item_spawned(
        &self,
        id: WorkItemId,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_SPAWNED)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn rollback_spawn(&self, id: WorkItemId, now: DateTime<Utc>) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_ROLLBACK_SPAWN)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn cancel_work_item(&self, id: WorkItemId, now: DateTime<Utc>) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_CANCEL)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn requeue_work_item(&self, id: WorkItemId, now: DateTime<Utc>) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_REQUEUE)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn complete_execution_work_item(
        &self,
        id: WorkItemId,
        pr_url: Option<&str>,
        pr_number: Option<u64>,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_COMPLETE_EXECUTION)
            .bind(id)
            .bind(pr_url)
            .bind(pr_number.map(|n| n as i64))
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn complete_verification_work_item(
        &self,
        id: WorkItemId,
        passed: Option<bool>,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_COMPLETE_VERIFICATION)
            .bind(id)
            .bind(passed)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn merge_work_item_metadata(
        &self,
        id: WorkItemId,
        metadata: &Value,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_MERGE_METADATA)
            .bind(id)
            .bind(metadata)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn fail_work_item_retry(
        &self,
        id: WorkItemId,
        retry_count: u32,
        iteration: u32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_FAIL_RETRY)
            .bind(id)
            .bind(retry_count as i64)
            .bind(iteration as i64)
            .bind(next_retry_at)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn fail_work_item_terminal(
        &self,
        id: WorkItemId,
        error: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_FAIL_TERMINAL)
            .bind(id)
            .bind(error)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn append_work_item_error(
        &self,
        id: WorkItemId,
        note: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORK_ITEM_APPEND_ERROR)
            .bind(id)
            .bind(note)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    // ---- Worker --------------------------------------------------------

    pub async fn insert_worker(&self, worker: &Worker) -> KernelResult<()> {
        sqlx::query(sql::INSERT_WORKER)
            .bind(worker.id)
            .bind(worker.work_item_id)
            .bind(worker.status.as_str())
            .bind(worker.iteration as i64)
            .bind(worker.last_heartbeat)
            .bind(worker.started_at)
            .bind(worker.completed_at)
            .bind(&worker.container_id)
            .bind(&worker.error)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(())
    }

    pub async fn get_worker(&self, id: WorkerId) -> KernelResult<Option<Worker>> {
        let row = sqlx::query(sql::SELECT_WORKER_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.map(|r| worker_from_row(&r)).transpose()
    }

    pub async fn get_active_worker_for_work_item(
        &self,
        work_item_id: WorkItemId,
    ) -> KernelResult<Option<Worker>> {
        let row = sqlx::query(sql::SELECT_ACTIVE_WORKER_FOR_WORK_ITEM)
            .bind(work_item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.map(|r| worker_from_row(&r)).transpose()
    }

    pub async fn list_workers(&self) -> KernelResult<Vec<Worker>> {
        let rows = sqlx::query(sql::SELECT_ALL_WORKERS)
            .fetch_all(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        rows.iter().map(worker_from_row).collect()
    }

    pub async fn list_active_workers(&self) -> KernelResult<Vec<Worker>> {
        let rows = sqlx::query(sql::SELECT_ACTIVE_WORKERS)
            .fetch_all(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        rows.iter().map(worker_from_row).collect()
    }

    pub async fn delete_worker(&self, id: WorkerId) -> KernelResult<u64> {
        let res = sqlx::query(sql::DELETE_WORKER)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn set_worker_container_id(
        &self,
        id: WorkerId,
        container_id: &str,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORKER_CONTAINER_ID)
            .bind(id)
            .bind(container_id)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    /// Conditional: only takes effect if the worker is still active.
    /// Returns 0 rows affected when it is not — callers surface that as
    /// "not active" (§8 property 10).
    pub async fn advance_worker_heartbeat(
        &self,
        id: WorkerId,
        iteration: u32,
        now: DateTime<Utc>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORKER_TO_RUNNING)
            .bind(id)
            .bind(iteration as i64)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn finalize_worker(
        &self,
        id: WorkerId,
        status: WorkerStatus,
        completed_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::UPDATE_WORKER_TERMINAL)
            .bind(id)
            .bind(status.as_str())
            .bind(completed_at)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    // ---- FileLock -------------------------------------------------------

    /// Returns `true` if this call inserted the row (lock newly acquired),
    /// `false` if a row for `(repo, file_path)` already existed (caller
    /// must re-read to decide "already mine" vs "blocked").
    pub async fn try_insert_file_lock(
        &self,
        worker_id: WorkerId,
        repo: &str,
        file_path: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<bool> {
        let res = sqlx::query(sql::INSERT_FILE_LOCK)
            .bind(worker_id)
            .bind(repo)
            .bind(file_path)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get_lock_holder(&self, repo: &str, file_path: &str) -> KernelResult<Option<FileLock>> {
        let row = sqlx::query(sql::SELECT_FILE_LOCK)
            .bind(repo)
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.map(|r| file_lock_from_row(&r)).transpose()
    }

    pub async fn get_locks_for_worker(&self, worker_id: WorkerId) -> KernelResult<Vec<FileLock>> {
        let rows = sqlx::query(sql::SELECT_FILE_LOCKS_FOR_WORKER)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        rows.iter().map(file_lock_from_row).collect()
    }

    pub async fn delete_file_lock_owned(
        &self,
        worker_id: WorkerId,
        repo: &str,
        file_path: &str,
    ) -> KernelResult<u64> {
        let res = sqlx::query(sql::DELETE_FILE_LOCK_OWNED)
            .bind(worker_id)
            .bind(repo)
            .bind(file_path)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    pub async fn delete_all_file_locks_for_worker(&self, worker_id: WorkerId) -> KernelResult<u64> {
        let res = sqlx::query(sql::DELETE_ALL_FILE_LOCKS_FOR_WORKER)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(res.rows_affected())
    }

    // ---- Metrics ---------------------------------------------------------

    pub async fn insert_worker_metrics(&self, metrics: &WorkerMetrics) -> KernelResult<()> {
        sqlx::query(sql::INSERT_WORKER_METRICS)
            .bind(metrics.id)
            .bind(metrics.work_item_id)
            .bind(metrics.worker_id)
            .bind(metrics.tokens_in as i64)
            .bind(metrics.tokens_out as i64)
            .bind(metrics.duration_seconds as i64)
            .bind(metrics.files_modified as i64)
            .bind(metrics.tests_run as i64)
            .bind(metrics.tests_passed as i64)
            .bind(metrics.iteration as i64)
            .bind(metrics.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        Ok(())
    }

    // ---- Aggregates (Metrics Aggregator) --------------------------------

    pub async fn count_active_workers(&self) -> KernelResult<i64> {
        self.count_query(sql::COUNT_ACTIVE_WORKERS).await
    }

    pub async fn count_queued_work_items(&self) -> KernelResult<i64> {
        self.count_query(sql::COUNT_QUEUED_WORK_ITEMS).await
    }

    pub async fn count_completed_since(&self, since: DateTime<Utc>) -> KernelResult<i64> {
        let row = sqlx::query(sql::COUNT_COMPLETED_TODAY)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.try_get::<i64, _>("count").map_err(KernelError::transient)
    }

    pub async fn count_failed_since(&self, since: DateTime<Utc>) -> KernelResult<i64> {
        let row = sqlx::query(sql::COUNT_FAILED_TODAY)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.try_get::<i64, _>("count").map_err(KernelError::transient)
    }

    pub async fn sum_iterations_since(&self, since: DateTime<Utc>) -> KernelResult<i64> {
        let row = sqlx::query(sql::SUM_ITERATIONS_TODAY)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.try_get::<i64, _>("total").map_err(KernelError::transient)
    }

    pub async fn avg_completion_duration_seconds(&self) -> KernelResult<f64> {
        let row = sqlx::query(sql::AVG_COMPLETION_DURATION_SECONDS)
            .fetch_one(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.try_get::<f64, _>("avg_duration")
            .map_err(KernelError::transient)
    }

    pub async fn count_work_items_by_status(&self) -> KernelResult<Vec<(String, i64)>> {
        let rows = sqlx::query(sql::COUNT_WORK_ITEMS_BY_STATUS)
            .fetch_all(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        rows.iter()
            .map(|r| {
                Ok((
                    r.try_get::<String, _>("status").map_err(KernelError::transient)?,
                    r.try_get::<i64, _>("count").map_err(KernelError::transient)?,
                ))
            })
            .collect()
    }

    pub async fn count_work_items_by_priority(&self) -> KernelResult<Vec<(String, i64)>> {
        let rows = sqlx::query(sql::COUNT_WORK_ITEMS_BY_PRIORITY)
            .fetch_all(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        rows.iter()
            .map(|r| {
                Ok((
                    r.try_get::<String, _>("priority").map_err(KernelError::transient)?,
                    r.try_get::<i64, _>("count").map_err(KernelError::transient)?,
                ))
            })
            .collect()
    }

    async fn count_query(&self, query: &str) -> KernelResult<i64> {
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .await
            .map_err(KernelError::transient)?;
        row.try_get::<i64, _>("count").map_err(KernelError::transient)
    }
}

fn work_item_from_row(row: &sqlx::postgres::PgRow) -> KernelResult<WorkItem> {
    let status_str: String = row.try_get("status").map_err(KernelError::internal)?;
    let status = WorkItemStatus::parse(&status_str)
        .ok_or_else(|| KernelError::internal(anyhow::anyhow!("unknown work item status: {status_str}")))?;
    let type_str: String = row.try_get("type").map_err(KernelError::internal)?;
    let item_type = WorkItemType::parse(&type_str)
        .ok_or_else(|| KernelError::internal(anyhow::anyhow!("unknown work item type: {type_str}")))?;
    let priority_str: String = row.try_get("priority").map_err(KernelError::internal)?;
    let priority = Priority::parse(&priority_str)
        .ok_or_else(|| KernelError::internal(anyhow::anyhow!("unknown priority: {priority_str}")))?;

    Ok(WorkItem {
        id: row.try_get("id").map_err(KernelError::internal)?,
        repo: row.try_get("repo").map_err(KernelError::internal)?,
        branch: row.try_get("branch").map_err(KernelError::internal)?,
        item_type,
        spec: row.try_get("spec").map_err(KernelError::internal)?,
        description: row.try_get("description").map_err(KernelError::internal)?,
        status,
        priority,
        worker_id: row.try_get("worker_id").map_err(KernelError::internal)?,
        iteration: row.try_get::<i64, _>("iteration").map_err(KernelError::internal)? as u32,
        max_iterations: row
            .try_get::<i64, _>("max_iterations")
            .map_err(KernelError::internal)? as u32,
        retry_count: row
            .try_get::<i64, _>("retry_count")
            .map_err(KernelError::internal)? as u32,
        next_retry_at: row.try_get("next_retry_at").map_err(KernelError::internal)?,
        parent_work_item_id: row
            .try_get("parent_work_item_id")
            .map_err(KernelError::internal)?,
        pr_number: row
            .try_get::<Option<i64>, _>("pr_number")
            .map_err(KernelError::internal)?
            .map(|n| n as u64),
        pr_url: row.try_get("pr_url").map_err(KernelError::internal)?,
        verification_passed: row
            .try_get("verification_passed")
            .map_err(KernelError::internal)?,
        source: row.try_get("source").map_err(KernelError::internal)?,
        source_ref: row.try_get("source_ref").map_err(KernelError::internal)?,
        error: row.try_get("error").map_err(KernelError::internal)?,
        metadata: row.try_get("metadata").map_err(KernelError::internal)?,
        created_at: row.try_get("created_at").map_err(KernelError::internal)?,
        updated_at: row.try_get("updated_at").map_err(KernelError::internal)?,
    })
}

fn worker_from_row(row: &sqlx::postgres::PgRow) -> KernelResult<Worker> {
    let status_str: String = row.try_get("status").map_err(KernelError::internal)?;
    let status = WorkerStatus::parse(&status_str)
        .ok_or_else(|| KernelError::internal(anyhow::anyhow!("unknown worker status: {status_str}")))?;

    Ok(Worker {
        id: row.try_get("id").map_err(KernelError::internal)?,
        work_item_id: row.try_get("work_item_id").map_err(KernelError::internal)?,
        status,
        iteration: row.try_get::<i64, _>("iteration").map_err(KernelError::internal)? as u32,
        last_heartbeat: row.try_get("last_heartbeat").map_err(KernelError::internal)?,
        started_at: row.try_get("started_at").map_err(KernelError::internal)?,
        completed_at: row.try_get("completed_at").map_err(KernelError::internal)?,
        container_id: row.try_get("container_id").map_err(KernelError::internal)?,
        error: row.try_get("error").map_err(KernelError::internal)?,
    })
}

fn file_lock_from_row(row: &sqlx::postgres::PgRow) -> KernelResult<FileLock> {
    Ok(FileLock {
        worker_id: row.try_get("worker_id").map_err(KernelError::internal)?,
        repo: row.try_get("repo").map_err(KernelError::internal)?,
        file_path: row.try_get("file_path").map_err(KernelError::internal)?,
        acquired_at: row.try_get("acquired_at").map_err(KernelError::internal)?,
    })
}
