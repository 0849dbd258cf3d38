//! Worker Supervisor — spawn/register/heartbeat/complete/fail/stuck/kill;
//! container lifecycle; health check (§4.5). The richest subsystem: it is
//! the only component that touches all three stores (durable, fast,
//! container runtime) in a single operation.
//!
//! Grounded on `sipag-core/src/worker/orchestrator.rs`'s full-lifecycle
//! `run_issue()` (state-before-I/O discipline, rollback-without-masking-
//! the-original-error framing) and `sipag-core/src/worker/recovery.rs`'s
//! `recover_and_finalize`/`STALE_HEARTBEAT_THRESHOLD` for `health_check`.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{KernelConfig, EXECUTION_RETRY_BACKOFF_SECONDS};
use crate::conflict_arbiter::ConflictArbiter;
use crate::container_runtime::{ContainerRuntime, ContainerSpec, LogsRequest};
use crate::domain::{Worker, WorkerId, WorkerMetrics, WorkerStatus, WorkItem, WorkItemId, WorkItemType};
use crate::error::{KernelError, KernelResult};
use crate::gateway::PersistenceGateway;
use crate::queue_manager::QueueManager;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    Execution,
    Verification,
}

impl SpawnMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "execution",
            Self::Verification => "verification",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpawnResult {
    pub worker_id: WorkerId,
    pub container_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsInput {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_seconds: u64,
    pub files_modified: u32,
    pub tests_run: u32,
    pub tests_passed: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CompletePayload {
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub verification_passed: Option<bool>,
    pub metrics: Option<MetricsInput>,
    pub review: Option<serde_json::Value>,
    pub verification_enabled: bool,
}

pub struct WorkerSupervisor {
    gateway: Arc<PersistenceGateway>,
    rate_limiter: Arc<RateLimiter>,
    conflict_arbiter: Arc<ConflictArbiter>,
    containers: Arc<dyn ContainerRuntime>,
    queue: Arc<QueueManager>,
    config: KernelConfig,
}

impl WorkerSupervisor {
    pub fn new(
        gateway: Arc<PersistenceGateway>,
        rate_limiter: Arc<RateLimiter>,
        conflict_arbiter: Arc<ConflictArbiter>,
        containers: Arc<dyn ContainerRuntime>,
        queue: Arc<QueueManager>,
        config: KernelConfig,
    ) -> Self {
        Self {
            gateway,
            rate_limiter,
            conflict_arbiter,
            containers,
            queue,
            config,
        }
    }

    /// 1. insert a `starting` Worker row. 2. mark the WorkItem
    /// `in_progress`. 3. create the container. 4. start it — rolling back
    /// the Worker row and WorkItem status on failure of either step,
    /// without masking the originating error. 5. record the returned
    /// `container_id`. 6. record the spawn with the Rate Limiter.
    #[instrument(skip(self, work_item))]
    pub async fn spawn(&self, work_item: &WorkItem, mode: SpawnMode) -> KernelResult<SpawnResult> {
        let now = Utc::now();
        let worker = Worker {
            id: Uuid::new_v4(),
            work_item_id: work_item.id,
            status: WorkerStatus::Starting,
            iteration: 0,
            last_heartbeat: now,
            started_at: now,
            completed_at: None,
            container_id: None,
            error: None,
        };
        self.gateway.insert_worker(&worker).await?;
        self.gateway
            .update_work_item_spawned(work_item.id, worker.id, now)
            .await?;

        let spec = self.container_spec(work_item, &worker, mode);

        let create_result = self.containers.create_container(spec).await;
        let handle = match create_result {
            Ok(handle) => handle,
            Err(err) => {
                self.rollback_spawn(&worker, work_item.id).await;
                return Err(err);
            }
        };

        if let Err(err) = handle.start().await {
            if let Err(e) = handle.stop(0).await {
                warn!(worker_id = %worker.id, error = %e, "rollback: failed to stop never-started container");
            }
            self.rollback_spawn(&worker, work_item.id).await;
            return Err(err);
        }

        self.gateway.set_worker_container_id(worker.id, &handle.id()).await?;
        self.rate_limiter.record_spawn().await?;

        info!(worker_id = %worker.id, work_item_id = %work_item.id, "worker spawned");
        Ok(SpawnResult { worker_id: worker.id, container_id: handle.id() })
    }

    async fn rollback_spawn(&self, worker: &Worker, work_item_id: WorkItemId) {
        let now = Utc::now();
        if let Err(e) = self.gateway.delete_worker(worker.id).await {
            warn!(worker_id = %worker.id, error = %e, "rollback: failed to delete worker row");
        }
        if let Err(e) = self.gateway.rollback_spawn(work_item_id, now).await {
            warn!(work_item_id = %work_item_id, error = %e, "rollback: failed to requeue work item");
        }
    }

    fn container_spec(&self, work_item: &WorkItem, worker: &Worker, mode: SpawnMode) -> ContainerSpec {
        let work_item_json = serde_json::to_string(work_item).unwrap_or_default();
        ContainerSpec {
            image: self.config.worker_image.clone(),
            env: vec![
                ("KILN_WORK_ITEM".to_string(), work_item_json),
                ("KILN_WORKER_ID".to_string(), worker.id.to_string()),
                (
                    "KILN_ORCHESTRATOR_URL".to_string(),
                    container_bridge_url(&self.config.orchestrator_url),
                ),
                ("KILN_MODE".to_string(), mode.as_str().to_string()),
            ],
            memory_limit_mib: self.config.container_memory_mib,
            cpu_cores: self.config.container_cpu_cores,
            pid_limit: self.config.container_pid_limit,
            network: format!("kiln-worker-{}", worker.id),
            auto_remove: false,
        }
    }

    /// A worker self-announces after container startup. If a pre-created
    /// row exists in `{starting, running}`, advance it to `running`;
    /// otherwise create one — this path is preserved as legitimate
    /// self-registration (§9 open question), guarded by the same
    /// at-most-one-active-worker invariant every other transition relies
    /// on, not by extra application-level locking.
    #[instrument(skip(self))]
    pub async fn register(&self, work_item_id: WorkItemId) -> KernelResult<(Worker, WorkItem)> {
        let now = Utc::now();

        let worker = match self.gateway.get_active_worker_for_work_item(work_item_id).await? {
            Some(existing) => {
                self.gateway
                    .advance_worker_heartbeat(existing.id, existing.iteration, now)
                    .await?;
                self.gateway
                    .get_worker(existing.id)
                    .await?
                    .ok_or_else(|| KernelError::internal(anyhow::anyhow!("worker vanished mid-register")))?
            }
            None => {
                let worker = Worker {
                    id: Uuid::new_v4(),
                    work_item_id,
                    status: WorkerStatus::Running,
                    iteration: 0,
                    last_heartbeat: now,
                    started_at: now,
                    completed_at: None,
                    container_id: None,
                    error: None,
                };
                self.gateway.insert_worker(&worker).await?;
                self.gateway.update_work_item_spawned(work_item_id, worker.id, now).await?;
                worker
            }
        };

        let work_item = self.queue.get(work_item_id).await?;
        Ok((worker, work_item))
    }

    /// Conditional update: advances only where the worker is still active;
    /// zero rows affected means "not active" (§8 property 10). Only
    /// records an iteration against the daily budget when it actually
    /// advanced — repeat heartbeats in the same iteration are free.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, worker_id: WorkerId, iteration: u32) -> KernelResult<Worker> {
        let before = self
            .gateway
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("worker {worker_id} not found")))?;

        let rows = self
            .gateway
            .advance_worker_heartbeat(worker_id, iteration, Utc::now())
            .await?;
        if rows == 0 {
            return Err(KernelError::not_found(format!("worker {worker_id} is not active")));
        }

        if iteration > before.iteration {
            self.rate_limiter.record_iteration().await?;
        }

        self.gateway
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| KernelError::internal(anyhow::anyhow!("worker vanished mid-heartbeat")))
    }

    #[instrument(skip(self, payload))]
    pub async fn complete(
        &self,
        worker_id: WorkerId,
        payload: CompletePayload,
    ) -> KernelResult<WorkItem> {
        let worker = self.active_worker(worker_id).await?;
        let now = Utc::now();

        let rows = self
            .gateway
            .finalize_worker(worker_id, WorkerStatus::Completed, now, None)
            .await?;
        if rows == 0 {
            return Err(KernelError::not_found(format!("worker {worker_id} is not active")));
        }

        let work_item = self.queue.get(worker.work_item_id).await?;

        match work_item.item_type {
            WorkItemType::Execution => {
                self.gateway
                    .complete_execution_work_item(
                        work_item.id,
                        payload.pr_url.as_deref(),
                        payload.pr_number,
                        now,
                    )
                    .await?;

                // Nice-to-have side effects are wrapped so their failure
                // never reverses the completion that already landed.
                if let Some(review) = &payload.review {
                    if let Err(e) = self.record_pr_review(&work_item, review).await {
                        warn!(work_item_id = %work_item.id, error = %e, "failed to record PR review");
                    }
                }

                if payload.verification_enabled {
                    if let Some(pr_number) = payload.pr_number {
                        if let Err(e) = self.chain_verification(&work_item, pr_number).await {
                            warn!(work_item_id = %work_item.id, error = %e, "failed to chain verification item");
                        }
                    }
                }
            }
            WorkItemType::Verification => {
                self.gateway
                    .complete_verification_work_item(work_item.id, payload.verification_passed, now)
                    .await?;

                if let Some(parent_id) = work_item.parent_work_item_id {
                    if let Err(e) = self
                        .merge_verification_status(parent_id, &work_item, payload.verification_passed, now)
                        .await
                    {
                        warn!(parent_id = %parent_id, error = %e, "failed to merge verification status into parent");
                    }
                }
            }
        }

        if let Some(metrics) = payload.metrics {
            let row = WorkerMetrics {
                id: Uuid::new_v4(),
                work_item_id: work_item.id,
                worker_id,
                tokens_in: metrics.tokens_in,
                tokens_out: metrics.tokens_out,
                duration_seconds: metrics.duration_seconds,
                files_modified: metrics.files_modified,
                tests_run: metrics.tests_run,
                tests_passed: metrics.tests_passed,
                iteration: worker.iteration,
                recorded_at: now,
            };
            self.gateway.insert_worker_metrics(&row).await?;
        }

        self.conflict_arbiter.release_all_locks(worker_id).await?;
        self.rate_limiter.record_worker_done().await?;

        info!(worker_id = %worker_id, work_item_id = %work_item.id, "worker completed");
        self.queue.get(work_item.id).await
    }

    async fn record_pr_review(&self, work_item: &WorkItem, review: &serde_json::Value) -> KernelResult<()> {
        // `pr_reviews` is collaborator-owned (§2); the kernel only knows
        // enough to pass the review payload through to the gateway if one
        // is configured. Kept as a log line rather than a hard dependency
        // on a `pr_reviews` table so the kernel compiles without it.
        info!(work_item_id = %work_item.id, review = %review, "PR review recorded");
        Ok(())
    }

    async fn chain_verification(&self, parent: &WorkItem, pr_number: u64) -> KernelResult<()> {
        if self
            .gateway
            .find_verification_chain(parent.id, pr_number)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let already_passed = parent
            .metadata
            .get("verificationStatus")
            .and_then(|v| v.get("passed"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if already_passed {
            return Ok(());
        }

        self.queue.add_verification_work_item(parent, pr_number).await?;
        Ok(())
    }

    async fn merge_verification_status(
        &self,
        parent_id: WorkItemId,
        verification_item: &WorkItem,
        passed: Option<bool>,
        now: DateTime<Utc>,
    ) -> KernelResult<()> {
        let mut parent = self.queue.get(parent_id).await?;
        let mut metadata = parent.metadata.as_object().cloned().unwrap_or_default();
        metadata.insert(
            "verificationStatus".to_string(),
            json!({
                "passed": passed,
                "verificationWorkItemId": verification_item.id,
                "completedAt": now,
            }),
        );
        parent.metadata = serde_json::Value::Object(metadata);
        self.gateway.merge_work_item_metadata(parent_id, &parent.metadata, now).await?;
        Ok(())
    }

    /// Computes `newRetryCount`; if it exceeds `maxRetries(type)` the
    /// WorkItem goes terminal `failed`. Otherwise it is requeued:
    /// execution items get the backoff schedule, verification items are
    /// requeued immediately (`next_retry_at = None`).
    #[instrument(skip(self))]
    pub async fn fail(&self, worker_id: WorkerId, error: &str, iteration: u32) -> KernelResult<WorkItem> {
        let worker = self.active_worker(worker_id).await?;
        let now = Utc::now();

        let rows = self
            .gateway
            .finalize_worker(worker_id, WorkerStatus::Failed, now, Some(error))
            .await?;
        if rows == 0 {
            return Err(KernelError::not_found(format!("worker {worker_id} is not active")));
        }

        let work_item = self.queue.get(worker.work_item_id).await?;
        let max_retries = work_item.max_retries(self.config.verification_max_retries);
        let new_retry_count = work_item.retry_count + 1;

        if new_retry_count > max_retries {
            let kind = work_item.item_type.as_str();
            let message = format!("{kind} failed (max retries {max_retries}): {error}");
            self.gateway.fail_work_item_terminal(work_item.id, &message, now).await?;
        } else {
            let next_retry_at = match work_item.item_type {
                WorkItemType::Execution => Some(backoff_deadline(new_retry_count, now)),
                WorkItemType::Verification => None,
            };
            self.gateway
                .fail_work_item_retry(work_item.id, new_retry_count, iteration, next_retry_at, now)
                .await?;
        }

        self.conflict_arbiter.release_all_locks(worker_id).await?;
        self.rate_limiter.record_worker_done().await?;

        warn!(worker_id = %worker_id, work_item_id = %work_item.id, error = %error, "worker failed");
        self.queue.get(work_item.id).await
    }

    /// Appends `"Worker stuck: …"` to the WorkItem's error without
    /// changing its status — operator or a future timeout decides.
    /// Releases locks so peers are not blocked, but does **not** decrement
    /// the active-worker count: the container may still be running
    /// (§9 open question; resolved here as "operator intervention
    /// required", no auto-timeout to `killed`).
    #[instrument(skip(self))]
    pub async fn stuck(&self, worker_id: WorkerId, reason: &str, attempts: u32) -> KernelResult<()> {
        let worker = self.active_worker(worker_id).await?;
        let now = Utc::now();
        let composite = format!("stuck after {attempts} attempts: {reason}");

        let rows = self
            .gateway
            .finalize_worker(worker_id, WorkerStatus::Stuck, now, Some(&composite))
            .await?;
        if rows == 0 {
            return Err(KernelError::not_found(format!("worker {worker_id} is not active")));
        }

        self.gateway
            .append_work_item_error(worker.work_item_id, &format!("Worker stuck: {reason}"), now)
            .await?;
        self.conflict_arbiter.release_all_locks(worker_id).await?;

        warn!(worker_id = %worker_id, reason = %reason, attempts, "worker stuck");
        Ok(())
    }

    /// Best-effort: captures the last N lines of the container log, stops
    /// it with a grace period (tolerating "already gone"), then resolves
    /// the WorkItem the same way `fail` does — except using the same
    /// backoff schedule as execution-fail for *both* item types, and also
    /// terminal when the iteration cap (not just the retry cap) is hit.
    #[instrument(skip(self))]
    pub async fn kill(&self, worker_id: WorkerId, reason: &str) -> KernelResult<WorkItem> {
        let worker = self
            .gateway
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("worker {worker_id} not found")))?;

        if let Some(container_id) = &worker.container_id {
            match self.containers.get_container(container_id).await {
                Ok(handle) => {
                    let _ = handle.logs(LogsRequest { tail: 200, stdout: true, stderr: true }).await;
                    if let Err(e) = handle.stop(10).await {
                        warn!(worker_id = %worker_id, error = %e, "kill: stop failed (tolerated)");
                    }
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "kill: container not found (tolerated)");
                }
            }
        }

        let now = Utc::now();
        let composite = format!("killed: {reason}");
        self.gateway
            .finalize_worker(worker_id, WorkerStatus::Killed, now, Some(&composite))
            .await?;

        let work_item = self.queue.get(worker.work_item_id).await?;
        let max_retries = work_item.max_retries(self.config.verification_max_retries);
        let new_retry_count = work_item.retry_count + 1;

        if new_retry_count > max_retries || work_item.iteration >= work_item.max_iterations {
            let message = format!("killed (max retries {max_retries} or iteration cap reached): {reason}");
            self.gateway.fail_work_item_terminal(work_item.id, &message, now).await?;
        } else {
            let next_retry_at = Some(backoff_deadline(new_retry_count, now));
            self.gateway
                .fail_work_item_retry(work_item.id, new_retry_count, work_item.iteration, next_retry_at, now)
                .await?;
        }

        self.conflict_arbiter.release_all_locks(worker_id).await?;
        self.rate_limiter.record_worker_done().await?;

        warn!(worker_id = %worker_id, reason = %reason, "worker killed");
        self.queue.get(work_item.id).await
    }

    /// Active workers whose last heartbeat is older than
    /// `stale_threshold_seconds`. The Scheduler Loop invokes `kill` on
    /// each returned worker.
    pub async fn health_check(&self) -> KernelResult<Vec<Worker>> {
        let now = Utc::now();
        let active = self.gateway.list_active_workers().await?;
        Ok(active
            .into_iter()
            .filter(|w| w.is_stale(now, self.config.stale_threshold_seconds))
            .collect())
    }

    pub async fn list(&self) -> KernelResult<Vec<Worker>> {
        self.gateway.list_workers().await
    }

    pub async fn get_stats(&self) -> KernelResult<WorkerStats> {
        let workers = self.gateway.list_workers().await?;
        let mut stats = WorkerStats::default();
        for w in &workers {
            match w.status {
                WorkerStatus::Starting => stats.starting += 1,
                WorkerStatus::Running => stats.running += 1,
                WorkerStatus::Completed => stats.completed += 1,
                WorkerStatus::Failed => stats.failed += 1,
                WorkerStatus::Stuck => stats.stuck += 1,
                WorkerStatus::Killed => stats.killed += 1,
            }
        }
        Ok(stats)
    }

    pub async fn get_logs(&self, worker_id: WorkerId, lines: u32) -> KernelResult<Vec<u8>> {
        let worker = self
            .gateway
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("worker {worker_id} not found")))?;
        let Some(container_id) = worker.container_id else {
            return Ok(Vec::new());
        };
        match self.containers.get_container(&container_id).await {
            Ok(handle) => handle.logs(LogsRequest { tail: lines, stdout: true, stderr: true }).await,
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn active_worker(&self, worker_id: WorkerId) -> KernelResult<Worker> {
        let worker = self
            .gateway
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| KernelError::not_found(format!("worker {worker_id} not found")))?;
        if !worker.status.is_active() {
            return Err(KernelError::not_found(format!("worker {worker_id} is not active")));
        }
        Ok(worker)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub starting: u32,
    pub running: u32,
    pub completed: u32,
    pub failed: u32,
    pub stuck: u32,
    pub killed: u32,
}

/// §4.5/§8's backoff schedule: `[60, 300, 1800]` seconds for the 1st,
/// 2nd, 3rd-and-beyond failure, saturating at the last entry.
fn backoff_deadline(retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let idx = (retry_count.saturating_sub(1) as usize).min(EXECUTION_RETRY_BACKOFF_SECONDS.len() - 1);
    now + ChronoDuration::seconds(EXECUTION_RETRY_BACKOFF_SECONDS[idx])
}

/// `orchestratorUrl` (§6) is configured from the host's point of view
/// (`http://localhost:8080`), but a worker container resolves `localhost` to
/// itself, not the host. Substitute the loopback host with the bridge
/// address containers use to reach the host: `host.docker.internal` on
/// Docker Desktop (macOS/Windows), `172.17.0.1` — the default Docker bridge
/// gateway — on Linux. Non-loopback hosts (a real DNS name, a reachable LAN
/// address) pass through unchanged.
fn container_bridge_url(orchestrator_url: &str) -> String {
    let bridge_host = if cfg!(target_os = "linux") { "172.17.0.1" } else { "host.docker.internal" };
    orchestrator_url
        .replacen("localhost", bridge_host, 1)
        .replacen("127.0.0.1", bridge_host, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_deadline_follows_schedule() {
        let now = Utc::now();
        assert_eq!((backoff_deadline(1, now) - now).num_seconds(), 60);
        assert_eq!((backoff_deadline(2, now) - now).num_seconds(), 300);
        assert_eq!((backoff_deadline(3, now) - now).num_seconds(), 1800);
        assert_eq!((backoff_deadline(10, now) - now).num_seconds(), 1800);
    }

    #[test]
    fn container_bridge_url_substitutes_loopback_host_only() {
        let rewritten = container_bridge_url("http://localhost:8080");
        assert!(!rewritten.contains("localhost"));
        assert!(rewritten.ends_with(":8080"));
    }

    #[test]
    fn container_bridge_url_leaves_non_loopback_hosts_untouched() {
        assert_eq!(
            container_bridge_url("http://orchestrator.internal:8080"),
            "http://orchestrator.internal:8080"
        );
    }
}
