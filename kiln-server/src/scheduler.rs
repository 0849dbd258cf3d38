//! Scheduler Loop — the single background task that drives admission and
//! liveness (§4.6). Grounded on the maestro job scheduler's
//! `tokio::select!` tick/shutdown race, generalized from "one task per
//! registered job" to "one task, one fixed-cadence tick body".

use std::sync::Arc;
use std::time::Duration;

use kiln_core::queue_manager::QueueManager;
use kiln_core::rate_limiter::RateLimiter;
use kiln_core::worker_supervisor::{SpawnMode, WorkerSupervisor};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

pub struct SchedulerLoop {
    queue: Arc<QueueManager>,
    supervisor: Arc<WorkerSupervisor>,
    rate_limiter: Arc<RateLimiter>,
    tick_interval: Duration,
}

impl SchedulerLoop {
    pub fn new(
        queue: Arc<QueueManager>,
        supervisor: Arc<WorkerSupervisor>,
        rate_limiter: Arc<RateLimiter>,
        tick_seconds: u64,
    ) -> Self {
        Self {
            queue,
            supervisor,
            rate_limiter,
            tick_interval: Duration::from_secs(tick_seconds),
        }
    }

    /// Spawns the loop as its own task; cancelled cooperatively when
    /// `shutdown` fires, never mid-tick.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.tick_interval) => {
                        self.tick().await;
                    }
                    _ = shutdown.recv() => {
                        info!("scheduler loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        let spawned = self.try_spawn_one().await;

        let stale = match self.supervisor.health_check().await {
            Ok(workers) => workers,
            Err(e) => {
                warn!(error = %e, "health check failed");
                Vec::new()
            }
        };

        for worker in &stale {
            if let Err(e) = self.supervisor.kill(worker.id, "stale heartbeat").await {
                warn!(worker_id = %worker.id, error = %e, "failed to kill stale worker");
            }
        }

        info!(spawned, reaped = stale.len(), "scheduler tick");
    }

    /// At most one spawn per tick, per §4.6's cooldown-respecting rule.
    async fn try_spawn_one(&self) -> bool {
        match self.rate_limiter.can_spawn_worker().await {
            Ok(false) => return false,
            Err(e) => {
                warn!(error = %e, "rate limiter check failed");
                return false;
            }
            Ok(true) => {}
        }

        let eligible = match self.queue.list_eligible().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "failed to list eligible work items");
                return false;
            }
        };

        let Some(item) = eligible.into_iter().next() else {
            return false;
        };

        let mode = match item.item_type {
            kiln_core::domain::WorkItemType::Execution => SpawnMode::Execution,
            kiln_core::domain::WorkItemType::Verification => SpawnMode::Verification,
        };

        match self.supervisor.spawn(&item, mode).await {
            Ok(result) => {
                info!(work_item_id = %item.id, worker_id = %result.worker_id, "spawned worker");
                true
            }
            Err(e) => {
                // Rollback already requeued the item; the loop tries again
                // next tick rather than retrying within this one.
                warn!(work_item_id = %item.id, error = %e, "spawn failed");
                false
            }
        }
    }
}
