use std::sync::Arc;

use kiln_core::conflict_arbiter::ConflictArbiter;
use kiln_core::metrics_aggregator::MetricsAggregator;
use kiln_core::queue_manager::QueueManager;
use kiln_core::rate_limiter::RateLimiter;
use kiln_core::worker_supervisor::WorkerSupervisor;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueManager>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub conflict_arbiter: Arc<ConflictArbiter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsAggregator>,
}
