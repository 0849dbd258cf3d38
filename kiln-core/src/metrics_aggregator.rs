//! Metrics Aggregator — read-only operational summary over the durable
//! store (§4.7). Never writes; every field is derived on read, so the
//! kernel has no reconciliation problem between this module and the data
//! it summarizes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::KernelResult;
use crate::gateway::PersistenceGateway;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub active_workers: u32,
    pub queued_work_items: u32,
    pub completed_today: u32,
    pub failed_today: u32,
    pub iterations_today: u64,
    pub avg_completion_duration_seconds: f64,
    pub success_rate_today: f64,
    pub work_items_by_status: Vec<(String, i64)>,
    pub work_items_by_priority: Vec<(String, i64)>,
}

pub struct MetricsAggregator {
    gateway: Arc<PersistenceGateway>,
}

impl MetricsAggregator {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// `getSummary()` — all counts are "since the start of today, UTC".
    /// `successRateToday` is zero-safe: `0/0` reports `0.0`, not `NaN`.
    pub async fn get_summary(&self) -> KernelResult<MetricsSummary> {
        let since = start_of_today_utc();

        let active_workers = self.gateway.count_active_workers().await?.max(0) as u32;
        let queued_work_items = self.gateway.count_queued_work_items().await?.max(0) as u32;
        let completed_today = self.gateway.count_completed_since(since).await?.max(0) as u32;
        let failed_today = self.gateway.count_failed_since(since).await?.max(0) as u32;
        let iterations_today = self.gateway.sum_iterations_since(since).await?.max(0) as u64;
        let avg_completion_duration_seconds = self.gateway.avg_completion_duration_seconds().await?;
        let work_items_by_status = self.gateway.count_work_items_by_status().await?;
        let work_items_by_priority = self.gateway.count_work_items_by_priority().await?;

        let total_today = completed_today + failed_today;
        let success_rate_today = if total_today == 0 {
            0.0
        } else {
            completed_today as f64 / total_today as f64
        };

        Ok(MetricsSummary {
            active_workers,
            queued_work_items,
            completed_today,
            failed_today,
            iterations_today,
            avg_completion_duration_seconds,
            success_rate_today,
            work_items_by_status,
            work_items_by_priority,
        })
    }
}

fn start_of_today_utc() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now - Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_of_today_is_midnight_utc() {
        let start = start_of_today_utc();
        assert_eq!(start.timezone(), Utc);
        use chrono::Timelike;
        assert_eq!(start.hour(), 0);
        assert_eq!(start.minute(), 0);
        assert_eq!(start.second(), 0);
    }
}
