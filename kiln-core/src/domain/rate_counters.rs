use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Snapshot of the fast store's rate-limiting counters, plus the derived
/// `can_spawn` the Rate Limiter computes from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCounters {
    pub active_workers: u32,
    pub last_spawn_ms: i64,
    pub daily_iterations: u32,
    pub daily_reset_date: NaiveDate,
}

/// `getStatus()` result: the raw counters plus whether a spawn is currently
/// permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStatus {
    pub counters: RateCounters,
    pub can_spawn: bool,
    pub max_workers: u32,
    pub daily_budget: u32,
    pub cooldown_seconds: u32,
}
