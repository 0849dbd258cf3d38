//! Rate Limiter — concurrent-worker cap, spawn cooldown, daily iteration
//! budget, day rollover (§4.2).
//!
//! All counters live in the fast store; this type holds no authoritative
//! state of its own; it only knows the configured thresholds and how to
//! interpret a counter snapshot against them.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::domain::{RateCounters, RateLimiterStatus};
use crate::error::KernelResult;
use crate::fast_store::{
    FastStore, KEY_ACTIVE_WORKERS, KEY_DAILY_ITERATIONS, KEY_DAILY_RESET_DATE, KEY_LAST_SPAWN_MS,
};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_workers: u32,
    pub daily_budget: u32,
    pub cooldown_seconds: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            daily_budget: 200,
            cooldown_seconds: 60,
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn FastStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn FastStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    /// `checkDailyReset()` — if today's UTC date differs from the stored
    /// one, reset `dailyIterations = 0` and store today's date. Racing
    /// double-resets are benign: both writers land on the same value.
    pub async fn check_daily_reset(&self) -> KernelResult<()> {
        let today = Utc::now().date_naive();
        let stored = self.store.get(KEY_DAILY_RESET_DATE).await?;
        let stored_date = stored.as_deref().and_then(|s| s.parse::<NaiveDate>().ok());

        if stored_date != Some(today) {
            self.store.set(KEY_DAILY_RESET_DATE, &today.to_string()).await?;
            self.store.set(KEY_DAILY_ITERATIONS, "0").await?;
        }
        Ok(())
    }

    /// `canSpawnWorker()` — true iff under the worker cap, past cooldown,
    /// and under the daily budget.
    pub async fn can_spawn_worker(&self) -> KernelResult<bool> {
        self.check_daily_reset().await?;

        let active_workers = self.read_i64(KEY_ACTIVE_WORKERS).await?;
        let last_spawn_ms = self.read_i64(KEY_LAST_SPAWN_MS).await?;
        let daily_iterations = self.read_i64(KEY_DAILY_ITERATIONS).await?;

        let now_ms = Utc::now().timestamp_millis();
        let cooldown_ms = self.config.cooldown_seconds as i64 * 1000;

        let under_cap = active_workers < self.config.max_workers as i64;
        let past_cooldown = last_spawn_ms == 0 || now_ms - last_spawn_ms >= cooldown_ms;
        let under_budget = daily_iterations < self.config.daily_budget as i64;

        Ok(under_cap && past_cooldown && under_budget)
    }

    /// `recordSpawn()` — atomically bump `activeWorkers` and set
    /// `lastSpawn = now`.
    pub async fn record_spawn(&self) -> KernelResult<()> {
        self.store.incr(KEY_ACTIVE_WORKERS, 1).await?;
        let now_ms = Utc::now().timestamp_millis();
        self.store.set(KEY_LAST_SPAWN_MS, &now_ms.to_string()).await?;
        Ok(())
    }

    /// `recordWorkerDone()` — decrement `activeWorkers`, clamped at zero.
    pub async fn record_worker_done(&self) -> KernelResult<()> {
        self.store.decr_clamped(KEY_ACTIVE_WORKERS, 1).await?;
        Ok(())
    }

    /// `recordIteration()` — increments the daily counter after the
    /// rollover check. Callers (the Worker Supervisor's `heartbeat`) are
    /// responsible for only calling this when the iteration has actually
    /// advanced.
    pub async fn record_iteration(&self) -> KernelResult<()> {
        self.check_daily_reset().await?;
        self.store.incr(KEY_DAILY_ITERATIONS, 1).await?;
        Ok(())
    }

    /// `getStatus()` — snapshot of all counters plus the derived
    /// `canSpawn`.
    pub async fn get_status(&self) -> KernelResult<RateLimiterStatus> {
        self.check_daily_reset().await?;

        let active_workers = self.read_i64(KEY_ACTIVE_WORKERS).await?.max(0) as u32;
        let last_spawn_ms = self.read_i64(KEY_LAST_SPAWN_MS).await?;
        let daily_iterations = self.read_i64(KEY_DAILY_ITERATIONS).await?.max(0) as u32;
        let daily_reset_date = self
            .store
            .get(KEY_DAILY_RESET_DATE)
            .await?
            .and_then(|s| s.parse::<NaiveDate>().ok())
            .unwrap_or_else(|| Utc::now().date_naive());

        let counters = RateCounters {
            active_workers,
            last_spawn_ms,
            daily_iterations,
            daily_reset_date,
        };
        let can_spawn = self.can_spawn_worker().await?;

        Ok(RateLimiterStatus {
            counters,
            can_spawn,
            max_workers: self.config.max_workers,
            daily_budget: self.config.daily_budget,
            cooldown_seconds: self.config.cooldown_seconds,
        })
    }

    async fn read_i64(&self, key: &str) -> KernelResult<i64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fast_store::InMemoryFastStore;

    fn limiter(config: RateLimiterConfig) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryFastStore::new()), config)
    }

    #[tokio::test]
    async fn can_spawn_true_when_under_all_limits() {
        let rl = limiter(RateLimiterConfig::default());
        assert!(rl.can_spawn_worker().await.unwrap());
    }

    #[tokio::test]
    async fn cannot_spawn_at_worker_cap() {
        let rl = limiter(RateLimiterConfig {
            max_workers: 1,
            cooldown_seconds: 0,
            ..RateLimiterConfig::default()
        });
        rl.record_spawn().await.unwrap();
        assert!(!rl.can_spawn_worker().await.unwrap());
    }

    #[tokio::test]
    async fn record_worker_done_decrements_and_clamps() {
        let rl = limiter(RateLimiterConfig::default());
        rl.record_worker_done().await.unwrap();
        let status = rl.get_status().await.unwrap();
        assert_eq!(status.counters.active_workers, 0);
    }

    #[tokio::test]
    async fn respects_cooldown() {
        let rl = limiter(RateLimiterConfig {
            cooldown_seconds: 3600,
            ..RateLimiterConfig::default()
        });
        rl.record_spawn().await.unwrap();
        assert!(!rl.can_spawn_worker().await.unwrap());
    }

    #[tokio::test]
    async fn respects_daily_budget() {
        let rl = limiter(RateLimiterConfig {
            daily_budget: 1,
            ..RateLimiterConfig::default()
        });
        rl.record_iteration().await.unwrap();
        assert!(!rl.can_spawn_worker().await.unwrap());
    }

    #[tokio::test]
    async fn day_rollover_resets_daily_iterations() {
        let store = Arc::new(InMemoryFastStore::new());
        let rl = RateLimiter::new(store.clone(), RateLimiterConfig::default());
        store.set(KEY_DAILY_ITERATIONS, "50").await.unwrap();
        store.set(KEY_DAILY_RESET_DATE, "2000-01-01").await.unwrap();
        rl.check_daily_reset().await.unwrap();
        let status = rl.get_status().await.unwrap();
        assert_eq!(status.counters.daily_iterations, 0);
    }
}
