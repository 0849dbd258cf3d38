//! Fast store — atomic `incr`/`decr`/`get`/`set` on the four rate-counter
//! keys (§6's "Fast store contract"). Two implementations, the shape
//! `sipag-core/src/worker/ports.rs` uses throughout: a small trait plus a
//! real adapter and an in-memory one for tests and single-process
//! deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{KernelError, KernelResult};

pub const KEY_ACTIVE_WORKERS: &str = "rate:active_workers";
pub const KEY_LAST_SPAWN_MS: &str = "rate:last_spawn";
pub const KEY_DAILY_ITERATIONS: &str = "rate:daily_iterations";
pub const KEY_DAILY_RESET_DATE: &str = "rate:daily_reset_date";

#[async_trait]
pub trait FastStore: Send + Sync {
    async fn incr(&self, key: &str, by: i64) -> KernelResult<i64>;
    async fn decr_clamped(&self, key: &str, by: i64) -> KernelResult<i64>;
    async fn get(&self, key: &str) -> KernelResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> KernelResult<()>;
}

/// Redis-backed production adapter. Uses the multiplexed async connection
/// so every call is cheap to issue concurrently from request handlers and
/// the scheduler loop alike (§5: no process-wide lock across suspension).
pub struct RedisFastStore {
    client: redis::Client,
}

impl RedisFastStore {
    pub fn connect(redis_url: &str) -> KernelResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| KernelError::transient(e))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> KernelResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| KernelError::transient(e))
    }
}

#[async_trait]
impl FastStore for RedisFastStore {
    async fn incr(&self, key: &str, by: i64) -> KernelResult<i64> {
        let mut conn = self.conn().await?;
        conn.incr(key, by).await.map_err(|e| KernelError::transient(e))
    }

    /// Decrements, then clamps at zero in a follow-up write if it went
    /// negative — counter corruption self-heals on the next call (§4.2
    /// failure semantics) rather than relying on a single atomic op that
    /// Redis doesn't offer for "decrement but not below zero".
    async fn decr_clamped(&self, key: &str, by: i64) -> KernelResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.decr(key, by).await.map_err(|e| KernelError::transient(e))?;
        if value < 0 {
            let _: () = conn.set(key, 0).await.map_err(|e| KernelError::transient(e))?;
            return Ok(0);
        }
        Ok(value)
    }

    async fn get(&self, key: &str) -> KernelResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| KernelError::transient(e))
    }

    async fn set(&self, key: &str, value: &str) -> KernelResult<()> {
        let mut conn = self.conn().await?;
        conn.set(key, value).await.map_err(|e| KernelError::transient(e))
    }
}

/// In-memory adapter for tests and single-process deployments without a
/// Redis dependency — the `MockStore`-per-trait idiom the teacher's
/// `worker/ports.rs` uses for every external collaborator.
#[derive(Default)]
pub struct InMemoryFastStore {
    values: Mutex<HashMap<String, i64>>,
    strings: Mutex<HashMap<String, String>>,
}

impl InMemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FastStore for InMemoryFastStore {
    async fn incr(&self, key: &str, by: i64) -> KernelResult<i64> {
        let mut values = self.values.lock().unwrap();
        let entry = values.entry(key.to_string()).or_insert(0);
        *entry += by;
        Ok(*entry)
    }

    async fn decr_clamped(&self, key: &str, by: i64) -> KernelResult<i64> {
        let mut values = self.values.lock().unwrap();
        let entry = values.entry(key.to_string()).or_insert(0);
        *entry -= by;
        if *entry < 0 {
            *entry = 0;
        }
        Ok(*entry)
    }

    async fn get(&self, key: &str) -> KernelResult<Option<String>> {
        if let Some(v) = self.values.lock().unwrap().get(key) {
            return Ok(Some(v.to_string()));
        }
        Ok(self.strings.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> KernelResult<()> {
        if let Ok(n) = value.parse::<i64>() {
            self.values.lock().unwrap().insert(key.to_string(), n);
        }
        self.strings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_and_decr_round_trip() {
        let store = InMemoryFastStore::new();
        assert_eq!(store.incr("x", 1).await.unwrap(), 1);
        assert_eq!(store.incr("x", 1).await.unwrap(), 2);
        assert_eq!(store.decr_clamped("x", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn decr_clamps_at_zero() {
        let store = InMemoryFastStore::new();
        assert_eq!(store.decr_clamped("x", 5).await.unwrap(), 0);
        assert_eq!(store.get("x").await.unwrap(), Some("0".to_string()));
    }

    #[tokio::test]
    async fn set_and_get_string() {
        let store = InMemoryFastStore::new();
        store.set("rate:daily_reset_date", "2026-07-28").await.unwrap();
        assert_eq!(
            store.get("rate:daily_reset_date").await.unwrap(),
            Some("2026-07-28".to_string())
        );
    }
}
