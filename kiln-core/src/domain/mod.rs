//! Domain model for the orchestration kernel.
//!
//! Mirrors the durable store's shape one-to-one: a `WorkItem` row, a `Worker`
//! row, a `FileLock` row, the fast-store `RateCounters`, and append-only
//! `WorkerMetrics` rows. Status enums carry the valid-transition logic the
//! rest of the kernel relies on instead of re-deriving it at every call site.

mod file_lock;
mod metrics;
mod rate_counters;
mod work_item;
mod worker;

pub use file_lock::FileLock;
pub use metrics::WorkerMetrics;
pub use rate_counters::{RateCounters, RateLimiterStatus};
pub use work_item::{Priority, WorkItem, WorkItemStatus, WorkItemType};
pub use worker::{Worker, WorkerStatus};

use uuid::Uuid;

/// Opaque identifier for a `WorkItem` row.
pub type WorkItemId = Uuid;

/// Opaque identifier for a `Worker` row.
pub type WorkerId = Uuid;
