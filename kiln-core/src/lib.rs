//! `kiln-core` — the orchestration kernel: domain model, persistence,
//! rate limiting, conflict arbitration, queueing, container lifecycle,
//! worker supervision, and metrics. No module here binds a port or
//! parses a request; that is `kiln-server`'s job.

pub mod conflict_arbiter;
pub mod container_runtime;
pub mod domain;
pub mod error;
pub mod fast_store;
pub mod gateway;
pub mod metrics_aggregator;
pub mod queue_manager;
pub mod rate_limiter;
pub mod worker_supervisor;

pub mod config;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
