//! Typed error taxonomy for the kernel.
//!
//! `KernelError` carries the seven kinds from the error-handling design
//! verbatim as variants, rather than as a stringly-typed code, so callers
//! (notably the HTTP layer) can match on kind without parsing messages.
//! Adapter code (gateway, fast store, container runtime) should convert its
//! own errors into one of these at the point it crosses into kernel logic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    /// Malformed request. Surfaced, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation forbidden in the entity's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Container-runtime / fast-store / durable-store I/O failure. Retried
    /// where idempotent by the caller; otherwise surfaced.
    #[error("transient external error: {0}")]
    Transient(#[source] anyhow::Error),

    /// Bug or invariant break. Logged with context, surfaced as 500;
    /// never silently suppressed.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl KernelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    /// Closed set of API error codes from §6: `{VALIDATION_ERROR, NOT_FOUND,
    /// INVALID_STATE, INTERNAL_ERROR}`. Transient errors are surfaced to
    /// HTTP callers as internal errors — the distinction matters to the
    /// kernel's own retry policy, not to an API client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Transient(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::InvalidState(_) => 400,
            Self::Transient(_) | Self::Internal(_) => 500,
        }
    }
}

/// sqlx errors only ever cross into kernel logic as Transient or Internal —
/// the gateway is responsible for normalizing unique-violations into
/// `InvalidState`/"blocked" sentinels before that point (see
/// `gateway::is_unique_violation`).
impl From<sqlx::Error> for KernelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Transient(other.into()),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
