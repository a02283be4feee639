//! Shared failure taxonomy.
//!
//! Every core component signals failure through [`Error`]; mapping onto
//! transport status codes happens in the API layer.

use thiserror::Error;

/// Result type used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Why the backend refused to provision a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionReason {
    /// The image could not be found or pulled.
    ImageUnavailable,
    /// Resource limits or quotas were exceeded.
    ResourceDenied,
    /// The backend daemon could not be reached.
    BackendUnreachable,
}

impl std::fmt::Display for ProvisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionReason::ImageUnavailable => write!(f, "image unavailable"),
            ProvisionReason::ResourceDenied => write!(f, "resource denied"),
            ProvisionReason::BackendUnreachable => write!(f, "backend unreachable"),
        }
    }
}

/// Errors raised by the sandbox pool, runtime, session manager, and
/// workspace archive.
#[derive(Debug, Error)]
pub enum Error {
    /// Session or sandbox id is unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Session read after its expiry instant.
    #[error("session expired: {0}")]
    Expired(String),

    /// Operation invoked against the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Capacity reached and no idle sandbox available.
    #[error("sandbox pool exhausted")]
    PoolExhausted,

    /// Acquire after the pool was closed.
    #[error("sandbox pool is closed")]
    PoolClosed,

    /// The backend refused to create a sandbox.
    #[error("provisioning failed ({reason}): {message}")]
    ProvisionFailed {
        reason: ProvisionReason,
        message: String,
    },

    /// The backend failed to start or attach to a process. A non-zero
    /// exit code is a successful result, not this error.
    #[error("exec failed: {0}")]
    ExecFailure(String),

    /// A deadline elapsed before the operation completed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// File, archive, or store I/O fault.
    #[error("io failure: {0}")]
    Io(String),

    /// Required field missing or invariant violated at a boundary.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
}

impl Error {
    /// Shorthand for a provisioning failure.
    pub fn provision(reason: ProvisionReason, message: impl Into<String>) -> Self {
        Error::ProvisionFailed {
            reason,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Io(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Io(err.to_string())
    }
}
