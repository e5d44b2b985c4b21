//! Daemon error abstractions.

use axum::http::StatusCode;
use mastership_core::MastershipError;

// Error messages.
pub const ERR_DB_FLUSH: &str = "error flushing database state";

/// An extension trait for the core `MastershipError`.
pub trait MastershipErrorExt {
    /// Get the HTTP status code for this error.
    fn status(&self) -> StatusCode;
}

impl MastershipErrorExt for MastershipError {
    fn status(&self) -> StatusCode {
        match self {
            MastershipError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MastershipError::ConcurrentModificationExceeded { .. } => StatusCode::CONFLICT,
            MastershipError::NotMaster { .. } | MastershipError::StaleTerm { .. } => StatusCode::FORBIDDEN,
            MastershipError::Cancelled | MastershipError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The error type used to indicate that a system shutdown is required.
#[derive(Debug, thiserror::Error)]
#[error("fatal error: {0}")]
pub struct ShutdownError(#[from] pub anyhow::Error);

/// A result type where the error is a `ShutdownError`.
pub type ShutdownResult<T> = ::std::result::Result<T, ShutdownError>;
