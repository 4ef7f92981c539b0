//! Error taxonomy shared by the gate and the auth flows.
//!
//! Every fallible operation in the crate resolves to one of these variants so
//! handlers can map outcomes to a stable HTTP contract without inspecting
//! provider-specific error strings.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway and auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed or unprocessable input the caller can correct.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Credentials or codes did not verify. Carries no field-level detail;
    /// unknown accounts and wrong passwords are indistinguishable.
    #[error("invalid credentials")]
    Authentication,

    /// Too many attempts inside the current window.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the oldest hit leaves the window.
        retry_after: Duration,
    },

    /// The caller is authenticated but may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// A collaborator (identity provider, counter store) could not be reached
    /// or answered outside its contract.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A fault on our side that has no stable contract mapping.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// `true` when the failure is attributable to the caller's input.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Authentication | Self::Forbidden(_)
        )
    }

    /// `true` when retrying the same request later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::DependencyUnavailable(_)
        )
    }

    /// Retry hint for throttled requests, `None` for every other variant.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
