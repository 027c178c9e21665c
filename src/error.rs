//! Error types for the crate.
//!
//! The primitives themselves cannot fail once built: `lock` and `acquire`
//! always resolve eventually. Errors arise only when constructing a
//! primitive from invalid input or loading configuration. Errors raised
//! while waiting or trying are local to [`sync`](crate::sync):
//! [`AcquireError`](crate::sync::AcquireError),
//! [`TryLockError`](crate::sync::TryLockError) and
//! [`TryAcquireError`](crate::sync::TryAcquireError).

use crate::config::ConfigError;

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument failed validation, e.g. a zero semaphore capacity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

/// Result alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
