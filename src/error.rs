//! Error types for kyro-contexts.
//!
//! Two families live here. `ContextError` is the terminal reason a context
//! reports once it is done; the combinator relays it untouched. `CombineError`
//! covers failures while building a combined context.

use thiserror::Error;

/// The reason a context ended.
///
/// Set exactly once per context and readable any number of times afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    /// Ended by an explicit cancel.
    #[error("context canceled")]
    Canceled,

    /// Ended because its deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Ended for a caller supplied reason.
    #[error("context aborted: {reason}")]
    Aborted {
        /// Why the context was aborted.
        reason: String,
    },
}

impl ContextError {
    /// Creates an aborted error with a caller supplied reason.
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Returns true if the context was explicitly canceled.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns true if the context ran past its deadline.
    #[must_use]
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

/// Errors raised while constructing contexts.
#[derive(Debug, Error)]
pub enum CombineError {
    /// The OS refused to start a background thread.
    #[error("Failed to spawn thread '{name}': {message}")]
    SpawnFailed {
        /// Name of the thread that failed to start.
        name: String,
        /// OS error text.
        message: String,
    },

    /// A config value or constructor argument was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the input.
        reason: String,
    },
}

impl CombineError {
    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a thread spawn failure.
    #[must_use]
    pub const fn is_spawn_failed(&self) -> bool {
        matches!(self, Self::SpawnFailed { .. })
    }

    /// Returns true if spawning again later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::SpawnFailed { .. } => true, // Thread limits are usually transient
            Self::InvalidConfig { .. } => false,
        }
    }
}

/// Result type alias for context construction.
pub type CombineResult<T> = Result<T, CombineError>;
