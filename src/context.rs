//! The context capability.
//!
//! A context is a scoped unit of work with four observable properties: an
//! optional deadline, a one-shot completion signal, a terminal error that is
//! set when the signal fires, and a read-only key/value scope.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ContextError;
use crate::signal::DoneSignal;
use crate::value::{ContextKey, Value};

/// Capability set shared by every context, including combined ones.
///
/// Implementations must uphold:
/// - `done()` fires at most once and stays fired;
/// - `err()` is `None` until `done()` fires and stable afterwards;
/// - `deadline()` is stable for the lifetime of the context.
pub trait Context: Send + Sync {
    /// The time at which this context is due to end, if it has one.
    fn deadline(&self) -> Option<DateTime<Utc>>;

    /// Handle to the completion signal.
    fn done(&self) -> DoneSignal;

    /// The terminal error, or `None` while the context is still live.
    fn err(&self) -> Option<ContextError>;

    /// Looks up the value bound to `key`.
    fn value(&self, key: &ContextKey) -> Option<Value>;
}

/// Unique identifier for a context instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Creates a new random context ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short form used in thread names.
    pub(crate) fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The empty root context: never done, no deadline, no values.
#[derive(Debug, Default, Clone, Copy)]
pub struct Background;

impl Context for Background {
    fn deadline(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn done(&self) -> DoneSignal {
        DoneSignal::never()
    }

    fn err(&self) -> Option<ContextError> {
        None
    }

    fn value(&self, _key: &ContextKey) -> Option<Value> {
        None
    }
}

/// Returns a shared `Background` context.
#[must_use]
pub fn background() -> Arc<dyn Context> {
    Arc::new(Background)
}
