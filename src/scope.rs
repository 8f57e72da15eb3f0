//! Concrete context producers.
//!
//! `CancelContext` ends on explicit cancellation or when its deadline passes.
//! `ValueContext` layers one key/value binding over a parent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{after, select};
use tracing::debug;

use crate::context::{Context, ContextId};
use crate::error::{CombineError, CombineResult, ContextError};
use crate::signal::{DoneSignal, Latch};
use crate::spawn::spawn_detached;
use crate::value::{ContextKey, Value};

/// A context that ends when cancelled or when its deadline passes.
///
/// Clones share state: cancelling one cancels all.
///
/// # Examples
///
/// ```
/// use kyro_contexts::{CancelContext, Context, ContextError};
///
/// let ctx = CancelContext::new();
/// assert!(ctx.err().is_none());
/// ctx.cancel();
/// assert!(ctx.done().is_fired());
/// assert_eq!(ctx.err(), Some(ContextError::Canceled));
/// ```
#[derive(Debug, Clone)]
pub struct CancelContext {
    id: ContextId,
    latch: Arc<Latch>,
    deadline: Option<DateTime<Utc>>,
}

impl CancelContext {
    /// Creates a context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            latch: Latch::new(),
            deadline: None,
        }
    }

    /// Creates a context that ends with `DeadlineExceeded` at `deadline`.
    ///
    /// A deadline at or before now ends the context immediately.
    ///
    /// # Errors
    ///
    /// Returns `CombineError::SpawnFailed` if the timer thread cannot start.
    pub fn with_deadline(deadline: DateTime<Utc>) -> CombineResult<Self> {
        let ctx = Self {
            id: ContextId::new(),
            latch: Latch::new(),
            deadline: Some(deadline),
        };

        match (deadline - Utc::now()).to_std() {
            Ok(wait) if !wait.is_zero() => {
                let latch = Arc::clone(&ctx.latch);
                let id = ctx.id;
                spawn_detached(format!("kyro-ctx-deadline-{}", id.short()), None, move || {
                    select! {
                        recv(latch.receiver()) -> _ => {}
                        recv(after(wait)) -> _ => {
                            if latch.fire(ContextError::DeadlineExceeded) {
                                debug!(context_id = %id, "deadline exceeded");
                            }
                        }
                    }
                })?;
            }
            _ => {
                ctx.latch.fire(ContextError::DeadlineExceeded);
            }
        }

        Ok(ctx)
    }

    /// Creates a context that ends with `DeadlineExceeded` after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `CombineError::InvalidConfig` if `timeout` is out of range, or
    /// `CombineError::SpawnFailed` if the timer thread cannot start.
    pub fn with_timeout(timeout: Duration) -> CombineResult<Self> {
        let delta = chrono::Duration::from_std(timeout)
            .map_err(|e| CombineError::invalid_config(format!("timeout out of range: {e}")))?;
        let deadline = Utc::now()
            .checked_add_signed(delta)
            .ok_or_else(|| CombineError::invalid_config("timeout out of range"))?;
        Self::with_deadline(deadline)
    }

    /// This context's identifier.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Cancels the context with `ContextError::Canceled`.
    ///
    /// No effect if the context already ended.
    pub fn cancel(&self) {
        self.cancel_with(ContextError::Canceled);
    }

    /// Cancels the context with a specific reason.
    ///
    /// Returns true if this call ended the context.
    pub fn cancel_with(&self, err: ContextError) -> bool {
        let fired = self.latch.fire(err);
        if fired {
            debug!(context_id = %self.id, "context canceled");
        }
        fired
    }
}

impl Default for CancelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Context for CancelContext {
    fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    fn done(&self) -> DoneSignal {
        self.latch.signal()
    }

    fn err(&self) -> Option<ContextError> {
        self.latch.err()
    }

    fn value(&self, _key: &ContextKey) -> Option<Value> {
        None
    }
}

/// A context that binds one key to one value on top of a parent.
///
/// Lifecycle, deadline and other keys come from the parent. Binding
/// `Value::Null` hides the parent's value for that key.
pub struct ValueContext {
    parent: Arc<dyn Context>,
    key: ContextKey,
    value: Value,
}

impl ValueContext {
    /// Wraps `parent` with a `key` → `value` binding.
    pub fn new(
        parent: Arc<dyn Context>,
        key: impl Into<ContextKey>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            parent,
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for ValueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueContext")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Context for ValueContext {
    fn deadline(&self) -> Option<DateTime<Utc>> {
        self.parent.deadline()
    }

    fn done(&self) -> DoneSignal {
        self.parent.done()
    }

    fn err(&self) -> Option<ContextError> {
        self.parent.err()
    }

    fn value(&self, key: &ContextKey) -> Option<Value> {
        if *key == self.key {
            return Value::non_null(Some(self.value.clone()));
        }
        self.parent.value(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::background;

    #[test]
    fn test_cancel_is_idempotent() {
        let ctx = CancelContext::new();
        assert!(ctx.cancel_with(ContextError::aborted("first")));
        assert!(!ctx.cancel_with(ContextError::Canceled));
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::aborted("first")));
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = CancelContext::new();
        let other = ctx.clone();
        other.cancel();
        assert!(ctx.done().is_fired());
        assert_eq!(ctx.id(), other.id());
    }

    #[test]
    fn test_deadline_fires() {
        let ctx = CancelContext::with_timeout(Duration::from_millis(20)).unwrap();
        assert!(ctx.deadline().is_some());
        assert!(ctx.done().wait_timeout(Duration::from_secs(2)));
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_past_deadline_fires_immediately() {
        let at = Utc::now() - chrono::Duration::seconds(1);
        let ctx = CancelContext::with_deadline(at).unwrap();
        assert!(ctx.done().is_fired());
        assert_eq!(ctx.deadline(), Some(at));
        assert!(ctx.err().unwrap().is_deadline_exceeded());
    }

    #[test]
    fn test_timeout_past_representable_time_is_rejected() {
        let far = Duration::from_secs(300_000 * 365 * 86_400);
        let err = CancelContext::with_timeout(far).unwrap_err();
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("timeout out of range"));
    }

    #[test]
    fn test_cancel_before_deadline_wins() {
        let ctx = CancelContext::with_timeout(Duration::from_secs(60)).unwrap();
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn test_value_context_chain() {
        let base = Arc::new(ValueContext::new(background(), "a", "outer"));
        let ctx = ValueContext::new(base, "b", 2_i64);

        assert_eq!(ctx.value(&ContextKey::new("b")), Some(Value::Int(2)));
        assert_eq!(ctx.value(&ContextKey::new("a")), Some(Value::from("outer")));
        assert!(ctx.value(&ContextKey::new("c")).is_none());
    }

    #[test]
    fn test_value_context_null_hides_parent() {
        let base = Arc::new(ValueContext::new(background(), "a", "outer"));
        let ctx = ValueContext::new(base, "a", Value::Null);
        assert!(ctx.value(&ContextKey::new("a")).is_none());
    }

    #[test]
    fn test_value_context_delegates_lifecycle() {
        let parent = CancelContext::new();
        let ctx = ValueContext::new(Arc::new(parent.clone()), "k", true);
        assert!(ctx.err().is_none());
        parent.cancel();
        assert!(ctx.done().is_fired());
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }
}
