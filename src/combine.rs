//! Context combinator.
//!
//! `combine` merges an ordered set of contexts into one. The result ends the
//! first time any input ends, reports the earliest input deadline, and
//! resolves values by first match in input order.
//!
//! One monitor thread is spawned per input. Each monitor races its input's
//! completion against the aggregate's; the first to see its input finish
//! records that input's error and fires the aggregate through the shared
//! latch, and every other monitor exits without effect.
//!
//! # Monitor lifetime
//!
//! The combined context has no close or cancel operation. A monitor whose
//! input never ends, in an aggregate no other input ever ends, stays parked
//! for as long as that input lives.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::select;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::context::{Context, ContextId};
use crate::error::{CombineError, CombineResult, ContextError};
use crate::signal::{DoneSignal, Latch};
use crate::spawn::spawn_detached;
use crate::value::{ContextKey, Value};

/// Combinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    /// Monitor threads are named `{thread_name_prefix}-{id}-{index}`.
    pub thread_name_prefix: String,
    /// Stack size for monitor threads. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "kyro-ctx-monitor".to_string(),
            stack_size: None,
        }
    }
}

impl CombineConfig {
    /// Parses a JSON config. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `CombineError::InvalidConfig` on malformed JSON or values that
    /// fail validation.
    pub fn from_json(json: &str) -> CombineResult<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| CombineError::invalid_config(format!("invalid combine config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks field constraints.
    ///
    /// # Errors
    ///
    /// Returns `CombineError::InvalidConfig` for an empty thread name prefix
    /// or a zero stack size.
    pub fn validate(&self) -> CombineResult<()> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(CombineError::invalid_config("thread_name_prefix must not be empty"));
        }
        if self.stack_size == Some(0) {
            return Err(CombineError::invalid_config("stack_size must be greater than zero"));
        }
        Ok(())
    }
}

/// Builds combined contexts with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Combiner {
    cfg: CombineConfig,
}

impl Combiner {
    /// Creates a combiner after validating `cfg`.
    ///
    /// # Errors
    ///
    /// Returns `CombineError::InvalidConfig` if `cfg` fails validation.
    pub fn new(cfg: CombineConfig) -> CombineResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CombineConfig {
        &self.cfg
    }

    /// Combines `inputs` into one context.
    ///
    /// Never blocks. Spawns one monitor thread per input; inputs that have
    /// already ended are valid and resolve the result almost immediately.
    ///
    /// # Errors
    ///
    /// Returns `CombineError::SpawnFailed` if a monitor thread cannot be
    /// started. Monitors spawned before the failure keep watching their
    /// inputs and exit as usual.
    pub fn combine<I>(&self, inputs: I) -> CombineResult<Combined>
    where
        I: IntoIterator<Item = Arc<dyn Context>>,
    {
        let inputs: Vec<Arc<dyn Context>> = inputs.into_iter().collect();
        let id = ContextId::new();
        let latch = Latch::new();
        let live = Arc::new(AtomicUsize::new(0));

        debug!(context_id = %id, inputs = inputs.len(), "combining contexts");

        for (index, input) in inputs.iter().enumerate() {
            let name = format!("{}-{}-{index}", self.cfg.thread_name_prefix, id.short());
            let monitor = Monitor {
                id,
                index,
                input: Arc::clone(input),
                latch: Arc::clone(&latch),
                live: LiveGuard::enter(&live),
            };
            spawn_detached(name, self.cfg.stack_size, move || monitor.run())?;
        }

        Ok(Combined {
            id,
            inputs,
            latch,
            live,
        })
    }
}

/// Combines `inputs` using the default configuration.
///
/// # Errors
///
/// Returns `CombineError::SpawnFailed` if a monitor thread cannot be started.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use kyro_contexts::{combine, CancelContext, Context, ContextError};
///
/// let request = CancelContext::new();
/// let shutdown = CancelContext::new();
/// let ctx = combine([
///     Arc::new(request.clone()) as Arc<dyn Context>,
///     Arc::new(shutdown.clone()) as Arc<dyn Context>,
/// ])
/// .unwrap();
///
/// shutdown.cancel();
/// ctx.done().wait();
/// assert_eq!(ctx.err(), Some(ContextError::Canceled));
/// ```
pub fn combine<I>(inputs: I) -> CombineResult<Combined>
where
    I: IntoIterator<Item = Arc<dyn Context>>,
{
    Combiner::default().combine(inputs)
}

/// A context derived from several inputs.
pub struct Combined {
    id: ContextId,
    inputs: Vec<Arc<dyn Context>>,
    latch: Arc<Latch>,
    live: Arc<AtomicUsize>,
}

impl Combined {
    /// This context's identifier.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Monitor threads that have not exited yet.
    #[must_use]
    pub fn live_monitors(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Combined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combined")
            .field("id", &self.id)
            .field("inputs", &self.inputs.len())
            .field("err", &self.latch.err())
            .field("live_monitors", &self.live_monitors())
            .finish()
    }
}

impl Context for Combined {
    fn deadline(&self) -> Option<DateTime<Utc>> {
        self.inputs.iter().filter_map(|ctx| ctx.deadline()).min()
    }

    fn done(&self) -> DoneSignal {
        self.latch.signal()
    }

    fn err(&self) -> Option<ContextError> {
        self.latch.err()
    }

    fn value(&self, key: &ContextKey) -> Option<Value> {
        self.inputs
            .iter()
            .find_map(|ctx| Value::non_null(ctx.value(key)))
    }
}

/// Counts a monitor as live until dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Monitor {
    id: ContextId,
    index: usize,
    input: Arc<dyn Context>,
    latch: Arc<Latch>,
    live: LiveGuard,
}

impl Monitor {
    fn run(self) {
        let input_done = self.input.done();

        let resolved_elsewhere = select! {
            recv(self.latch.receiver()) -> _ => true,
            recv(input_done.receiver()) -> _ => false,
        };
        if resolved_elsewhere {
            trace!(context_id = %self.id, input = self.index, "aggregate already resolved");
            return;
        }

        let reason = self.input.err().unwrap_or_else(|| {
            warn!(context_id = %self.id, input = self.index, "input finished without an error");
            ContextError::Canceled
        });

        if self.latch.fire(reason.clone()) {
            debug!(
                context_id = %self.id,
                input = self.index,
                reason = %reason,
                "combined context resolved"
            );
        } else {
            trace!(context_id = %self.id, input = self.index, "lost resolution race");
        }

        drop(self.live);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::background;
    use crate::scope::{CancelContext, ValueContext};

    fn shared(ctx: &CancelContext) -> Arc<dyn Context> {
        Arc::new(ctx.clone())
    }

    /// Fires its signal without ever reporting an error.
    struct SilentContext {
        latch: Arc<Latch>,
    }

    impl Context for SilentContext {
        fn deadline(&self) -> Option<DateTime<Utc>> {
            None
        }

        fn done(&self) -> DoneSignal {
            self.latch.signal()
        }

        fn err(&self) -> Option<ContextError> {
            None
        }

        fn value(&self, _key: &ContextKey) -> Option<Value> {
            None
        }
    }

    fn wait_for_monitors(ctx: &Combined, expected: usize) -> bool {
        for _ in 0..200 {
            if ctx.live_monitors() == expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_config_defaults() {
        let cfg = CombineConfig::default();
        assert_eq!(cfg.thread_name_prefix, "kyro-ctx-monitor");
        assert!(cfg.stack_size.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_partial() {
        let cfg = CombineConfig::from_json(r#"{"stack_size": 131072}"#).unwrap();
        assert_eq!(cfg.stack_size, Some(131_072));
        assert_eq!(cfg.thread_name_prefix, "kyro-ctx-monitor");
    }

    #[test]
    fn test_config_rejects_invalid() {
        let err = CombineConfig::from_json(r#"{"thread_name_prefix": "  "}"#).unwrap_err();
        assert!(!err.is_retryable());

        let err = Combiner::new(CombineConfig {
            stack_size: Some(0),
            ..CombineConfig::default()
        })
        .unwrap_err();
        assert!(format!("{err}").contains("stack_size"));

        assert!(CombineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_fresh_combined_is_live() {
        let a = CancelContext::new();
        let ctx = combine([shared(&a), background()]).unwrap();
        assert_eq!(ctx.len(), 2);
        assert!(ctx.err().is_none());
        assert!(!ctx.done().is_fired());
    }

    #[test]
    fn test_deadline_is_minimum() {
        let now = Utc::now();
        let later = CancelContext::with_deadline(now + chrono::Duration::minutes(5)).unwrap();
        let sooner = CancelContext::with_deadline(now + chrono::Duration::minutes(1)).unwrap();
        let ctx = combine([shared(&later), background(), shared(&sooner)]).unwrap();
        assert_eq!(ctx.deadline(), Some(now + chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_deadline_absent() {
        let ctx = combine([background(), background()]).unwrap();
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_value_skips_null() {
        let a: Arc<dyn Context> = Arc::new(ValueContext::new(background(), "k", Value::Null));
        let b: Arc<dyn Context> = Arc::new(ValueContext::new(background(), "k", 5_i64));
        let ctx = combine([a, b]).unwrap();
        assert_eq!(ctx.value(&ContextKey::new("k")), Some(Value::Int(5)));
    }

    #[test]
    fn test_single_cancel_resolves_and_monitors_exit() {
        let a = CancelContext::new();
        let b = CancelContext::new();
        let ctx = combine([shared(&a), shared(&b)]).unwrap();

        b.cancel_with(ContextError::aborted("shutdown"));
        assert!(ctx.done().wait_timeout(Duration::from_secs(2)));
        assert_eq!(ctx.err(), Some(ContextError::aborted("shutdown")));
        assert!(wait_for_monitors(&ctx, 0));

        a.cancel();
        assert_eq!(ctx.err(), Some(ContextError::aborted("shutdown")));
    }

    #[test]
    fn test_input_done_without_error_relays_canceled() {
        let latch = Latch::new();
        let silent: Arc<dyn Context> = Arc::new(SilentContext {
            latch: Arc::clone(&latch),
        });
        let ctx = combine([silent, background()]).unwrap();
        assert!(ctx.err().is_none());

        latch.fire(ContextError::aborted("hidden"));
        assert!(ctx.done().wait_timeout(Duration::from_secs(2)));
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert!(wait_for_monitors(&ctx, 0));
    }

    #[test]
    fn test_unresolved_monitors_stay_parked() {
        let a = CancelContext::new();
        let ctx = combine([shared(&a), background()]).unwrap();
        assert!(wait_for_monitors(&ctx, 2));
        assert!(!ctx.done().wait_timeout(Duration::from_millis(20)));
        assert_eq!(ctx.live_monitors(), 2);
        a.cancel();
        assert!(wait_for_monitors(&ctx, 0));
    }

    #[test]
    fn test_custom_thread_prefix() {
        let combiner = Combiner::new(CombineConfig {
            thread_name_prefix: "edge-ctx".to_string(),
            stack_size: Some(256 * 1024),
        })
        .unwrap();
        let a = CancelContext::new();
        let ctx = combiner.combine([shared(&a)]).unwrap();
        a.cancel();
        assert!(ctx.done().wait_timeout(Duration::from_secs(2)));
        assert_eq!(combiner.config().thread_name_prefix, "edge-ctx");
    }

    #[test]
    fn test_debug_output() {
        let ctx = combine([background()]).unwrap();
        let dbg = format!("{ctx:?}");
        assert!(dbg.contains("Combined"));
        assert!(dbg.contains("inputs: 1"));
    }
}
