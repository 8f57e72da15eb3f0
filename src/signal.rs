//! One-shot completion signals.
//!
//! A signal fires by disconnecting a zero-capacity channel: the `Sender` is
//! dropped and every `Receiver` clone observes the disconnect forever after.
//! The `Latch` owns that sender and the terminal error behind one mutex, so
//! recording the error and firing happen as a single step.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, never, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::ContextError;

/// Read-only handle to a context's completion signal.
///
/// Cloning is cheap. All clones fire together and stay fired.
#[derive(Clone)]
pub struct DoneSignal {
    rx: Receiver<()>,
    // Keeps the sender alive so the signal cannot fire just because the
    // producing context was dropped.
    _owner: Option<Arc<Latch>>,
}

impl DoneSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self {
            rx: never(),
            _owner: None,
        }
    }

    /// Returns true if the signal has fired. Never blocks.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        // The sender never sends, so recv only returns on disconnect.
        while self.rx.recv().is_ok() {}
    }

    /// Blocks until the signal fires or `timeout` elapses.
    ///
    /// Returns true if the signal fired.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) => self.is_fired(),
        }
    }

    /// The underlying channel, for use inside `crossbeam_channel::select!`.
    ///
    /// A receive operation on it completes (with `Err`) once the signal fires.
    #[must_use]
    pub const fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl fmt::Debug for DoneSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoneSignal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

#[derive(Debug)]
struct LatchState {
    err: Option<ContextError>,
    trigger: Option<Sender<()>>,
}

/// Mutex-guarded single-fire event carrying the terminal error.
#[derive(Debug)]
pub(crate) struct Latch {
    rx: Receiver<()>,
    state: Mutex<LatchState>,
}

impl Latch {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, rx) = bounded::<()>(0);
        Arc::new(Self {
            rx,
            state: Mutex::new(LatchState {
                err: None,
                trigger: Some(tx),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        // No code path panics while holding the guard; recover the data anyway.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `err` and fires, unless already fired.
    ///
    /// Returns true only for the call that fired.
    pub(crate) fn fire(&self, err: ContextError) -> bool {
        let mut state = self.lock();
        if state.err.is_some() {
            return false;
        }
        state.err = Some(err);
        drop(state.trigger.take());
        true
    }

    pub(crate) fn err(&self) -> Option<ContextError> {
        self.lock().err.clone()
    }

    /// Raw receiver for monitor select loops that already hold the latch.
    pub(crate) const fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    pub(crate) fn signal(self: &Arc<Self>) -> DoneSignal {
        DoneSignal {
            rx: self.rx.clone(),
            _owner: Some(Arc::clone(self)),
        }
    }
}
