//! Detached background thread spawning.

use std::thread;

use crate::error::{CombineError, CombineResult};

/// Spawns a named, detached thread.
///
/// The join handle is dropped on purpose: background watchers exit on their
/// own once the signal they watch fires.
pub(crate) fn spawn_detached<F>(name: String, stack_size: Option<usize>, f: F) -> CombineResult<()>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = thread::Builder::new().name(name.clone());
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }

    builder.spawn(f).map(drop).map_err(|e| CombineError::SpawnFailed {
        name,
        message: e.to_string(),
    })
}
