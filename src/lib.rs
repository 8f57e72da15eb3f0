//! # kyro-contexts - Combine cancellation scopes
//!
//! A request often has to honor several independent lifecycles at once: its
//! own cancellation, a server shutdown signal, a per-tenant deadline. This
//! crate folds any number of such contexts into one that callers can treat
//! uniformly.
//!
//! ## Core Concepts
//!
//! - **Context**: deadline, one-shot completion signal, terminal error, and a
//!   read-only key/value scope
//! - **DoneSignal**: cloneable completion handle that composes with
//!   `crossbeam_channel::select!`
//! - **Combined**: ends when the first input ends, carrying that input's error
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kyro_contexts::{combine, CancelContext, Context, ContextError, ValueContext};
//!
//! let shutdown = CancelContext::new();
//! let request = CancelContext::with_timeout(Duration::from_secs(30)).unwrap();
//! let scoped = ValueContext::new(Arc::new(request.clone()), "tenant", "acme");
//!
//! let ctx = combine([
//!     Arc::new(scoped) as Arc<dyn Context>,
//!     Arc::new(shutdown.clone()) as Arc<dyn Context>,
//! ])
//! .unwrap();
//!
//! assert!(ctx.deadline().is_some());
//! assert_eq!(ctx.value(&"tenant".into()).unwrap().as_string(), Some("acme"));
//!
//! shutdown.cancel();
//! ctx.done().wait();
//! assert_eq!(ctx.err(), Some(ContextError::Canceled));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod combine;
pub mod context;
pub mod error;
pub mod scope;
pub mod signal;
pub mod value;

mod spawn;

// Re-export primary types at crate root for convenience
pub use combine::{combine, CombineConfig, Combined, Combiner};
pub use context::{background, Background, Context, ContextId};
pub use error::{CombineError, CombineResult, ContextError};
pub use scope::{CancelContext, ValueContext};
pub use signal::DoneSignal;
pub use value::{ContextKey, Value};
