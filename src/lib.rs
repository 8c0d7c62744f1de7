//! Promitto: a JavaScript-style promise core for synchronous and
//! event-loop hosts.
//!
//! # Overview
//!
//! Promitto is a deferred-computation engine: a graph of promise holders
//! threaded by continuation tasks, with settlement propagation, chain
//! flattening, multi-owner lifetime, an optional multi-threaded locking
//! protocol, a bounded call-site trace per holder, and an
//! uncaught-rejection handler. It is not a scheduler — the engine never
//! owns a thread or an event loop; continuations run synchronously on
//! whichever agent calls `resolve`, `reject`, or `then`.
//!
//! # Core Guarantees
//!
//! - **Monotone settlement**: a holder settles exactly once; the engine's
//!   transient pending window is not observable from outside
//! - **FIFO tasks**: continuations on one holder run in registration
//!   order, across joins included
//! - **Flattening**: a continuation returning a promise fuses the two
//!   holders; the chain proceeds on a single identity
//! - **No silent rejections**: a rejected holder dropped without a
//!   consumer reaches the replaceable uncaught-rejection sink
//!
//! # Module Structure
//!
//! - [`value`]: type-erased payloads and conversion traits
//! - [`callback`]: the callable wrapper adapting typed closures
//! - [`promise`]: the [`Promise`] handle and chain construction
//! - [`defer`]: settlement capabilities ([`Defer`], [`DeferLoop`])
//! - [`combinator`]: `all`, `race` and friends, `do_while`
//! - [`trace`]: the bounded per-holder call trace
//! - [`config`]: trace capacity configuration
//! - [`uncaught`]: the process-wide rejection sink
//!
//! # Example
//!
//! ```
//! use promitto::new_promise;
//! use std::sync::{Arc, Mutex};
//!
//! let tap = Arc::new(Mutex::new(None));
//! let probe = Arc::clone(&tap);
//!
//! new_promise(|defer| defer.resolve(1_i32))
//!     .then(|x: i32| x + 2)
//!     .then(|x: i32| x * 10)
//!     .then(move |x: i32| {
//!         *probe.lock().unwrap() = Some(x);
//!     });
//!
//! assert_eq!(tap.lock().unwrap().take(), Some(30));
//! ```
//!
//! # Build Modes
//!
//! With the default `multithread` feature every holder carries a
//! re-entrant counting lock and engine agents queue FIFO on its condition
//! variable. Without it the locks compile to no-ops for single-threaded
//! hosts; the API is identical.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod callback;
pub mod combinator;
pub mod config;
pub mod defer;
mod engine;
mod holder;
mod lock;
pub mod loc;
pub mod promise;
mod task;
pub mod test_utils;
pub mod trace;
pub mod uncaught;
pub mod value;

pub use callback::{Callback, IntoCallback, IntoResolution, PanicPayload, Resolution};
pub use combinator::{all, do_while, race, race_and_reject, race_and_resolve};
pub use config::{install_trace_config, ConfigError, TraceConfig, DEFAULT_TRACE_CAPACITY};
pub use defer::{Defer, DeferLoop};
pub use engine::call_stack;
pub use loc::Loc;
pub use promise::{new_promise, new_promise_pending, reject, resolve, Promise};
pub use task::TaskState;
pub use trace::{CallRecord, CallStack};
pub use uncaught::handle_uncaught_exception;
pub use value::{CastError, FromValue, IntoValue, Value};
