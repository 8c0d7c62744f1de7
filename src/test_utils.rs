//! Test utilities.
//!
//! Shared helpers for the unit and e2e suites:
//! - Consistent tracing-based logging initialization
//! - Settlement probes for observing how a chain ends
//!
//! # Example
//!
//! ```
//! use promitto::test_utils::{init_test_logging, watch};
//! use promitto::{new_promise, TaskState};
//!
//! init_test_logging();
//! let probe = watch(&new_promise(|defer| defer.resolve(5_u32)));
//! assert_eq!(probe.state(), Some(TaskState::Resolved));
//! ```

use crate::defer::Defer;
use crate::task::TaskState;
use crate::value::Value;
use crate::{new_promise, Promise};
use std::sync::{Arc, Mutex, Once};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// The observed end of a chain: state and value at settlement.
#[derive(Debug, Clone)]
pub struct SettlementProbe {
    slot: Arc<Mutex<Option<(TaskState, Value)>>>,
}

impl SettlementProbe {
    /// The observed settlement, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<(TaskState, Value)> {
        self.slot.lock().expect("probe lock poisoned").clone()
    }

    /// The observed state, if any.
    #[must_use]
    pub fn state(&self) -> Option<TaskState> {
        self.outcome().map(|(state, _)| state)
    }

    /// The observed value, if any.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.outcome().map(|(_, value)| value)
    }

    /// The resolved value; panics if the chain rejected or never settled.
    #[must_use]
    pub fn expect_resolved(&self) -> Value {
        match self.outcome() {
            Some((TaskState::Resolved, value)) => value,
            other => panic!("expected resolution, observed {other:?}"),
        }
    }

    /// The rejection reason; panics if the chain resolved or never
    /// settled.
    #[must_use]
    pub fn expect_rejected(&self) -> Value {
        match self.outcome() {
            Some((TaskState::Rejected, reason)) => reason,
            other => panic!("expected rejection, observed {other:?}"),
        }
    }
}

/// A pending chain plus the defer that settles its head task, for tests
/// that drive settlement order by hand.
#[must_use]
pub fn pending_pair() -> (Promise, Defer) {
    let stash: Arc<Mutex<Option<Defer>>> = Arc::new(Mutex::new(None));
    let keeper = Arc::clone(&stash);
    let promise = new_promise(move |defer| {
        *keeper.lock().expect("defer stash lock poisoned") = Some(defer.clone());
    });
    let defer = stash
        .lock()
        .expect("defer stash lock poisoned")
        .take()
        .expect("promise body did not run");
    (promise, defer)
}

/// Attaches a probe to the end of `promise`'s chain.
///
/// The probe consumes the settlement (a rejection observed here no longer
/// reaches the uncaught sink), so attach it last.
pub fn watch(promise: &Promise) -> SettlementProbe {
    let slot = Arc::new(Mutex::new(None));
    let on_resolved = Arc::clone(&slot);
    let on_rejected = Arc::clone(&slot);
    promise.then_catch(
        move |value: Value| {
            *on_resolved.lock().expect("probe lock poisoned") =
                Some((TaskState::Resolved, value));
        },
        move |reason: Value| {
            *on_rejected.lock().expect("probe lock poisoned") =
                Some((TaskState::Rejected, reason));
        },
    );
    SettlementProbe { slot }
}
