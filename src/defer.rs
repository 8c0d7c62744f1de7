//! Settlement capabilities.
//!
//! A [`Defer`] binds the right to settle one task: it strongly holds the
//! task and a private indirection to the task's holder, so the holder
//! cannot vanish mid-settlement. Settling a task that is no longer
//! pending is a no-op, which is what makes `resolve` on an
//! already-settled chain safe for combinators to call blindly.
//!
//! A [`DeferLoop`] wraps a `Defer` for [`do_while`](crate::do_while):
//! `do_continue` re-iterates, `do_break` carries a value out through a
//! sentinel rejection the loop trampoline intercepts.

use crate::combinator::do_while::LoopBreak;
use crate::engine;
use crate::holder::{lock_holder, obtain_lock, SharedPromise};
use crate::loc::Loc;
use crate::task::{Task, TaskState};
use crate::trace::CallStack;
use crate::value::{IntoValue, Value};
use crate::Promise;
use std::fmt;
use std::sync::Arc;

/// The capability to settle one task.
#[derive(Clone)]
pub struct Defer {
    task: Arc<Task>,
    shared: Arc<SharedPromise>,
}

impl Defer {
    /// Binds a defer to a task, or `None` if the task's holder is gone.
    ///
    /// The defer's indirection registers as an owner so a later join
    /// retargets the settlement capability along with every other
    /// handle.
    pub(crate) fn from_task(task: Arc<Task>) -> Option<Self> {
        let holder = task.holder()?;
        let shared = SharedPromise::new(Arc::clone(&holder));
        {
            let held = lock_holder(&holder);
            held.holder().push_owner(Arc::downgrade(&shared));
        }
        Some(Self { task, shared })
    }

    /// Resolves the bound task's holder with `value` and drives the
    /// engine. No-op if the task already ran.
    #[track_caller]
    pub fn resolve<T: IntoValue>(&self, value: T) {
        self.settle(Loc::here(), TaskState::Resolved, value.into_value());
    }

    /// Rejects the bound task's holder with `value` and drives the
    /// engine. No-op if the task already ran.
    #[track_caller]
    pub fn reject<T: IntoValue>(&self, value: T) {
        self.settle(Loc::here(), TaskState::Rejected, value.into_value());
    }

    pub(crate) fn settle(&self, loc: Loc, state: TaskState, value: Value) {
        let held = obtain_lock(&self.shared);
        if self.task.state() != TaskState::Pending {
            return;
        }
        held.holder().settle(state, value);
        // The lock is held across the engine drive, re-entrantly.
        engine::call(loc, Arc::clone(&self.task));
        drop(held);
    }

    /// A handle onto the bound holder.
    #[must_use]
    pub fn promise(&self) -> Promise {
        Promise::from_shared(Arc::clone(&self.shared))
    }

    /// The bound holder's call trace.
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.promise().call_stack()
    }
}

impl fmt::Debug for Defer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Defer { .. }")
    }
}

/// Loop controls handed to a [`do_while`](crate::do_while) body.
#[derive(Debug, Clone)]
pub struct DeferLoop {
    defer: Defer,
}

impl DeferLoop {
    pub(crate) fn new(defer: Defer) -> Self {
        Self { defer }
    }

    /// Finishes this iteration and runs the body again.
    #[track_caller]
    pub fn do_continue(&self) {
        self.defer
            .settle(Loc::here(), TaskState::Resolved, Value::empty());
    }

    /// Leaves the loop; the outer promise resolves with `value`.
    #[track_caller]
    pub fn do_break<T: IntoValue>(&self, value: T) {
        self.defer.settle(
            Loc::here(),
            TaskState::Rejected,
            Value::new(LoopBreak(value.into_value())),
        );
    }

    /// Rejects the loop; the outer promise rejects with `value`.
    #[track_caller]
    pub fn reject<T: IntoValue>(&self, value: T) {
        self.defer
            .settle(Loc::here(), TaskState::Rejected, value.into_value());
    }

    pub(crate) fn defer(&self) -> &Defer {
        &self.defer
    }

    /// A handle onto the iteration's holder.
    #[must_use]
    pub fn promise(&self) -> Promise {
        self.defer.promise()
    }

    /// The iteration holder's call trace.
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.defer.call_stack()
    }
}
