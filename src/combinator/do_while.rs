//! The `do_while` loop combinator.
//!
//! Each iteration builds a fresh holder, hands the body a [`DeferLoop`],
//! and chains a trampoline behind it: resolution (from `do_continue`)
//! runs the body again, a rejection carrying the break sentinel resolves
//! the outer chain with the carried value, and any other rejection
//! propagates.
//!
//! Iterations that settle synchronously recurse through the engine; hosts
//! that settle from an event loop iterate with flat stacks.

use crate::callback::IntoCallback;
use crate::defer::DeferLoop;
use crate::loc::Loc;
use crate::promise::{new_promise_at, Promise};
use crate::task::TaskState;
use crate::value::Value;
use std::sync::{Arc, Mutex};

/// Payload wrapper distinguishing `do_break` from an ordinary rejection.
#[derive(Debug)]
pub(crate) struct LoopBreak(pub(crate) Value);

type SharedBody = Arc<Mutex<dyn FnMut(&DeferLoop) + Send>>;

/// Repeatedly invokes `body` with a fresh [`DeferLoop`] until it breaks
/// or rejects. `do_break(value)` resolves the returned chain with
/// `value`; any other rejection propagates to it.
#[track_caller]
#[must_use]
pub fn do_while<F>(body: F) -> Promise
where
    F: FnMut(&DeferLoop) + Send + 'static,
{
    let loc = Loc::here();
    let body: SharedBody = Arc::new(Mutex::new(body));
    iterate(loc, body)
}

fn iterate(loc: Loc, body: SharedBody) -> Promise {
    let run = Arc::clone(&body);
    let next = body;
    new_promise_at(loc, move |defer| {
        let looper = DeferLoop::new(defer.clone());
        (run.lock().expect("loop body lock poisoned"))(&looper);
    })
    .attach(
        loc,
        Some((move |_: Value| iterate(loc, Arc::clone(&next))).into_callback()),
        Some((move |reason: Value| unwrap_break(loc, reason)).into_callback()),
    )
}

fn unwrap_break(loc: Loc, reason: Value) -> Promise {
    new_promise_at(loc, move |defer| {
        match reason.downcast_ref::<LoopBreak>() {
            Some(brk) => defer.settle(loc, TaskState::Resolved, brk.0.clone()),
            None => defer.settle(loc, TaskState::Rejected, reason.clone()),
        }
    })
}
