//! The user-visible promise handle.
//!
//! A [`Promise`] is a shared owner reference into one holder. Chaining
//! methods append continuation tasks to that holder and return the *same*
//! handle, so successive `.then` calls run their tasks in FIFO order on
//! one settlement cell. When a continuation returns a promise, the engine
//! fuses the two holders and every live handle is retargeted atomically.
//!
//! Free functions build roots: [`new_promise`] runs a body against a
//! fresh [`Defer`]; [`resolve`]/[`reject`] build pre-settled chains.

use crate::callback::{Callback, CallbackOutcome, IntoCallback, PanicPayload, Resolution};
use crate::defer::{Defer, DeferLoop};
use crate::engine;
use crate::holder::{obtain_lock, PromiseHolder, SharedPromise};
use crate::loc::Loc;
use crate::task::{Task, TaskState};
use crate::trace::CallStack;
use crate::value::{IntoValue, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A shared owner reference into one settlement cell.
///
/// Cloning shares the holder; [`Promise::clear`] detaches this handle.
/// All chain-building methods return the same handle (a clone), so the
/// usual fluent style reads naturally:
///
/// ```
/// use promitto::new_promise;
///
/// new_promise(|defer| defer.resolve(1_i32))
///     .then(|x: i32| x + 2)
///     .then(|x: i32| x * 10);
/// ```
#[derive(Debug, Clone)]
pub struct Promise {
    shared: Option<Arc<SharedPromise>>,
}

impl Promise {
    pub(crate) fn from_shared(shared: Arc<SharedPromise>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    pub(crate) fn shared(&self) -> Option<&Arc<SharedPromise>> {
        self.shared.as_ref()
    }

    /// Appends one task and drives the engine once.
    pub(crate) fn attach(
        &self,
        loc: Loc,
        on_resolved: Option<Callback>,
        on_rejected: Option<Callback>,
    ) -> Promise {
        self.attach_task(loc, on_resolved, on_rejected);
        self.clone()
    }

    /// Appends one task, drives the engine once, and hands the task back
    /// for callers that need to track it.
    pub(crate) fn attach_task(
        &self,
        loc: Loc,
        on_resolved: Option<Callback>,
        on_rejected: Option<Callback>,
    ) -> Option<Arc<Task>> {
        let shared = self.shared.as_ref()?;
        let task = {
            let held = obtain_lock(shared);
            let holder = held.holder();
            let task = Task::new(holder, loc, on_resolved, on_rejected);
            holder.push_task(Arc::clone(&task));
            task
        };
        engine::call(loc, Arc::clone(&task));
        Some(task)
    }

    /// Registers a continuation for the resolved settlement.
    #[track_caller]
    pub fn then<F, M>(&self, on_resolved: F) -> Promise
    where
        F: IntoCallback<M>,
    {
        self.attach(Loc::here(), Some(on_resolved.into_callback()), None)
    }

    /// Registers continuations for both settlements.
    #[track_caller]
    pub fn then_catch<F, FM, G, GM>(&self, on_resolved: F, on_rejected: G) -> Promise
    where
        F: IntoCallback<FM>,
        G: IntoCallback<GM>,
    {
        self.attach(
            Loc::here(),
            Some(on_resolved.into_callback()),
            Some(on_rejected.into_callback()),
        )
    }

    /// Registers a continuation for the rejected settlement.
    #[track_caller]
    pub fn fail<G, M>(&self, on_rejected: G) -> Promise
    where
        G: IntoCallback<M>,
    {
        self.attach(Loc::here(), None, Some(on_rejected.into_callback()))
    }

    /// Runs one callable on either settlement; its return value becomes
    /// the new settlement like any other continuation.
    #[track_caller]
    pub fn always<F, M>(&self, callback: F) -> Promise
    where
        F: IntoCallback<M>,
    {
        let callback = callback.into_callback();
        self.attach(Loc::here(), Some(callback.clone()), Some(callback))
    }

    /// Runs one callable on either settlement while preserving the
    /// settlement itself: the upstream state and value continue past it
    /// unchanged. Only an argument type mismatch is swallowed; any other
    /// failure from the callable rejects the chain.
    #[track_caller]
    pub fn finally<F, M>(&self, callback: F) -> Promise
    where
        F: IntoCallback<M>,
    {
        let loc = Loc::here();
        let on_resolved = callback.into_callback();
        let on_rejected = on_resolved.clone();
        self.attach(
            loc,
            Some(
                (move |value: Value| finally_step(&on_resolved, value, TaskState::Resolved, loc))
                    .into_callback(),
            ),
            Some(
                (move |value: Value| finally_step(&on_rejected, value, TaskState::Rejected, loc))
                    .into_callback(),
            ),
        )
    }

    /// Forwards this chain's settlement into `defer`'s task. If `defer`'s
    /// promise settles while this chain is still waiting, the chain is
    /// rejected.
    #[track_caller]
    pub fn then_defer(&self, defer: Defer) -> Promise {
        self.forward_into(Loc::here(), defer)
    }

    /// Forwards this chain's settlement into `other`'s head task, with
    /// the same drop protection as [`Promise::then_defer`]. Returns this
    /// handle unchanged if `other` has no head task to settle.
    #[track_caller]
    pub fn then_promise(&self, other: &Promise) -> Promise {
        match other.head_defer() {
            Some(defer) => self.forward_into(Loc::here(), defer),
            None => self.clone(),
        }
    }

    /// Forwards this chain's settlement into a loop: resolution continues
    /// the loop, rejection rejects it.
    #[track_caller]
    pub fn then_loop(&self, looper: DeferLoop) -> Promise {
        let loc = Loc::here();
        let target = looper.promise();
        let continue_side = looper.clone();
        let reject_side = looper;
        let forwarding = self.attach_task(
            loc,
            Some(
                (move |_: Value| {
                    continue_side
                        .defer()
                        .settle(loc, TaskState::Resolved, Value::empty());
                })
                .into_callback(),
            ),
            Some(
                (move |reason: Value| {
                    reject_side.defer().settle(loc, TaskState::Rejected, reason);
                })
                .into_callback(),
            ),
        );
        let ret = self.clone();
        if let Some(forwarding) = forwarding {
            let guard = ret.clone();
            target.finally(move || {
                guard.reject_unless_forwarded(loc, &forwarding);
            });
        }
        ret
    }

    fn forward_into(&self, loc: Loc, defer: Defer) -> Promise {
        let target = defer.promise();
        let resolve_side = defer.clone();
        let reject_side = defer;
        let forwarding = self.attach_task(
            loc,
            Some(
                (move |value: Value| {
                    resolve_side.settle(loc, TaskState::Resolved, value);
                })
                .into_callback(),
            ),
            Some(
                (move |reason: Value| {
                    reject_side.settle(loc, TaskState::Rejected, reason);
                })
                .into_callback(),
            ),
        );
        let ret = self.clone();
        if let Some(forwarding) = forwarding {
            let guard = ret.clone();
            target.finally(move || {
                guard.reject_unless_forwarded(loc, &forwarding);
            });
        }
        ret
    }

    /// Rejects the chain's head task, but only while `forwarding` is
    /// still pending. Once the forwarding task has run, the chain
    /// settled on its own and later continuations here are unrelated to
    /// the forwarding target; the hook must not touch them.
    pub(crate) fn reject_unless_forwarded(&self, loc: Loc, forwarding: &Arc<Task>) {
        let Some(shared) = &self.shared else {
            return;
        };
        let held = obtain_lock(shared);
        if forwarding.state() != TaskState::Pending {
            return;
        }
        let Some(head) = held.holder().front_task() else {
            return;
        };
        if let Some(defer) = Defer::from_task(head) {
            defer.settle(loc, TaskState::Rejected, Value::empty());
        }
        drop(held);
    }

    /// Resolves the chain's head task, if one is still pending.
    #[track_caller]
    pub fn resolve<T: IntoValue>(&self, value: T) {
        self.settle_head(Loc::here(), TaskState::Resolved, value.into_value());
    }

    /// Rejects the chain's head task, if one is still pending.
    #[track_caller]
    pub fn reject<T: IntoValue>(&self, value: T) {
        self.settle_head(Loc::here(), TaskState::Rejected, value.into_value());
    }

    pub(crate) fn settle_head(&self, loc: Loc, state: TaskState, value: Value) {
        let Some(shared) = &self.shared else {
            return;
        };
        let task = {
            let held = obtain_lock(shared);
            held.holder().front_task()
        };
        if let Some(task) = task {
            if let Some(defer) = Defer::from_task(task) {
                defer.settle(loc, state, value);
            }
        }
    }

    /// A defer bound to this chain's head task, if any.
    pub(crate) fn head_defer(&self) -> Option<Defer> {
        let shared = self.shared.as_ref()?;
        let task = {
            let held = obtain_lock(shared);
            held.holder().front_task()
        }?;
        Defer::from_task(task)
    }

    /// This holder's call trace (empty for a detached handle).
    #[must_use]
    pub fn call_stack(&self) -> CallStack {
        self.shared
            .as_ref()
            .map(|shared| shared.holder().trace_snapshot())
            .unwrap_or_default()
    }

    /// Logs the holder's shape at debug level.
    pub fn dump(&self) {
        match &self.shared {
            Some(shared) => shared.holder().dump(),
            None => tracing::debug!("promise handle is detached"),
        }
    }

    /// Detaches this handle from its holder.
    pub fn clear(&mut self) {
        self.shared = None;
    }

    /// Returns true while the handle still references a holder.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.is_some()
    }
}

/// Interposes the `finally` callable, preserving the upstream settlement.
fn finally_step(callback: &Callback, value: Value, state: TaskState, loc: Loc) -> Promise {
    let callback = callback.clone();
    new_promise_at(loc, move |defer| {
        match callback.invoke(value.clone()) {
            // The mismatch is swallowed; the settlement passes through.
            CallbackOutcome::Mismatch(_) => {}
            CallbackOutcome::Settle(Resolution::Break(reason)) => {
                defer.settle(loc, TaskState::Rejected, reason);
                return;
            }
            // Other return values are discarded.
            CallbackOutcome::Settle(_) => {}
        }
        defer.settle(loc, state, value);
    })
}

/// Builds an unsettled chain: one holder with a pass-through head task
/// waiting for `resolve`/`reject`.
#[track_caller]
#[must_use]
pub fn new_promise_pending() -> Promise {
    new_promise_pending_at(Loc::here())
}

pub(crate) fn new_promise_pending_at(loc: Loc) -> Promise {
    let holder = PromiseHolder::new();
    let shared = SharedPromise::new(Arc::clone(&holder));
    holder.push_owner(Arc::downgrade(&shared));
    let promise = Promise::from_shared(shared);
    promise.attach(loc, None, None);
    promise
}

/// Builds a chain and runs `run` against a [`Defer`] for its head task.
/// A panic in `run` rejects the chain with a [`PanicPayload`] value.
#[track_caller]
pub fn new_promise<F>(run: F) -> Promise
where
    F: FnOnce(&Defer),
{
    new_promise_at(Loc::here(), run)
}

pub(crate) fn new_promise_at<F>(loc: Loc, run: F) -> Promise
where
    F: FnOnce(&Defer),
{
    let promise = new_promise_pending_at(loc);
    let task = promise.shared().and_then(|shared| {
        let held = obtain_lock(shared);
        held.holder().front_task()
    });
    if let Some(defer) = task.and_then(Defer::from_task) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| run(&defer))) {
            defer.settle(
                loc,
                TaskState::Rejected,
                Value::new(PanicPayload::from_box(payload)),
            );
        }
    }
    promise
}

/// A chain already resolved with `value`.
#[track_caller]
#[must_use]
pub fn resolve<T: IntoValue>(value: T) -> Promise {
    let loc = Loc::here();
    let value = value.into_value();
    new_promise_at(loc, move |defer| {
        defer.settle(loc, TaskState::Resolved, value);
    })
}

/// A chain already rejected with `value`.
#[track_caller]
#[must_use]
pub fn reject<T: IntoValue>(value: T) -> Promise {
    let loc = Loc::here();
    let value = value.into_value();
    new_promise_at(loc, move |defer| {
        defer.settle(loc, TaskState::Rejected, value);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn observed() -> (Arc<Mutex<Option<Value>>>, impl FnMut(Value) + Send + 'static) {
        let slot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        (slot, move |value: Value| {
            *writer.lock().expect("observer lock poisoned") = Some(value);
        })
    }

    #[test]
    fn chained_arithmetic() {
        let (seen, observe) = observed();
        new_promise(|defer| defer.resolve(1_i32))
            .then(|x: i32| x + 2)
            .then(|x: i32| x * 10)
            .then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert_eq!(value.get::<i32>().unwrap(), 30);
    }

    #[test]
    fn rejection_passes_through_to_fail() {
        let (seen, observe) = observed();
        new_promise(|defer| defer.reject("e"))
            .then(|x: i32| x + 1)
            .fail(|reason: String| format!("caught:{reason}"))
            .then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert_eq!(value.get::<String>().unwrap(), "caught:e");
    }

    #[test]
    fn returned_promise_is_flattened() {
        let (seen, observe) = observed();
        new_promise(|defer| defer.resolve(1_i32))
            .then(|x: i32| new_promise(move |defer| defer.resolve(x + 41)))
            .then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert_eq!(value.get::<i32>().unwrap(), 42);
    }

    #[test]
    fn deferred_resolution_settles_later() {
        let (seen, observe) = observed();
        let stash: Arc<Mutex<Option<Defer>>> = Arc::new(Mutex::new(None));
        let keeper = Arc::clone(&stash);
        new_promise(move |defer| {
            *keeper.lock().unwrap() = Some(defer.clone());
        })
        .then(|x: u32| x * 3)
        .then(observe);
        assert!(seen.lock().unwrap().is_none());
        stash.lock().unwrap().take().unwrap().resolve(7_u32);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert_eq!(value.get::<u32>().unwrap(), 21);
    }

    #[test]
    fn resolve_on_settled_head_is_noop() {
        let (seen, observe) = observed();
        let promise = new_promise(|defer| defer.resolve(1_u32));
        promise.resolve(2_u32);
        promise.then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert_eq!(value.get::<u32>().unwrap(), 1);
    }

    #[test]
    fn cleared_handle_is_inert() {
        let mut promise = new_promise(|defer| defer.resolve(1_u32));
        assert!(promise.is_attached());
        promise.clear();
        assert!(!promise.is_attached());
        promise.resolve(2_u32);
        promise.reject("x");
        assert!(promise.call_stack().is_empty());
        let chained = promise.then(|x: u32| x);
        assert!(!chained.is_attached());
    }

    #[test]
    fn panic_in_body_rejects() {
        let (seen, observe) = observed();
        new_promise(|_defer| panic!("exploded"))
            .fail(|reason: Value| reason)
            .then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        let payload = value.get::<PanicPayload>().unwrap();
        assert_eq!(payload.message(), "exploded");
    }

    #[test]
    fn mismatch_in_resolved_continuation_rejects_with_cast_error() {
        use crate::value::CastError;
        let (seen, observe) = observed();
        new_promise(|defer| defer.resolve("text"))
            .then(|x: i32| x)
            .fail(|reason: CastError| reason.to_string())
            .then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert!(value
            .get::<String>()
            .unwrap()
            .contains("payload type mismatch"));
    }

    #[test]
    fn mismatch_in_rejected_continuation_preserves_value() {
        let (seen, observe) = observed();
        new_promise(|defer| defer.reject("reason"))
            .fail(|_wrong: i32| ())
            .fail(|reason: String| reason)
            .then(observe);
        let value = seen.lock().unwrap().take().expect("chain did not settle");
        assert_eq!(value.get::<String>().unwrap(), "reason");
    }
}
