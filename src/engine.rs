//! Settlement propagation (`call`) and holder fusion (`join`).
//!
//! The engine owns no thread: it runs on whichever agent called
//! `resolve`, `reject`, or `then`, and it is re-entrant — a continuation
//! may settle further promises, and those settlements drive nested engine
//! frames. The holder's state is temporarily reset to `Pending` around a
//! continuation so nested settlements buffer as tasks instead of racing
//! through the queue.
//!
//! When a continuation returns a promise, the returned holder absorbs the
//! current one (`join`) and the loop continues on the new holder. Lock
//! acquisition in that hand-off is callee-returned first, then caller,
//! the only place two holder locks are held at once.

use crate::callback::{Callback, CallbackOutcome, PanicPayload, Resolution};
use crate::holder::{healthy_check, lock_holder, obtain_lock, HeldLock, PromiseHolder};
use crate::lock::UnlockScope;
use crate::loc::Loc;
use crate::task::{Task, TaskState};
use crate::trace::CallStack;
use crate::value::Value;
use crate::Promise;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

thread_local! {
    /// Holders currently executing a continuation on this thread,
    /// innermost last. Read by [`call_stack`].
    static ACTIVE_HOLDERS: RefCell<Vec<Arc<PromiseHolder>>> = const { RefCell::new(Vec::new()) };
}

struct ActiveHolderGuard;

impl ActiveHolderGuard {
    fn enter(holder: &Arc<PromiseHolder>) -> Self {
        ACTIVE_HOLDERS.with(|stack| stack.borrow_mut().push(Arc::clone(holder)));
        Self
    }
}

impl Drop for ActiveHolderGuard {
    fn drop(&mut self) {
        ACTIVE_HOLDERS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The call trace of the innermost holder currently executing a
/// continuation on this thread, or an empty snapshot outside one.
#[must_use]
pub fn call_stack() -> CallStack {
    ACTIVE_HOLDERS.with(|stack| {
        stack
            .borrow()
            .last()
            .map(|holder| holder.trace_snapshot())
            .unwrap_or_default()
    })
}

/// How a type mismatch from the consumed callable settles the holder.
#[derive(Clone, Copy)]
enum MismatchPolicy {
    /// Resolved branch: reject with the mismatch error as payload.
    RejectWithError,
    /// Rejected branch: keep the rejection and its value (pass-through).
    PreserveRejection,
}

/// Runs one task and every task it unblocks, until the current holder is
/// pending again, its queue drains, or it is gone.
pub(crate) fn call(loc: Loc, mut task: Arc<Task>) {
    loop {
        let Some(mut holder) = task.holder() else {
            return;
        };
        {
            let held = lock_holder(&holder);
            if task.state() != TaskState::Pending {
                return;
            }
            if holder.state() == TaskState::Pending {
                return;
            }
            // FIFO fairness: earlier registrations run first. Also wake
            // when another agent drained this task or consumed the
            // settlement while we waited.
            holder.lock.wait_until(|| {
                holder.is_front(&task)
                    || task.state() != TaskState::Pending
                    || holder.state() == TaskState::Pending
            });
            if task.state() != TaskState::Pending {
                // Another agent's loop ran this task.
                return;
            }
            let state = holder.state();
            if state == TaskState::Pending {
                // The settlement was consumed; the task stays queued for
                // the next one.
                return;
            }

            let popped = holder.pop_front_task();
            debug_assert!(popped.as_ref().is_some_and(|front| Arc::ptr_eq(front, &task)));
            holder.record_call(loc, task.loc());
            task.set_state(state);

            let consumed = match state {
                TaskState::Resolved => task
                    .take_on_resolved()
                    .map(|cb| (cb, MismatchPolicy::RejectWithError)),
                TaskState::Rejected => task
                    .take_on_rejected()
                    .map(|cb| (cb, MismatchPolicy::PreserveRejection)),
                TaskState::Pending => unreachable!("settled state checked above"),
            };

            match consumed {
                None => {
                    // Pass through: the next task inherits state and
                    // value unchanged.
                }
                Some((callback, policy)) => {
                    // Nested settlements issued by the callable must
                    // buffer as tasks rather than race the engine.
                    holder.set_state(TaskState::Pending);
                    let argument = holder.value();
                    let (outcome, adopted) = {
                        let _window = UnlockScope::new(&holder.lock);
                        let _active = ActiveHolderGuard::enter(&holder);
                        let outcome = invoke(&callback, argument);
                        // Lock the callee-returned holder before the
                        // window closes and re-acquires ours.
                        let adopted = chain_target(&outcome)
                            .and_then(|promise| promise.shared().map(|shared| obtain_lock(shared)));
                        (outcome, adopted)
                    };
                    apply_outcome(outcome, adopted, &mut holder, policy);
                }
            }
            task.clear_callbacks();
            drop(held);
        }

        // The holder may have changed across a join; fetch its next task.
        let next = {
            let _held = lock_holder(&holder);
            holder.front_task()
        };
        match next {
            Some(next) => task = next,
            None => return,
        }
    }
}

/// Invokes a callable, converting a panic into a rejection payload.
fn invoke(callback: &Callback, argument: Value) -> CallbackOutcome {
    match catch_unwind(AssertUnwindSafe(|| callback.invoke(argument))) {
        Ok(outcome) => outcome,
        Err(payload) => CallbackOutcome::Settle(Resolution::Break(Value::new(
            PanicPayload::from_box(payload),
        ))),
    }
}

/// The promise whose holder the chain should adopt, if the callable
/// produced one — either directly or as a `Value` payload.
fn chain_target(outcome: &CallbackOutcome) -> Option<Promise> {
    match outcome {
        CallbackOutcome::Settle(Resolution::Chain(promise)) => Some(promise.clone()),
        CallbackOutcome::Settle(Resolution::Fulfil(value)) => {
            value.downcast_ref::<Promise>().cloned()
        }
        _ => None,
    }
}

/// Applies the callable's outcome to the holder, adopting the returned
/// promise's holder when there is one.
fn apply_outcome(
    outcome: CallbackOutcome,
    adopted: Option<HeldLock>,
    holder: &mut Arc<PromiseHolder>,
    policy: MismatchPolicy,
) {
    if let Some(adopted) = adopted {
        let left = Arc::clone(adopted.holder());
        join(&left, holder);
        *holder = left;
        // `adopted` drops here, releasing the new holder's lock; the old
        // holder's lock is released by the caller's guard.
        return;
    }
    match outcome {
        CallbackOutcome::Settle(Resolution::Fulfil(value)) => {
            holder.settle(TaskState::Resolved, value);
        }
        CallbackOutcome::Settle(Resolution::Chain(_)) => {
            // The returned handle was cleared; nothing to adopt.
            holder.settle(TaskState::Resolved, Value::empty());
        }
        CallbackOutcome::Settle(Resolution::Break(reason)) => {
            holder.settle(TaskState::Rejected, reason);
        }
        CallbackOutcome::Mismatch(mismatch) => match policy {
            MismatchPolicy::RejectWithError => {
                tracing::debug!(%mismatch, "continuation argument mismatch");
                holder.settle(TaskState::Rejected, Value::new(mismatch));
            }
            MismatchPolicy::PreserveRejection => {
                holder.set_state(TaskState::Rejected);
            }
        },
    }
}

/// Fuses `right` into `left`: pending tasks are retargeted and appended,
/// the trace history is merged (right's records are older), and every
/// live handle on `right` is atomically repointed at `left`. `right`
/// becomes a resolved shell so its destructor stays quiet.
///
/// Callers hold both holders' locks. Joining a holder with itself is a
/// no-op.
pub(crate) fn join(left: &Arc<PromiseHolder>, right: &Arc<PromiseHolder>) {
    if Arc::ptr_eq(left, right) {
        return;
    }
    healthy_check(left);
    healthy_check(right);

    let tasks = right.take_pending_tasks();
    for task in &tasks {
        task.retarget(Arc::downgrade(left));
    }
    left.append_tasks(tasks);

    left.prepend_trace(right.take_trace());

    let owners = right.take_owners();
    right.force_resolved();
    if owners.len() > 100 {
        tracing::warn!(
            owners = owners.len(),
            "possible leak: unusually many owners migrating in join"
        );
    }
    for owner in owners {
        let Some(owner) = owner.upgrade() else {
            continue;
        };
        // Re-enters `right`'s lock, which the caller already holds, so
        // the swap cannot race a fresh acquisition through the handle.
        let relock = obtain_lock(&owner);
        owner.store(Arc::clone(left));
        left.push_owner(Arc::downgrade(&owner));
        drop(relock);
    }

    healthy_check(left);
}
