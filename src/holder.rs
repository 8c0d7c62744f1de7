//! The settlement cell and its shared indirection.
//!
//! A [`PromiseHolder`] carries the settled state and value, the FIFO
//! queue of pending tasks, the weak set of owning handles, and the
//! bounded call trace. Handles reach it through a [`SharedPromise`]
//! indirection whose holder pointer swaps atomically when two holders are
//! joined; [`obtain_lock`] implements the retry-after-lock protocol that
//! makes the swap safe against concurrent lock acquisition.
//!
//! Data accesses go through a plain mutex held only across short field
//! sections. The protocol-level critical sections (who may run the
//! engine, FIFO ordering, scoped release around user code) are the
//! [`HolderLock`]'s job.

use crate::config;
use crate::lock::HolderLock;
use crate::loc::Loc;
use crate::task::{Task, TaskState};
use crate::trace::{CallStack, CallTrace};
use crate::value::Value;
use arc_swap::ArcSwap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Default)]
struct HolderInner {
    state: TaskState,
    value: Value,
    pending_tasks: VecDeque<Arc<Task>>,
    owners: Vec<Weak<SharedPromise>>,
    trace: CallTrace,
}

/// The settlement cell.
#[derive(Debug)]
pub(crate) struct PromiseHolder {
    pub(crate) lock: HolderLock,
    inner: Mutex<HolderInner>,
}

impl PromiseHolder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: HolderLock::new(),
            inner: Mutex::new(HolderInner::default()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, HolderInner> {
        self.inner.lock().expect("holder data lock poisoned")
    }

    pub(crate) fn state(&self) -> TaskState {
        self.inner().state
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.inner().state = state;
    }

    pub(crate) fn value(&self) -> Value {
        self.inner().value.clone()
    }

    pub(crate) fn settle(&self, state: TaskState, value: Value) {
        let mut inner = self.inner();
        inner.state = state;
        inner.value = value;
    }

    /// Forces the shell state after a join so the dying holder does not
    /// reach the uncaught-rejection sink.
    pub(crate) fn force_resolved(&self) {
        self.inner().state = TaskState::Resolved;
    }

    pub(crate) fn push_task(&self, task: Arc<Task>) {
        self.inner().pending_tasks.push_back(task);
    }

    pub(crate) fn front_task(&self) -> Option<Arc<Task>> {
        self.inner().pending_tasks.front().cloned()
    }

    pub(crate) fn pop_front_task(&self) -> Option<Arc<Task>> {
        self.inner().pending_tasks.pop_front()
    }

    pub(crate) fn is_front(&self, task: &Arc<Task>) -> bool {
        self.inner()
            .pending_tasks
            .front()
            .is_some_and(|front| Arc::ptr_eq(front, task))
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.inner().pending_tasks.len()
    }

    pub(crate) fn take_pending_tasks(&self) -> VecDeque<Arc<Task>> {
        std::mem::take(&mut self.inner().pending_tasks)
    }

    pub(crate) fn append_tasks(&self, mut tasks: VecDeque<Arc<Task>>) {
        self.inner().pending_tasks.append(&mut tasks);
    }

    pub(crate) fn push_owner(&self, owner: Weak<SharedPromise>) {
        self.inner().owners.push(owner);
    }

    pub(crate) fn take_owners(&self) -> Vec<Weak<SharedPromise>> {
        std::mem::take(&mut self.inner().owners)
    }

    pub(crate) fn owner_count(&self) -> usize {
        self.inner().owners.len()
    }

    /// Records the driving site and the task's registration site.
    pub(crate) fn record_call(&self, call_loc: Loc, task_loc: Loc) {
        let capacity = config::trace_capacity();
        let mut inner = self.inner();
        inner.trace.record(call_loc, capacity);
        inner.trace.record(task_loc, capacity);
    }

    pub(crate) fn take_trace(&self) -> CallTrace {
        std::mem::take(&mut self.inner().trace)
    }

    pub(crate) fn prepend_trace(&self, older: CallTrace) {
        let capacity = config::trace_capacity();
        self.inner().trace.prepend(older, capacity);
    }

    pub(crate) fn trace_snapshot(&self) -> CallStack {
        self.inner().trace.snapshot()
    }

    /// Logs the holder's shape at debug level.
    pub(crate) fn dump(&self) {
        let inner = self.inner();
        tracing::debug!(
            holder = ?std::ptr::from_ref(self),
            state = ?inner.state,
            owners = inner.owners.len(),
            pending_tasks = inner.pending_tasks.len(),
            "holder dump"
        );
    }
}

impl Drop for PromiseHolder {
    fn drop(&mut self) {
        let Ok(inner) = self.inner.get_mut() else {
            return;
        };
        if inner.state == TaskState::Rejected {
            let stack = inner.trace.snapshot();
            let value = inner.value.clone();
            crate::uncaught::dispatch(stack, value);
        }
    }
}

/// Validates the ownership invariants of a holder in debug builds:
/// every live owner points back at it and every queued task is pending
/// and back-references it.
pub(crate) fn healthy_check(holder: &Arc<PromiseHolder>) {
    #[cfg(debug_assertions)]
    {
        let owners: Vec<Weak<SharedPromise>> = holder.inner().owners.clone();
        for owner in owners {
            if let Some(owner) = owner.upgrade() {
                assert!(
                    Arc::ptr_eq(&owner.holder(), holder),
                    "owner does not point back at its holder"
                );
            }
        }
        let tasks: Vec<Arc<Task>> = holder.inner().pending_tasks.iter().cloned().collect();
        for task in tasks {
            assert_eq!(
                task.state(),
                TaskState::Pending,
                "queued task is not pending"
            );
            assert!(
                task.belongs_to(holder),
                "queued task does not back-reference its holder"
            );
        }
    }
    #[cfg(not(debug_assertions))]
    {
        let _ = holder;
    }
}

/// The atomically retargetable handle-to-holder indirection.
pub(crate) struct SharedPromise {
    holder: ArcSwap<PromiseHolder>,
}

impl std::fmt::Debug for SharedPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedPromise({:p})", Arc::as_ptr(&self.holder()))
    }
}

impl SharedPromise {
    pub(crate) fn new(holder: Arc<PromiseHolder>) -> Arc<Self> {
        Arc::new(Self {
            holder: ArcSwap::from(holder),
        })
    }

    /// The current holder behind this indirection.
    pub(crate) fn holder(&self) -> Arc<PromiseHolder> {
        self.holder.load_full()
    }

    /// Retargets the indirection; callers hold the locking protocol.
    pub(crate) fn store(&self, holder: Arc<PromiseHolder>) {
        self.holder.store(holder);
    }
}

/// A held holder lock; releases one level on drop.
pub(crate) struct HeldLock {
    holder: Arc<PromiseHolder>,
}

impl HeldLock {
    pub(crate) fn holder(&self) -> &Arc<PromiseHolder> {
        &self.holder
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        self.holder.lock.unlock();
    }
}

/// Locks a holder reached directly (the engine already has it).
pub(crate) fn lock_holder(holder: &Arc<PromiseHolder>) -> HeldLock {
    holder.lock.lock();
    HeldLock {
        holder: Arc::clone(holder),
    }
}

/// Locks the holder behind a handle's indirection.
///
/// The pointer may be swapped by a join between reading it and acquiring
/// its lock, so acquisition retries until the locked holder is still the
/// one the indirection names. Terminates because joins change the
/// indirection finitely often.
pub(crate) fn obtain_lock(shared: &SharedPromise) -> HeldLock {
    loop {
        let holder = shared.holder();
        holder.lock.lock();
        if Arc::ptr_eq(&holder, &shared.holder()) {
            return HeldLock { holder };
        }
        holder.lock.unlock();
    }
}
