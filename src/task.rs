//! Continuation task records.
//!
//! A [`Task`] is one `.then` entry: the optional resolved/rejected
//! callables, the registration site, a state, and a weak back-reference
//! to the holder it is queued on. The back-reference is rewritten when
//! holders are joined; the callables are cleared once the engine consumes
//! the task so captured handles are released promptly.

use crate::callback::Callback;
use crate::holder::PromiseHolder;
use crate::loc::Loc;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};

/// Settlement state, shared by tasks and holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    /// Not yet settled.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with a rejection reason.
    Rejected,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Debug)]
struct TaskInner {
    state: TaskState,
    holder: Weak<PromiseHolder>,
    loc: Loc,
    on_resolved: Option<Callback>,
    on_rejected: Option<Callback>,
}

/// One queued continuation.
#[derive(Debug)]
pub(crate) struct Task {
    inner: Mutex<TaskInner>,
}

impl Task {
    pub(crate) fn new(
        holder: &Arc<PromiseHolder>,
        loc: Loc,
        on_resolved: Option<Callback>,
        on_rejected: Option<Callback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TaskInner {
                state: TaskState::Pending,
                holder: Arc::downgrade(holder),
                loc,
                on_resolved,
                on_rejected,
            }),
        })
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, TaskInner> {
        self.inner.lock().expect("task lock poisoned")
    }

    pub(crate) fn state(&self) -> TaskState {
        self.inner().state
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.inner().state = state;
    }

    pub(crate) fn loc(&self) -> Loc {
        self.inner().loc
    }

    /// Upgrades the weak holder back-reference.
    pub(crate) fn holder(&self) -> Option<Arc<PromiseHolder>> {
        self.inner().holder.upgrade()
    }

    /// Rewrites the back-reference after a join.
    pub(crate) fn retarget(&self, holder: Weak<PromiseHolder>) {
        self.inner().holder = holder;
    }

    /// Returns true when the back-reference resolves to `holder`.
    pub(crate) fn belongs_to(&self, holder: &Arc<PromiseHolder>) -> bool {
        self.inner()
            .holder
            .upgrade()
            .is_some_and(|h| Arc::ptr_eq(&h, holder))
    }

    pub(crate) fn take_on_resolved(&self) -> Option<Callback> {
        self.inner().on_resolved.take()
    }

    pub(crate) fn take_on_rejected(&self) -> Option<Callback> {
        self.inner().on_rejected.take()
    }

    /// Drops both callables, releasing anything they captured.
    pub(crate) fn clear_callbacks(&self) {
        let mut inner = self.inner();
        inner.on_resolved = None;
        inner.on_rejected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::IntoCallback;

    #[test]
    fn new_task_is_pending() {
        let holder = PromiseHolder::new();
        let task = Task::new(&holder, Loc::here(), None, None);
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.belongs_to(&holder));
    }

    #[test]
    fn retarget_moves_back_reference() {
        let first = PromiseHolder::new();
        let second = PromiseHolder::new();
        let task = Task::new(&first, Loc::here(), None, None);
        task.retarget(Arc::downgrade(&second));
        assert!(!task.belongs_to(&first));
        assert!(task.belongs_to(&second));
    }

    #[test]
    fn clear_callbacks_releases_slots() {
        let holder = PromiseHolder::new();
        let cb = (|x: i32| x).into_callback();
        let task = Task::new(&holder, Loc::here(), Some(cb.clone()), Some(cb));
        task.clear_callbacks();
        assert!(task.take_on_resolved().is_none());
        assert!(task.take_on_rejected().is_none());
    }

    #[test]
    fn expired_holder_yields_none() {
        let task = {
            let holder = PromiseHolder::new();
            Task::new(&holder, Loc::here(), None, None)
        };
        assert!(task.holder().is_none());
    }
}
