//! The `all` combinator.

use crate::callback::IntoCallback;
use crate::loc::Loc;
use crate::promise::{new_promise_at, Promise};
use crate::task::TaskState;
use crate::value::{IntoValue, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Resolves with a `Vec<Value>` of every input's result once all inputs
/// have resolved, preserving input order regardless of settlement order.
/// Rejects with the first rejection seen. An empty input resolves
/// immediately with an empty `Vec<Value>`.
#[track_caller]
#[must_use]
pub fn all<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::here();
    let list: Vec<Promise> = promises.into_iter().collect();
    if list.is_empty() {
        let empty = Vec::<Value>::new().into_value();
        return new_promise_at(loc, move |defer| {
            defer.settle(loc, TaskState::Resolved, empty);
        });
    }

    let total = list.len();
    let finished = Arc::new(AtomicUsize::new(0));
    let results: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(vec![Value::empty(); total]));

    new_promise_at(loc, move |defer| {
        for (index, promise) in list.iter().enumerate() {
            let finished = Arc::clone(&finished);
            let results = Arc::clone(&results);
            let on_resolved = defer.clone();
            let on_rejected = defer.clone();
            promise.attach(
                loc,
                Some(
                    (move |value: Value| {
                        {
                            let mut slots =
                                results.lock().expect("all results lock poisoned");
                            slots[index] = value;
                        }
                        if finished.fetch_add(1, Ordering::AcqRel) + 1 == total {
                            let collected =
                                std::mem::take(&mut *results.lock().expect("all results lock poisoned"));
                            on_resolved.settle(loc, TaskState::Resolved, collected.into_value());
                        }
                    })
                    .into_callback(),
                ),
                Some(
                    (move |reason: Value| {
                        on_rejected.settle(loc, TaskState::Rejected, reason);
                    })
                    .into_callback(),
                ),
            );
        }
    })
}
