//! The `race` family.
//!
//! `race` settles like the first input to settle and records the winner
//! index once. The `race_and_*` variants then settle every loser, relying
//! on settlement of an already-settled chain being a no-op.

use crate::callback::IntoCallback;
use crate::loc::Loc;
use crate::promise::{new_promise_at, Promise};
use crate::task::TaskState;
use crate::value::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sentinel for "no winner recorded yet".
const NO_WINNER: usize = usize::MAX;

/// Settles with the first input to settle, adopting its state and value.
#[track_caller]
#[must_use]
pub fn race<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::here();
    let list: Vec<Promise> = promises.into_iter().collect();
    let winner = Arc::new(AtomicUsize::new(NO_WINNER));
    race_at(loc, &list, &winner)
}

/// Races, then rejects every loser once the race has settled.
#[track_caller]
#[must_use]
pub fn race_and_reject<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::here();
    let list: Vec<Promise> = promises.into_iter().collect();
    let winner = Arc::new(AtomicUsize::new(NO_WINNER));
    let settled = race_at(loc, &list, &winner);
    settled.finally(move || {
        settle_losers(loc, &list, &winner, TaskState::Rejected);
    })
}

/// Races, then resolves every loser once the race has settled. Losers
/// that already settled are untouched.
#[track_caller]
#[must_use]
pub fn race_and_resolve<I>(promises: I) -> Promise
where
    I: IntoIterator<Item = Promise>,
{
    let loc = Loc::here();
    let list: Vec<Promise> = promises.into_iter().collect();
    let winner = Arc::new(AtomicUsize::new(NO_WINNER));
    let settled = race_at(loc, &list, &winner);
    settled.finally(move || {
        settle_losers(loc, &list, &winner, TaskState::Resolved);
    })
}

fn race_at(loc: Loc, list: &[Promise], winner: &Arc<AtomicUsize>) -> Promise {
    let entries: Vec<Promise> = list.to_vec();
    let winner = Arc::clone(winner);
    new_promise_at(loc, move |defer| {
        for (index, promise) in entries.iter().enumerate() {
            let on_resolved = defer.clone();
            let on_rejected = defer.clone();
            let mark = Arc::clone(&winner);
            let mark_rejected = Arc::clone(&winner);
            promise.attach(
                loc,
                Some(
                    (move |value: Value| {
                        let _ = mark.compare_exchange(
                            NO_WINNER,
                            index,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                        on_resolved.settle(loc, TaskState::Resolved, value.clone());
                        // The input chain keeps its own value.
                        value
                    })
                    .into_callback(),
                ),
                Some(
                    (move |reason: Value| {
                        let _ = mark_rejected.compare_exchange(
                            NO_WINNER,
                            index,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                        on_rejected.settle(loc, TaskState::Rejected, reason.clone());
                        reason
                    })
                    .into_callback(),
                ),
            );
        }
    })
}

fn settle_losers(loc: Loc, list: &[Promise], winner: &Arc<AtomicUsize>, state: TaskState) {
    let won = winner.load(Ordering::Acquire);
    for (index, promise) in list.iter().enumerate() {
        if index != won {
            promise.settle_head(loc, state, Value::empty());
        }
    }
}
