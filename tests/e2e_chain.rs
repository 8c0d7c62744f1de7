//! End-to-end chain settlement suite.
//!
//! Exercises the engine's settlement propagation through public API only:
//! value chaining, rejection pass-through, flattening of returned
//! promises, the `finally`/`always` preservation laws, forwarding
//! overloads, and the bounded call trace.

use promitto::test_utils::{init_test_logging, pending_pair, watch};
use promitto::{
    call_stack, new_promise, new_promise_pending, resolve, CastError, TaskState, Value,
    DEFAULT_TRACE_CAPACITY,
};
use std::sync::{Arc, Mutex};

#[test]
fn chained_values_resolve_to_thirty() {
    init_test_logging();
    let chain = new_promise(|defer| defer.resolve(1_i32))
        .then(|x: i32| x + 2)
        .then(|x: i32| x * 10);
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<i32>().unwrap(), 30);
}

#[test]
fn rejection_passes_through_until_caught() {
    init_test_logging();
    let chain = new_promise(|defer| defer.reject("e"))
        .then(|x: i32| x + 1)
        .fail(|reason: String| format!("caught:{reason}"));
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<String>().unwrap(), "caught:e");
}

#[test]
fn returned_promise_flattens_into_forty_two() {
    init_test_logging();
    let chain = new_promise(|defer| defer.resolve(1_i32))
        .then(|x: i32| new_promise(move |defer| defer.resolve(x + 41)));
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<i32>().unwrap(), 42);
}

#[test]
fn flattening_works_for_deferred_inner_settlement() {
    init_test_logging();
    let (inner, inner_defer) = pending_pair();
    let chain = new_promise(|defer| defer.resolve(1_u32)).then(move |_: u32| inner.clone());
    let probe = watch(&chain);
    assert!(probe.outcome().is_none());
    inner_defer.resolve(9_u32);
    assert_eq!(probe.expect_resolved().get::<u32>().unwrap(), 9);
}

#[test]
fn then_identity_preserves_resolution() {
    init_test_logging();
    let chain = resolve(17_u64).then(|x: u64| x);
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<u64>().unwrap(), 17);
}

#[test]
fn finally_preserves_resolution_value_and_state() {
    init_test_logging();
    let ran = Arc::new(Mutex::new(0_u32));
    let tap = Arc::clone(&ran);
    let chain = resolve(7_u32).finally(move || {
        *tap.lock().unwrap() += 1;
    });
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<u32>().unwrap(), 7);
    assert_eq!(*ran.lock().unwrap(), 1);
}

#[test]
fn finally_preserves_rejection_value_and_state() {
    init_test_logging();
    let ran = Arc::new(Mutex::new(0_u32));
    let tap = Arc::clone(&ran);
    let chain = new_promise(|defer| defer.reject("bad")).finally(move || {
        *tap.lock().unwrap() += 1;
    });
    let probe = watch(&chain);
    assert_eq!(probe.expect_rejected().get::<String>().unwrap(), "bad");
    assert_eq!(*ran.lock().unwrap(), 1);
}

#[test]
fn finally_swallows_argument_mismatch() {
    init_test_logging();
    // The callable wants an i64 but the payload is a String; the
    // mismatch must not disturb the settlement.
    let chain = resolve("kept").finally(|_x: i64| ());
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<String>().unwrap(), "kept");
}

#[test]
fn finally_failure_rejects_the_chain() {
    init_test_logging();
    let chain = resolve(1_u32).finally(|| -> Result<(), String> { Err("interrupted".to_owned()) });
    let probe = watch(&chain);
    assert_eq!(
        probe.expect_rejected().get::<String>().unwrap(),
        "interrupted"
    );
}

#[test]
fn always_runs_on_both_settlements() {
    init_test_logging();
    let hits = Arc::new(Mutex::new(0_u32));

    let tap = Arc::clone(&hits);
    let resolved = resolve(1_u8).always(move |_: Value| {
        *tap.lock().unwrap() += 1;
    });
    let tap = Arc::clone(&hits);
    let rejected = new_promise(|defer| defer.reject("r")).always(move |_: Value| {
        *tap.lock().unwrap() += 1;
    });
    // `always` consumes either settlement like a plain continuation.
    let first = watch(&resolved);
    let second = watch(&rejected);
    assert_eq!(first.state(), Some(TaskState::Resolved));
    assert_eq!(second.state(), Some(TaskState::Resolved));
    assert_eq!(*hits.lock().unwrap(), 2);
}

#[test]
fn resolved_continuation_mismatch_rejects_with_cast_error() {
    init_test_logging();
    let chain = resolve("text").then(|x: i32| x);
    let probe = watch(&chain);
    let reason = probe.expect_rejected();
    let mismatch = reason.get::<CastError>().unwrap();
    assert_eq!(mismatch.expected, std::any::type_name::<i32>());
}

#[test]
fn rejected_continuation_mismatch_keeps_rejection() {
    init_test_logging();
    let chain = new_promise(|defer| defer.reject("why"))
        .fail(|_wrong: i32| ())
        .fail(|reason: String| reason);
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<String>().unwrap(), "why");
}

#[test]
fn then_defer_forwards_settlement() {
    init_test_logging();
    let (target, target_defer) = pending_pair();
    let target_probe = watch(&target);

    let source = new_promise(|defer| defer.resolve(5_u32));
    source.then_defer(target_defer);

    assert_eq!(target_probe.expect_resolved().get::<u32>().unwrap(), 5);
}

#[test]
fn then_defer_forwards_rejection() {
    init_test_logging();
    let (target, target_defer) = pending_pair();
    let target_probe = watch(&target);

    let source = new_promise(|defer| defer.reject("sour"));
    source.then_defer(target_defer);

    assert_eq!(
        target_probe.expect_rejected().get::<String>().unwrap(),
        "sour"
    );
}

#[test]
fn then_promise_forwards_into_pending_head() {
    init_test_logging();
    let target = new_promise_pending();
    let target_probe = watch(&target);

    let source = new_promise(|defer| defer.resolve(11_u32));
    source.then_promise(&target);

    assert_eq!(target_probe.expect_resolved().get::<u32>().unwrap(), 11);
}

#[test]
fn continuation_chained_after_then_promise_is_not_clobbered() {
    init_test_logging();
    // The target's finally hook fires re-entrantly while the forwarding
    // task runs; a continuation queued behind the forwarding task on the
    // same handle must see the chain's own settlement, not a spurious
    // rejection from the hook.
    let (target, _target_defer) = pending_pair();
    let (source, source_defer) = pending_pair();

    let ret = source.then_promise(&target);
    let probe = watch(&ret);

    source_defer.resolve(5_u32);

    assert_eq!(probe.state(), Some(TaskState::Resolved));
}

#[test]
fn continuation_chained_after_then_defer_is_not_clobbered() {
    init_test_logging();
    let (target, target_defer) = pending_pair();
    let target_probe = watch(&target);
    let (source, source_defer) = pending_pair();

    let ret = source.then_defer(target_defer);
    let probe = watch(&ret);

    source_defer.resolve(7_u32);

    assert_eq!(target_probe.expect_resolved().get::<u32>().unwrap(), 7);
    assert_eq!(probe.state(), Some(TaskState::Resolved));
}

#[test]
fn then_defer_settles_waiting_chain_when_target_settles_first() {
    init_test_logging();
    // The hook's intended direction: the target settles while the chain
    // is still waiting, so the chain is rejected instead of hanging. The
    // forwarder consumes that rejection, so the observer sees the chain
    // settle.
    let (target, target_defer) = pending_pair();
    let (source, _source_defer) = pending_pair();

    let ret = source.then_defer(target_defer);
    let probe = watch(&ret);
    assert!(probe.outcome().is_none());

    target.resolve(1_u32);

    assert_eq!(probe.state(), Some(TaskState::Resolved));
}

#[test]
fn nested_settlement_inside_continuation_buffers() {
    init_test_logging();
    // A continuation that settles another chain mid-flight must not
    // corrupt its own chain's FIFO processing.
    let (other, other_defer) = pending_pair();
    let other_probe = watch(&other);
    let chain = resolve(1_u32).then(move |x: u32| {
        other_defer.resolve(x + 100);
        x + 1
    });
    let probe = watch(&chain);
    assert_eq!(probe.expect_resolved().get::<u32>().unwrap(), 2);
    assert_eq!(other_probe.expect_resolved().get::<u32>().unwrap(), 101);
}

#[test]
fn call_stack_is_recorded_and_bounded() {
    init_test_logging();
    let seen_inside = Arc::new(Mutex::new(0_usize));
    let tap = Arc::clone(&seen_inside);
    let chain = new_promise(|defer| defer.resolve(0_i64)).then(move |x: i64| {
        *tap.lock().unwrap() = call_stack().len();
        x
    });
    for _ in 0..40 {
        chain.then(|x: i64| x);
    }
    // Inside a continuation the active holder's trace is visible.
    assert!(*seen_inside.lock().unwrap() > 0);
    // And the buffer stays bounded no matter how long the chain runs.
    assert!(chain.call_stack().len() <= DEFAULT_TRACE_CAPACITY);
    // Outside any continuation the free function sees nothing.
    assert!(call_stack().is_empty());
}
