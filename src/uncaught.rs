//! Process-wide uncaught-rejection sink.
//!
//! A holder dying with a rejected settlement and no continuation left to
//! consume it dispatches here: its trace is dumped and the installed
//! handler receives a fresh rejected handle carrying the payload. The
//! default handler prints a description to stderr.
//!
//! Dispatch happens inside holder destructors, so a thread-local flag
//! suppresses recursion when the handler itself leaves a rejected holder
//! behind.

use crate::callback::PanicPayload;
use crate::trace::CallStack;
use crate::value::{CastError, Value};
use crate::Promise;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

type Handler = Box<dyn FnMut(Promise) + Send>;

static HANDLER: Mutex<Option<Handler>> = Mutex::new(None);

thread_local! {
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// Installs the process-wide uncaught-rejection handler, replacing any
/// previous one. The handler receives a rejected handle carrying the
/// dropped payload; attach a `fail` to consume it.
pub fn handle_uncaught_exception(handler: impl FnMut(Promise) + Send + 'static) {
    *HANDLER.lock().expect("uncaught handler lock poisoned") = Some(Box::new(handler));
}

/// Dispatches a dropped rejection to the installed handler.
pub(crate) fn dispatch(stack: CallStack, value: Value) {
    if IN_SINK.with(Cell::get) {
        return;
    }
    IN_SINK.with(|flag| flag.set(true));
    struct Reset;
    impl Drop for Reset {
        fn drop(&mut self) {
            IN_SINK.with(|flag| flag.set(false));
        }
    }
    let _reset = Reset;

    tracing::error!(payload = value.type_name(), "uncaught promise rejection");
    stack.dump();

    let rejected = crate::promise::reject(value);
    let taken = HANDLER.lock().expect("uncaught handler lock poisoned").take();
    match taken {
        Some(mut handler) => {
            match catch_unwind(AssertUnwindSafe(move || {
                handler(rejected);
                handler
            })) {
                Ok(handler) => {
                    // Put it back unless a replacement was installed
                    // while it ran.
                    let mut slot = HANDLER.lock().expect("uncaught handler lock poisoned");
                    if slot.is_none() {
                        *slot = Some(handler);
                    }
                }
                Err(_) => tracing::error!("uncaught-rejection handler panicked"),
            }
        }
        None => default_handler(&rejected),
    }
}

fn default_handler(rejected: &Promise) {
    rejected.fail(|reason: Value| {
        eprintln!("uncaught promise rejection: {}", describe(&reason));
    });
}

/// Best-effort human-readable payload description.
pub(crate) fn describe(value: &Value) -> String {
    if value.is_empty() {
        return "<empty>".to_owned();
    }
    if let Some(text) = value.downcast_ref::<String>() {
        return text.clone();
    }
    if let Some(text) = value.downcast_ref::<&'static str>() {
        return (*text).to_owned();
    }
    if let Some(panic) = value.downcast_ref::<PanicPayload>() {
        return panic.to_string();
    }
    if let Some(mismatch) = value.downcast_ref::<CastError>() {
        return mismatch.to_string();
    }
    value.type_name().to_owned()
}
