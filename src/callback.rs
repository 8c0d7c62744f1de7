//! Callable wrapper for continuations.
//!
//! A [`Callback`] adapts a typed user closure to the engine: the engine
//! hands it the holder's current [`Value`] and receives back either a
//! settlement instruction ([`Resolution`]) or a type mismatch, which the
//! engine maps to the chain's pass-through policies.
//!
//! Two adaptation shapes are accepted, selected by [`IntoCallback`]:
//!
//! - `FnMut(A) -> R` where `A: FromValue` — the argument is extracted
//!   from the payload; a failed extraction is a mismatch, not a panic.
//! - `FnMut() -> R` — a nullary callable accepts any payload.
//!
//! Return values convert through [`IntoResolution`]: plain values fulfil,
//! a returned [`Promise`] chains (the engine joins holders), and a
//! `Result::Err` breaks the chain with a rejection.

use crate::value::{CastError, FromValue, IntoValue, Value};
use crate::Promise;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// What a continuation asks the engine to do with its holder.
#[derive(Debug)]
pub enum Resolution {
    /// Settle resolved with this payload.
    Fulfil(Value),
    /// Adopt this promise's holder: the chain continues on it.
    Chain(Promise),
    /// Settle rejected with this payload.
    Break(Value),
}

/// Conversion of a continuation's return value into a [`Resolution`].
///
/// Implemented for everything [`IntoValue`] covers (fulfil), for
/// [`Promise`] (chain), and for `Result<T, E>` (fulfil or break).
/// User payload types get it by fulfilling through their own
/// [`IntoValue`] conversion and returning [`Value`].
pub trait IntoResolution {
    /// Performs the conversion.
    fn into_resolution(self) -> Resolution;
}

macro_rules! impl_into_resolution_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoResolution for $ty {
                fn into_resolution(self) -> Resolution {
                    Resolution::Fulfil(self.into_value())
                }
            }
        )*
    };
}

impl_into_resolution_by_value!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Value,
    Vec<Value>,
);

impl IntoResolution for Promise {
    fn into_resolution(self) -> Resolution {
        Resolution::Chain(self)
    }
}

impl<T, E> IntoResolution for Result<T, E>
where
    T: IntoResolution,
    E: std::any::Any + Send + Sync,
{
    fn into_resolution(self) -> Resolution {
        match self {
            Ok(value) => value.into_resolution(),
            Err(reason) => Resolution::Break(Value::new(reason)),
        }
    }
}

/// The engine-facing result of invoking a [`Callback`].
#[derive(Debug)]
pub(crate) enum CallbackOutcome {
    /// The callable ran; settle accordingly.
    Settle(Resolution),
    /// The payload did not match the callable's argument type.
    Mismatch(CastError),
}

/// A type-erased, shareable continuation callable.
///
/// Cloning shares the underlying closure; `always` and `finally` rely on
/// this to install one callable in both task slots.
#[derive(Clone)]
pub struct Callback {
    f: Arc<Mutex<dyn FnMut(Value) -> CallbackOutcome + Send>>,
}

impl Callback {
    fn from_raw(f: impl FnMut(Value) -> CallbackOutcome + Send + 'static) -> Self {
        Self {
            f: Arc::new(Mutex::new(f)),
        }
    }

    /// Invokes the callable with a clone of the holder's payload.
    pub(crate) fn invoke(&self, value: Value) -> CallbackOutcome {
        let mut f = self.f.lock().expect("callback lock poisoned");
        (f)(value)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback { .. }")
    }
}

/// Conversion of a user closure into a [`Callback`].
///
/// The `Marker` parameter disambiguates the accepted closure shapes; it is
/// inferred and never written by callers.
pub trait IntoCallback<Marker> {
    /// Performs the conversion.
    fn into_callback(self) -> Callback;
}

impl<F, A, R> IntoCallback<fn(A) -> R> for F
where
    F: FnMut(A) -> R + Send + 'static,
    A: FromValue,
    R: IntoResolution,
{
    fn into_callback(mut self) -> Callback {
        Callback::from_raw(move |value: Value| match A::from_value(&value) {
            Ok(arg) => CallbackOutcome::Settle(self(arg).into_resolution()),
            Err(err) => CallbackOutcome::Mismatch(err),
        })
    }
}

impl<F, R> IntoCallback<fn() -> R> for F
where
    F: FnMut() -> R + Send + 'static,
    R: IntoResolution,
{
    fn into_callback(mut self) -> Callback {
        Callback::from_raw(move |_value: Value| CallbackOutcome::Settle(self().into_resolution()))
    }
}

/// Marker-carrying wrapper so `Callback` itself satisfies [`IntoCallback`].
pub struct CallbackMarker(PhantomData<()>);

impl IntoCallback<CallbackMarker> for Callback {
    fn into_callback(self) -> Callback {
        self
    }
}

/// Payload captured from a panicking continuation or promise body.
///
/// Panics are transported as rejection values; the message is extracted
/// from the usual `&str` / `String` panic payloads.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Extracts a payload from the boxed value `catch_unwind` returns.
    pub(crate) fn from_box(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic of unknown type".to_owned()
        };
        Self { message }
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

impl FromValue for PanicPayload {
    fn from_value(value: &Value) -> Result<Self, CastError> {
        value.get::<PanicPayload>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle_value(outcome: CallbackOutcome) -> Value {
        match outcome {
            CallbackOutcome::Settle(Resolution::Fulfil(v)) => v,
            other => panic!("expected fulfil, got {other:?}"),
        }
    }

    #[test]
    fn typed_callback_extracts_argument() {
        let cb = (|x: i32| x + 2).into_callback();
        let out = settle_value(cb.invoke(Value::new(40_i32)));
        assert_eq!(out.get::<i32>().unwrap(), 42);
    }

    #[test]
    fn typed_callback_reports_mismatch() {
        let cb = (|x: i32| x + 2).into_callback();
        match cb.invoke(Value::new(String::from("nope"))) {
            CallbackOutcome::Mismatch(err) => {
                assert_eq!(err.expected, std::any::type_name::<i32>());
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn nullary_callback_accepts_any_payload() {
        let cb = (|| 5_u8).into_callback();
        let out = settle_value(cb.invoke(Value::new(String::from("ignored"))));
        assert_eq!(out.get::<u8>().unwrap(), 5);
    }

    #[test]
    fn result_err_breaks() {
        let cb = (|_: Value| -> Result<(), String> { Err("boom".to_owned()) }).into_callback();
        match cb.invoke(Value::empty()) {
            CallbackOutcome::Settle(Resolution::Break(reason)) => {
                assert_eq!(reason.get::<String>().unwrap(), "boom");
            }
            other => panic!("expected break, got {other:?}"),
        }
    }

    #[test]
    fn shared_callback_runs_from_both_clones() {
        let cb = (|x: u32| x * 2).into_callback();
        let cb2 = cb.clone();
        assert_eq!(
            settle_value(cb.invoke(Value::new(2_u32)))
                .get::<u32>()
                .unwrap(),
            4
        );
        assert_eq!(
            settle_value(cb2.invoke(Value::new(3_u32)))
                .get::<u32>()
                .unwrap(),
            6
        );
    }

    #[test]
    fn panic_payload_from_str() {
        let p = PanicPayload::from_box(Box::new("bang"));
        assert_eq!(p.message(), "bang");
        assert_eq!(p.to_string(), "panic: bang");
    }
}
