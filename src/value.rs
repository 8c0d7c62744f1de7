//! Type-erased payload container.
//!
//! Settled values travel through a chain as [`Value`]: a cheaply clonable,
//! shared, immutable payload. Continuations extract a concrete type from it
//! and produce a new payload; extraction with the wrong type is a
//! well-defined failure ([`CastError`]) that the engine maps to the
//! pass-through / rejection policies of the chain.
//!
//! Conversion in and out goes through two open traits:
//!
//! - [`IntoValue`]: anything a user returns or settles with.
//! - [`FromValue`]: anything a continuation can receive as its argument.
//!
//! Both are implemented for the primitive types, `String`, `Vec<Value>`,
//! and `Value` itself; user payload types implement them in one line each.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Error produced when a payload is extracted with the wrong type.
///
/// Carries the type names involved so rejection traces stay readable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload type mismatch: expected {expected}, found {found}")]
pub struct CastError {
    /// The type the extraction asked for.
    pub expected: &'static str,
    /// The type the payload actually holds.
    pub found: &'static str,
}

/// A shared, type-erased payload.
///
/// `Value` is the currency of a chain: the settlement value of a holder,
/// the argument to every continuation, the result array of [`all`](crate::all).
/// Cloning is an `Arc` bump; the payload itself is immutable.
///
/// # Example
///
/// ```
/// use promitto::Value;
///
/// let v = Value::new(42_i32);
/// assert!(v.is::<i32>());
/// assert_eq!(v.get::<i32>().unwrap(), 42);
/// assert!(v.get::<String>().is_err());
/// ```
#[derive(Clone)]
pub struct Value {
    payload: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl Value {
    /// Wraps a concrete payload.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Some(Arc::new(payload)),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The empty payload, used for bare `resolve()`/`reject()` and
    /// pass-through defaults.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            payload: None,
            type_name: "<empty>",
        }
    }

    /// Returns true if this value holds no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// The `TypeId` of the payload, if any.
    #[must_use]
    pub fn type_id(&self) -> Option<TypeId> {
        self.payload.as_ref().map(|p| p.as_ref().type_id())
    }

    /// The type name captured at construction (`"<empty>"` when empty).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the payload is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.payload
            .as_ref()
            .is_some_and(|p| p.as_ref().is::<T>())
    }

    /// Borrows the payload as a `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    /// Extracts a clone of the payload as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CastError`] when the payload is empty or holds a
    /// different type; the payload itself is untouched.
    pub fn get<T: Any + Clone>(&self) -> Result<T, CastError> {
        self.downcast_ref::<T>().cloned().ok_or(CastError {
            expected: std::any::type_name::<T>(),
            found: self.type_name,
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_some() {
            write!(f, "Value({})", self.type_name)
        } else {
            f.write_str("Value(<empty>)")
        }
    }
}

/// Conversion of a concrete type into a [`Value`].
///
/// Implemented for the primitives, `String`, `&'static str` (stored as
/// `String`), `Vec<Value>`, `()` (the empty payload), and `Value` itself.
/// Implement it for your own payload types to settle with them directly:
///
/// ```
/// use promitto::{IntoValue, Value};
///
/// #[derive(Clone)]
/// struct Ticket(u64);
///
/// impl IntoValue for Ticket {
///     fn into_value(self) -> Value {
///         Value::new(self.0)
///     }
/// }
/// ```
pub trait IntoValue {
    /// Performs the conversion.
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::empty()
    }
}

// String payloads have one canonical extracted type.
impl IntoValue for &'static str {
    fn into_value(self) -> Value {
        Value::new(self.to_owned())
    }
}

/// Extraction of a concrete type out of a [`Value`].
///
/// The engine uses this to bind a continuation's argument; a failed
/// extraction is an ordinary type mismatch and triggers the pass-through
/// and rejection policies rather than a panic.
pub trait FromValue: Sized {
    /// Performs the extraction without consuming the payload.
    ///
    /// # Errors
    ///
    /// Returns [`CastError`] when the payload does not hold a `Self`.
    fn from_value(value: &Value) -> Result<Self, CastError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, CastError> {
        Ok(value.clone())
    }
}

// Rejection payloads produced by the engine itself bind directly.
impl FromValue for CastError {
    fn from_value(value: &Value) -> Result<Self, CastError> {
        value.get::<CastError>()
    }
}

macro_rules! impl_value_conversions {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::new(self)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, CastError> {
                    value.get::<$ty>()
                }
            }
        )*
    };
}

impl_value_conversions!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
    Vec<Value>,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_primitive() {
        let v = Value::new(7_u32);
        assert!(!v.is_empty());
        assert!(v.is::<u32>());
        assert_eq!(v.get::<u32>().unwrap(), 7);
    }

    #[test]
    fn mismatch_reports_both_type_names() {
        let v = Value::new(7_u32);
        let err = v.get::<String>().unwrap_err();
        assert_eq!(err.expected, std::any::type_name::<String>());
        assert_eq!(err.found, std::any::type_name::<u32>());
        // The payload survives a failed extraction.
        assert_eq!(v.get::<u32>().unwrap(), 7);
    }

    #[test]
    fn empty_value() {
        let v = Value::empty();
        assert!(v.is_empty());
        assert!(v.type_id().is_none());
        assert_eq!(v.type_name(), "<empty>");
        assert!(v.get::<u32>().is_err());
    }

    #[test]
    fn static_str_stored_as_string() {
        let v = "hello".into_value();
        assert!(v.is::<String>());
        assert_eq!(v.get::<String>().unwrap(), "hello");
    }

    #[test]
    fn clone_shares_payload() {
        let v = Value::new(String::from("shared"));
        let w = v.clone();
        assert_eq!(v.get::<String>().unwrap(), w.get::<String>().unwrap());
    }

    #[test]
    fn from_value_identity() {
        let v = Value::new(1_i64);
        let w = Value::from_value(&v).unwrap();
        assert!(w.is::<i64>());
    }
}
