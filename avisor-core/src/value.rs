//! Dynamic values, payloads and the uncaught-error payload.
//!
//! Subscription options and publish tags are [`Value`]s: a small dynamic
//! enum with value equality, so tags can be removed by value match and
//! option bags stay an open, string-keyed map. Payloads are opaque
//! [`Payload`]s instead, cheap to clone and downcast on the receiving side.

use crate::error::BoxError;
use crate::event::Token;
use crate::handler::EventInfo;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A dynamic option or tag value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// An opaque token, compared by identity.
    Token(Token),
}

impl Value {
    /// The integer content, if this is an [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The boolean content, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string content, if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Token> for Value {
    fn from(v: Token) -> Self {
        Value::Token(v)
    }
}

/// A subscription's option bag: derived from event-string parsing and the
/// caller's explicit options, caller values winning on key collision.
pub type Options = HashMap<String, Value>;

/// An opaque publish payload.
///
/// Payloads are reference counted so a single publish can fan out to many
/// subscribers without copying. Receivers recover the concrete type with
/// [`Payload::downcast_ref`].
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    /// Wrap a value as a payload.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// The empty payload, used when an event carries no data.
    pub fn none() -> Self {
        Self(Arc::new(()))
    }

    /// Whether this is the empty payload.
    pub fn is_none(&self) -> bool {
        self.is::<()>()
    }

    /// Whether the payload holds a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Borrow the payload as a `T`, if it holds one.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("Payload(none)")
        } else {
            f.write_str("Payload(..)")
        }
    }
}

/// Payload of the reserved uncaught-error event.
///
/// Published once per failing handler invocation; carries the error, the
/// invocation record that was being dispatched and the payload in flight.
#[derive(Clone, Debug)]
pub struct UncaughtError {
    /// The error the handler returned.
    pub error: Arc<BoxError>,
    /// The invocation record of the failed dispatch.
    pub event: EventInfo,
    /// The payload the handler received.
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_downcast() {
        let payload = Payload::new(42u32);
        assert!(payload.is::<u32>());
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
        assert_eq!(payload.downcast_ref::<String>(), None);
    }

    #[test]
    fn test_payload_none() {
        assert!(Payload::none().is_none());
        assert!(!Payload::new("data").is_none());
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::from("a"), Value::from(String::from("a")));
        assert_eq!(Value::from(1i64), Value::Int(1));
        assert_ne!(Value::from(Token::new()), Value::from(Token::new()));
        let token = Token::new();
        assert_eq!(Value::from(token), Value::from(token));
    }
}
