//! Event identifiers and wildcard expansion.
//!
//! An event is addressed either by a namespaced textual name (`"car.door.open"`)
//! or by an opaque [`Token`]. Textual names with identical segment sequences are
//! equal; tokens are only ever equal to themselves, even if their labels match.

use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// The reserved wildcard segment.
pub const WILDCARD: &str = "*";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A process-unique opaque event token.
///
/// Tokens are compared by identity, never by label: two tokens created with
/// the same label are distinct events.
///
/// # Example
///
/// ```rust,ignore
/// let shutdown = Token::labeled("shutdown");
/// bus.on(shutdown, handler);
/// bus.emit(shutdown, Payload::none());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    id: u64,
    label: Option<&'static str>,
}

impl Token {
    /// Create a fresh anonymous token.
    pub fn new() -> Self {
        Self {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            label: None,
        }
    }

    /// Create a fresh token carrying a debug label.
    pub fn labeled(label: &'static str) -> Self {
        Self {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            label: Some(label),
        }
    }

    /// The token's debug label, if any.
    pub fn label(&self) -> Option<&'static str> {
        self.label
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label {
            Some(label) => write!(f, "Token({label}#{})", self.id),
            None => write!(f, "Token(#{})", self.id),
        }
    }
}

/// Identifier of a notification channel.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum EventId {
    /// A textual, namespace-segmented event name.
    Name(String),
    /// An opaque unique token.
    Token(Token),
}

impl EventId {
    /// The textual name, when this is a [`EventId::Name`].
    pub fn as_name(&self) -> Option<&str> {
        match self {
            EventId::Name(name) => Some(name),
            EventId::Token(_) => None,
        }
    }

    /// Whether a textual name contains the wildcard segment anywhere.
    pub fn has_wildcard(&self) -> bool {
        self.as_name().is_some_and(|n| n.contains(WILDCARD))
    }
}

impl From<&str> for EventId {
    fn from(name: &str) -> Self {
        EventId::Name(name.to_owned())
    }
}

impl From<String> for EventId {
    fn from(name: String) -> Self {
        EventId::Name(name)
    }
}

impl From<Token> for EventId {
    fn from(token: Token) -> Self {
        EventId::Token(token)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Name(name) => f.write_str(name),
            EventId::Token(token) => write!(f, "{token:?}"),
        }
    }
}

/// The reserved process-wide event published when a subscriber's handler
/// fails. Its payload is an [`UncaughtError`](crate::UncaughtError).
///
/// If nothing subscribes to this event, handler failures are logged and
/// dropped; that is documented behavior, not a bug.
pub fn uncaught_error_event() -> EventId {
    static TOKEN: LazyLock<Token> = LazyLock::new(|| Token::labeled("uncaught-error"));
    EventId::Token(*TOKEN)
}

/// Compute the candidate event keys that may hold subscribers for an
/// emitted event.
///
/// For a textual event `a.b.c` the set is: the exact event, `a.b.c.*`,
/// every variant with one segment replaced by `*` (`a.*.c`, …) and every
/// truncation suffixed with `*` (`a.b.*`, `a.*`, `*`). Deduplicated,
/// most-specific first. A token event only matches itself and the bare
/// wildcard.
pub fn expand(event: &EventId, separator: char) -> Vec<EventId> {
    let name = match event {
        EventId::Token(token) => {
            return vec![EventId::Token(*token), EventId::Name(WILDCARD.to_owned())];
        }
        EventId::Name(name) => name,
    };
    let sep = separator.to_string();
    let segments: Vec<&str> = name.split(separator).collect();
    let mut candidates = Vec::with_capacity(2 + segments.len() * 2);
    candidates.push(name.clone());
    candidates.push(format!("{name}{sep}{WILDCARD}"));
    // one segment replaced by the wildcard, deepest first
    for i in (0..segments.len()).rev() {
        let mut replaced = segments.clone();
        replaced[i] = WILDCARD;
        candidates.push(replaced.join(&sep));
    }
    // truncated at a segment and suffixed with the wildcard, deepest first;
    // i == 0 yields the bare wildcard
    for i in (0..segments.len()).rev() {
        let mut truncated: Vec<&str> = segments[..i].to_vec();
        truncated.push(WILDCARD);
        candidates.push(truncated.join(&sep));
    }
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .map(EventId::Name)
        .collect()
}
