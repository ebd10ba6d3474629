//! Testing utilities for Avisor.
//!
//! - [`RecordingHandler`]: records every payload and invocation record it
//!   receives
//! - [`CountingHandler`]: counts invocations
//! - [`FailingHandler`]: always fails, for exercising the uncaught-error
//!   path
//!
//! Each utility owns a single [`Handler`] identity: every call to
//! `handler()` returns a clone of the same handler, so unsubscription and
//! re-subscription address the same registry slot.

use crate::handler::{EventInfo, Handler};
use crate::value::Payload;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

/// A handler that records all invocations it receives.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = RecordingHandler::new();
/// bus.on("order.*", recorder.handler());
/// bus.emit("order.created", Payload::new(1u32));
/// bus.settled().await;
/// assert_eq!(recorder.count(), 1);
/// ```
#[derive(Clone)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<(Payload, EventInfo)>>>,
    handler: Handler,
}

impl RecordingHandler {
    /// Create a new recording handler.
    pub fn new() -> Self {
        let calls: Arc<Mutex<Vec<(Payload, EventInfo)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let handler = Handler::new(move |payload, info| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push((payload, info));
                Ok(())
            }
        });
        Self { calls, handler }
    }

    /// The handler to subscribe.
    pub fn handler(&self) -> Handler {
        self.handler.clone()
    }

    /// Number of recorded invocations.
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Clones of the recorded `(payload, info)` pairs.
    pub fn calls(&self) -> Vec<(Payload, EventInfo)> {
        self.calls.lock().unwrap().clone()
    }

    /// The recorded invocation records.
    pub fn infos(&self) -> Vec<EventInfo> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, info)| info.clone())
            .collect()
    }

    /// The recorded payloads.
    pub fn payloads(&self) -> Vec<Payload> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(payload, _)| payload.clone())
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// A handler that counts invocations.
#[derive(Clone)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
    handler: Handler,
}

impl CountingHandler {
    /// Create a new counting handler.
    pub fn new() -> Self {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let handler = Handler::new(move |_payload, _info| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        Self { count, handler }
    }

    /// The handler to subscribe.
    pub fn handler(&self) -> Handler {
        self.handler.clone()
    }

    /// The current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// A handler that always fails with the given message.
#[derive(Clone)]
pub struct FailingHandler {
    handler: Handler,
}

impl FailingHandler {
    /// Create a handler failing with `message`.
    pub fn new(message: &'static str) -> Self {
        let handler = Handler::new(move |_payload, _info| async move { Err(message.into()) });
        Self { handler }
    }

    /// The handler to subscribe.
    pub fn handler(&self) -> Handler {
        self.handler.clone()
    }
}
