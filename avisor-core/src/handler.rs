//! Subscriber handlers and the per-dispatch invocation record.

use crate::error::BoxError;
use crate::event::EventId;
use crate::value::{Payload, Value};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

type HandlerFn = dyn Fn(Payload, EventInfo) -> BoxFuture<'static, Result<(), BoxError>>
    + Send
    + Sync
    + 'static;

/// An event handler bound to subscriptions.
///
/// Handlers are compared by identity: the registry keys subscriptions on the
/// handler, so re-registering the *same* `Handler` (a clone of it) under the
/// same event replaces that subscription's options instead of adding a
/// duplicate entry. Two handlers built from identical closures are distinct.
///
/// A handler returning an error never fails the publish; the error is routed
/// to the reserved [`uncaught_error_event`](crate::uncaught_error_event).
///
/// # Example
///
/// ```rust,ignore
/// let handler = Handler::new(|payload, info| async move {
///     println!("{} fired", info.event);
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    /// Wrap an async callback as a handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Payload, EventInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self(Arc::new(move |payload, info| Box::pin(f(payload, info))))
    }

    /// Invoke the handler.
    pub fn invoke(
        &self,
        payload: Payload,
        info: EventInfo,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        (self.0)(payload, info)
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handler {}

impl Hash for Handler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

/// The invocation record handed to hooks and handlers (`$event` in hook
/// terms).
///
/// One record exists per dispatch; the tag sequence on it is mutated by the
/// hook pipeline before the handler observes it.
#[derive(Clone, Debug)]
pub struct EventInfo {
    /// The event being dispatched.
    pub event: EventId,
    /// The subscriber being dispatched to. `None` during the on-emit phase,
    /// which runs once per publish before subscribers are resolved.
    pub handler: Option<Handler>,
    /// Process-wide monotonically increasing dispatch id. Never reset.
    pub id: u64,
    /// Wall-clock publish time in milliseconds since the Unix epoch.
    pub time: u64,
    /// Ordered tag sequence travelling with this publish. Duplicates
    /// allowed, order meaningful.
    pub tags: Vec<Value>,
}

impl EventInfo {
    /// Whether a tag equal to `tag` is present.
    pub fn has_tag(&self, tag: &Value) -> bool {
        self.tags.contains(tag)
    }
}
