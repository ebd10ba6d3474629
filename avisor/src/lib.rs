//! # avisor
//!
//! Batteries-included surface of the Avisor event bus: the core engine
//! pre-configured with the count and history plugins, plus the convenience
//! subscription helpers built on them.
//!
//! ```rust,ignore
//! use avisor::prelude::*;
//!
//! let bus = Avisor::new()?;
//! bus.once("user.login", Handler::new(|payload, _info| async move {
//!     // delivered at most once
//!     Ok(())
//! }));
//! bus.emit("user.login", Payload::new(session));
//! ```
//!
//! Applications that only need the engine, or that assemble their own
//! plugin set, can depend on `avisor-core` directly.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub use avisor_core::{
    AllHookRegistry, AvisorBuilder, AvisorCore, AvisorError, BoxError, ConfigError, EventId,
    EventInfo, EventStrParser, FilterContext, FilterRegistry, Handler, HookApi, HookContext,
    HookRegistry, HookResult, Options, ParsedEvent, Payload, Plugin, PluginHost, Storage, Token,
    UncaughtError, Value, WILDCARD, expand, testing, uncaught_error_event,
};
pub use avisor_count::{COUNT_KEY, CountPlugin};
pub use avisor_history::{HISTORY_KEY, HistoryPlugin, HistoryRecord, replay_tag};

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::Avisor;
    pub use avisor_core::{
        AvisorCore, EventId, EventInfo, Handler, HookResult, Options, Payload, Plugin, Token,
        Value, uncaught_error_event,
    };
    pub use avisor_count::CountPlugin;
    pub use avisor_history::HistoryPlugin;
}

/// The event bus with the standard plugin set installed.
///
/// Wraps [`AvisorCore`] built with [`CountPlugin`] and [`HistoryPlugin`];
/// everything the core offers is available through [`Avisor::core`] or the
/// delegating methods, and the plugin option keys gain first-class helpers:
/// [`Avisor::once`], [`Avisor::many`], [`Avisor::history`].
pub struct Avisor {
    core: AvisorCore,
}

impl Avisor {
    /// Build with default separators and plugin configuration. Must be
    /// called within a tokio runtime.
    pub fn new() -> Result<Self, AvisorError> {
        Self::with_history(HistoryPlugin::new())
    }

    /// Build with a configured history plugin (ring size, allow/deny list).
    pub fn with_history(history: HistoryPlugin) -> Result<Self, AvisorError> {
        let core = AvisorCore::builder()
            .plugin(CountPlugin::new())
            .plugin(history)
            .build()?;
        Ok(Self { core })
    }

    /// The underlying engine.
    pub fn core(&self) -> &AvisorCore {
        &self.core
    }

    /// Subscribe a handler to an event.
    pub fn on(&self, event: impl Into<EventId>, handler: Handler) -> &Self {
        self.core.on(event, handler);
        self
    }

    /// Subscribe with explicit options.
    pub fn on_with(&self, event: impl Into<EventId>, handler: Handler, options: Options) -> &Self {
        self.core.on_with(event, handler, options);
        self
    }

    /// Subscribe for exactly one delivery.
    pub fn once(&self, event: impl Into<EventId>, handler: Handler) -> &Self {
        self.many(event, 1, handler)
    }

    /// Subscribe for at most `n` deliveries.
    pub fn many(&self, event: impl Into<EventId>, n: i64, handler: Handler) -> &Self {
        self.on_with(
            event,
            handler,
            Options::from([(COUNT_KEY.to_owned(), Value::Int(n))]),
        )
    }

    /// Subscribe and replay up to `n` of the most recent publishes of the
    /// event, newest first.
    pub fn history(&self, event: impl Into<EventId>, n: i64, handler: Handler) -> &Self {
        self.on_with(
            event,
            handler,
            Options::from([(HISTORY_KEY.to_owned(), Value::Int(n))]),
        )
    }

    /// Subscribe for exactly one delivery, replayed from history if the
    /// event was already published.
    pub fn history_once(&self, event: impl Into<EventId>, handler: Handler) -> &Self {
        self.on_with(
            event,
            handler,
            Options::from([
                (HISTORY_KEY.to_owned(), Value::Int(1)),
                (COUNT_KEY.to_owned(), Value::Int(1)),
            ]),
        )
    }

    /// Unsubscribe one handler from one event.
    pub fn off(&self, event: impl Into<EventId>, handler: &Handler) -> &Self {
        self.core.off(event, handler);
        self
    }

    /// Unsubscribe a handler from every event it is subscribed to.
    pub fn off_handler(&self, handler: &Handler) -> &Self {
        self.core.off_handler(handler);
        self
    }

    /// Unsubscribe every handler of one event.
    pub fn off_event(&self, event: impl Into<EventId>) -> &Self {
        self.core.off_event(event);
        self
    }

    /// Unsubscribe everything.
    pub fn off_all(&self) -> &Self {
        self.core.off_all();
        self
    }

    /// Publish an event.
    pub fn emit(&self, event: impl Into<EventId>, payload: Payload) -> &Self {
        self.core.emit(event, payload);
        self
    }

    /// Publish an event with initial tags.
    pub fn emit_tagged(
        &self,
        event: impl Into<EventId>,
        payload: Payload,
        tags: Vec<Value>,
    ) -> &Self {
        self.core.emit_tagged(event, payload, tags);
        self
    }

    /// Wait until all queued operations and in-flight dispatches finished.
    pub async fn settled(&self) {
        self.core.settled().await;
    }
}
