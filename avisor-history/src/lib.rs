//! # avisor-history
//!
//! Replay-history plugin for the Avisor event bus.
//!
//! The plugin records published events into a bounded per-event ring and
//! replays the most recent ones to late subscribers that ask for history:
//!
//! ```rust,ignore
//! let bus = AvisorCore::builder()
//!     .plugin(HistoryPlugin::new().max_length(5))
//!     .build()?;
//! bus.emit("sensor.temp", Payload::new(21.5));
//! // subscribed after the fact, still sees the last reading
//! bus.on_with("sensor.temp", handler, history(true));
//! ```
//!
//! Replayed dispatches bypass the on-emit phase and carry the
//! process-unique [`replay_tag`], so subscribers (and other capture-style
//! plugins) can tell them from live publishes. Wildcard subscriptions never
//! get a replay; the ring is keyed by the exact published event.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

use avisor_core::{
    ConfigError, EventId, HookContext, HookResult, Payload, Plugin, PluginHost, Token, Value,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock, Mutex};

/// Default option key read by the plugin.
pub const HISTORY_KEY: &str = "history";

/// The tag attached to every replayed dispatch.
///
/// Process-unique; a live publish can never carry it by accident.
pub fn replay_tag() -> Value {
    static TOKEN: LazyLock<Token> = LazyLock::new(|| Token::labeled("history-replay"));
    Value::Token(*TOKEN)
}

/// One recorded publish.
#[derive(Clone, Debug)]
pub struct HistoryRecord {
    /// The published event.
    pub event: EventId,
    /// The payload as the subscribers saw it (after on-emit rewriting).
    pub payload: Payload,
    /// Publish time in milliseconds since the Unix epoch.
    pub time: u64,
}

#[derive(Clone, Copy)]
enum Mode {
    DefaultAllow,
    DefaultDeny,
}

type Store = Arc<Mutex<HashMap<EventId, VecDeque<HistoryRecord>>>>;

/// The replay-history plugin.
///
/// Cloning shares the underlying ring store, so a clone kept next to the
/// bus can inspect what was recorded via [`HistoryPlugin::snapshot`].
#[derive(Clone)]
pub struct HistoryPlugin {
    key: String,
    max_length: usize,
    mode: Mode,
    exceptions: Vec<EventId>,
    store: Store,
}

impl HistoryPlugin {
    /// Create the plugin with the defaults: option key `history`, one
    /// recorded publish per event, every event recorded.
    pub fn new() -> Self {
        Self {
            key: HISTORY_KEY.to_owned(),
            max_length: 1,
            mode: Mode::DefaultAllow,
            exceptions: Vec::new(),
            store: Store::default(),
        }
    }

    /// Use a different option key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Record up to `n` publishes per event (default 1). Zero disables
    /// recording entirely.
    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = n;
        self
    }

    /// Record everything except the listed events. Entries may be wildcard
    /// patterns (`"debug.*"`).
    pub fn deny<E: Into<EventId>>(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.mode = Mode::DefaultAllow;
        self.exceptions = events.into_iter().map(Into::into).collect();
        self
    }

    /// Record only the listed events. Entries may be wildcard patterns.
    pub fn allow_only<E: Into<EventId>>(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.mode = Mode::DefaultDeny;
        self.exceptions = events.into_iter().map(Into::into).collect();
        self
    }

    /// The recorded publishes for `event`, oldest first.
    pub fn snapshot(&self, event: impl Into<EventId>) -> Vec<HistoryRecord> {
        self.store
            .lock()
            .unwrap()
            .get(&event.into())
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for HistoryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for HistoryPlugin {
    fn name(&self) -> &'static str {
        "history"
    }

    fn install(&self, host: &mut PluginHost) -> Result<(), ConfigError> {
        let store = self.store.clone();
        let max_length = self.max_length;
        let mode = self.mode;
        let exceptions = self.exceptions.clone();
        host.on_emit.all(move |ctx| {
            capture(&store, max_length, mode, &exceptions, &ctx);
            async { HookResult::next() }
        });

        let store = self.store.clone();
        let max_length = self.max_length;
        host.after_on.key(self.key.clone(), move |ctx| {
            replay(&store, max_length, &ctx);
            async { HookResult::next() }
        });
        Ok(())
    }
}

fn capture(store: &Store, max_length: usize, mode: Mode, exceptions: &[EventId], ctx: &HookContext) {
    if max_length == 0 || ctx.event.has_tag(&replay_tag()) {
        return;
    }
    let listed = if exceptions.is_empty() {
        false
    } else {
        let candidates = ctx.api.parse_event(&ctx.event.event);
        exceptions.iter().any(|e| candidates.contains(e))
    };
    let allowed = match mode {
        Mode::DefaultAllow => !listed,
        Mode::DefaultDeny => listed,
    };
    if !allowed {
        return;
    }
    let mut store = store.lock().unwrap();
    let records = store.entry(ctx.event.event.clone()).or_default();
    if records.len() == max_length {
        records.pop_front();
    }
    records.push_back(HistoryRecord {
        event: ctx.event.event.clone(),
        payload: ctx.payload.clone(),
        time: ctx.event.time,
    });
}

fn replay(store: &Store, max_length: usize, ctx: &HookContext) {
    let event = &ctx.event.event;
    // wildcard subscriptions never replay; the ring is keyed by exact events
    if event.has_wildcard() {
        return;
    }
    let Some(handler) = &ctx.event.handler else {
        return;
    };
    let wanted = match &ctx.option {
        Some(Value::Bool(true)) => max_length,
        Some(Value::Int(n)) if *n > 0 => *n as usize,
        _ => return,
    };
    let records: Vec<HistoryRecord> = store
        .lock()
        .unwrap()
        .get(event)
        .map(|records| records.iter().rev().take(wanted).cloned().collect())
        .unwrap_or_default();
    if records.is_empty() {
        return;
    }
    tracing::debug!(event = %event, replayed = records.len(), "replaying history");
    // newest first
    for record in records {
        ctx.api
            .raw_emit(record.event, record.payload, handler, vec![replay_tag()]);
    }
}
