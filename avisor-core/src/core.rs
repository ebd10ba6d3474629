//! The event router / core engine.
//!
//! [`AvisorCore`] holds the subscription registry and orchestrates the hook
//! phases around subscribe, unsubscribe and publish. All state lives behind
//! a single worker task; public operations enqueue commands in call order,
//! so a chain like `bus.on(..).emit(..).off(..)` resolves deterministically
//! even though handler dispatch itself is asynchronous fire-and-forget.
//!
//! # Dispatch model
//!
//! One publish fans out into independent spawned tasks, one per surviving
//! subscriber. Within a task the order is strict: before-publish hooks,
//! the handler, after-publish hooks, each hook awaited before the next.
//! Across tasks there is no ordering. `off` prevents matching in every
//! publish processed after it; dispatches that were already collected keep
//! running.

use crate::error::{AvisorError, ConfigError};
use crate::event::{EventId, expand, uncaught_error_event};
use crate::event_str::EventStrParser;
use crate::handler::{EventInfo, Handler};
use crate::hook::{BoundHook, FilterContext, HookRegistry};
use crate::plugin::{Plugin, PluginHost};
use crate::value::{Options, Payload, UncaughtError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Notify, mpsc};

const DEFAULT_NS_SEPARATOR: char = '.';
const DEFAULT_POSTFIX_DIVIDER: char = '?';
const DEFAULT_POSTFIX_SEPARATOR: char = ',';

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Builder for [`AvisorCore`].
///
/// Separators are fixed for the life of the engine; plugins install in the
/// order they were added, which also fixes cross-plugin hook order.
pub struct AvisorBuilder {
    ns_separator: char,
    postfix_divider: char,
    postfix_separator: char,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Default for AvisorBuilder {
    fn default() -> Self {
        Self {
            ns_separator: DEFAULT_NS_SEPARATOR,
            postfix_divider: DEFAULT_POSTFIX_DIVIDER,
            postfix_separator: DEFAULT_POSTFIX_SEPARATOR,
            plugins: Vec::new(),
        }
    }
}

impl AvisorBuilder {
    /// Set the namespace separator (default `.`).
    pub fn ns_separator(mut self, ch: char) -> Self {
        self.ns_separator = ch;
        self
    }

    /// Set the postfix divider (default `?`).
    pub fn postfix_divider(mut self, ch: char) -> Self {
        self.postfix_divider = ch;
        self
    }

    /// Set the postfix item separator (default `,`).
    pub fn postfix_separator(mut self, ch: char) -> Self {
        self.postfix_separator = ch;
        self
    }

    /// Add a plugin.
    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Validate the configuration, install the plugins and start the
    /// engine. Must be called within a tokio runtime.
    pub fn build(self) -> Result<AvisorCore, AvisorError> {
        let parser = EventStrParser::new(
            self.ns_separator,
            self.postfix_divider,
            self.postfix_separator,
        )?;
        let mut host = PluginHost::new(parser);
        for plugin in &self.plugins {
            plugin.install(&mut host).map_err(|e| match e {
                e @ ConfigError::PluginInstall { .. } => e,
                e => ConfigError::PluginInstall {
                    name: plugin.name(),
                    reason: e.to_string(),
                },
            })?;
            tracing::debug!(plugin = plugin.name(), "plugin installed");
        }
        let shared = Arc::new(Shared {
            hooks: host,
            ns_separator: self.ns_separator,
            next_id: AtomicU64::new(1),
            pending: Pending::default(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let api = HookApi {
            tx,
            priority_tx,
            reentrant: false,
            shared,
        };
        tokio::spawn(
            Worker {
                subs: HashMap::new(),
                api: api.clone(),
            }
            .run(rx, priority_rx),
        );
        Ok(AvisorCore { api })
    }
}

/// Tracks queued commands plus in-flight dispatches for [`AvisorCore::settled`].
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    notify: Notify,
}

impl Pending {
    fn inc(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn dec(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct Shared {
    hooks: PluginHost,
    ns_separator: char,
    next_id: AtomicU64,
    pending: Pending,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

enum Command {
    On {
        event: EventId,
        handler: Handler,
        options: Options,
    },
    Off {
        event: Option<EventId>,
        handler: Option<Handler>,
    },
    Emit {
        event: EventId,
        payload: Payload,
        tags: Vec<Value>,
    },
    RawEmit {
        event: EventId,
        payload: Payload,
        handler: Handler,
        tags: Vec<Value>,
    },
    Shutdown,
}

/// The re-entrant engine surface handed to hooks and plugins.
///
/// Cloning is cheap. Operations issued from within a hook enter a priority
/// lane drained before the next caller-issued operation, mirroring the
/// effect of hooks running synchronously inside `on`/`off`/`emit`: a hook
/// calling [`HookApi::off`] during subscribe has unsubscribed before a
/// publish chained after that subscribe is processed.
#[derive(Clone)]
pub struct HookApi {
    tx: mpsc::UnboundedSender<Command>,
    priority_tx: mpsc::UnboundedSender<Command>,
    reentrant: bool,
    shared: Arc<Shared>,
}

impl HookApi {
    /// The clone handed into hook callbacks; its commands jump the queue.
    fn for_hooks(&self) -> Self {
        let mut api = self.clone();
        api.reentrant = true;
        api
    }

    fn send(&self, command: Command) {
        self.shared.pending.inc();
        let tx = if self.reentrant {
            &self.priority_tx
        } else {
            &self.tx
        };
        if tx.send(command).is_err() {
            // engine already shut down
            tracing::trace!("command dropped after shutdown");
            self.shared.pending.dec();
        }
    }

    /// Subscribe a handler to an event.
    pub fn on(&self, event: impl Into<EventId>, handler: Handler) -> &Self {
        self.on_with(event, handler, Options::new())
    }

    /// Subscribe a handler to an event with explicit options. Caller
    /// options win over event-string-derived options on key collision.
    pub fn on_with(&self, event: impl Into<EventId>, handler: Handler, options: Options) -> &Self {
        self.send(Command::On {
            event: event.into(),
            handler,
            options,
        });
        self
    }

    /// Subscribe the same handler to several events at once.
    pub fn on_each<E: Into<EventId>>(
        &self,
        events: impl IntoIterator<Item = E>,
        handler: Handler,
        options: Options,
    ) -> &Self {
        for event in events {
            self.on_with(event, handler.clone(), options.clone());
        }
        self
    }

    /// Unsubscribe one handler from one event. No-op if absent.
    pub fn off(&self, event: impl Into<EventId>, handler: &Handler) -> &Self {
        self.send(Command::Off {
            event: Some(event.into()),
            handler: Some(handler.clone()),
        });
        self
    }

    /// Unsubscribe a handler from every event it is subscribed to.
    pub fn off_handler(&self, handler: &Handler) -> &Self {
        self.send(Command::Off {
            event: None,
            handler: Some(handler.clone()),
        });
        self
    }

    /// Unsubscribe every handler of one event. No-op if the event is
    /// unknown.
    pub fn off_event(&self, event: impl Into<EventId>) -> &Self {
        self.send(Command::Off {
            event: Some(event.into()),
            handler: None,
        });
        self
    }

    /// Unsubscribe everything.
    pub fn off_all(&self) -> &Self {
        self.send(Command::Off {
            event: None,
            handler: None,
        });
        self
    }

    /// Publish an event.
    pub fn emit(&self, event: impl Into<EventId>, payload: Payload) -> &Self {
        self.emit_tagged(event, payload, Vec::new())
    }

    /// Publish an event with initial tags.
    pub fn emit_tagged(
        &self,
        event: impl Into<EventId>,
        payload: Payload,
        tags: Vec<Value>,
    ) -> &Self {
        self.send(Command::Emit {
            event: event.into(),
            payload,
            tags,
        });
        self
    }

    /// Dispatch directly to one subscribed handler, bypassing the on-emit
    /// and filter phases. Used by replay-style plugins; tag the dispatch so
    /// capture hooks can recognize it as synthetic.
    pub fn raw_emit(
        &self,
        event: impl Into<EventId>,
        payload: Payload,
        handler: &Handler,
        tags: Vec<Value>,
    ) -> &Self {
        self.send(Command::RawEmit {
            event: event.into(),
            payload,
            handler: handler.clone(),
            tags,
        });
        self
    }

    /// The wildcard-expansion function: all candidate keys checked for
    /// subscribers when `event` is published.
    pub fn parse_event(&self, event: &EventId) -> Vec<EventId> {
        expand(event, self.shared.ns_separator)
    }

    /// Wait until the command queue is drained and every in-flight dispatch
    /// has finished.
    pub async fn settled(&self) {
        self.shared.pending.idle().await;
    }
}

/// The event bus engine.
///
/// Built via [`AvisorCore::builder`]; all mutating operations are chainable
/// and asynchronous underneath; use [`AvisorCore::settled`] to await
/// quiescence (in tests, after a burst of publishes).
///
/// # Example
///
/// ```rust,ignore
/// let bus = AvisorCore::builder().build()?;
/// bus.on("order.*", handler.clone())
///     .emit("order.created", Payload::new(Order { id: 1 }));
/// bus.settled().await;
/// ```
pub struct AvisorCore {
    api: HookApi,
}

impl AvisorCore {
    /// Start building an engine.
    pub fn builder() -> AvisorBuilder {
        AvisorBuilder::default()
    }

    /// A detached, cloneable handle to the engine. Useful for moving into
    /// tasks or plugin state.
    pub fn hook_api(&self) -> HookApi {
        self.api.clone()
    }

    /// Subscribe a handler to an event. See [`HookApi::on`].
    pub fn on(&self, event: impl Into<EventId>, handler: Handler) -> &Self {
        self.api.on(event, handler);
        self
    }

    /// Subscribe with explicit options. See [`HookApi::on_with`].
    pub fn on_with(&self, event: impl Into<EventId>, handler: Handler, options: Options) -> &Self {
        self.api.on_with(event, handler, options);
        self
    }

    /// Subscribe the same handler to several events at once.
    pub fn on_each<E: Into<EventId>>(
        &self,
        events: impl IntoIterator<Item = E>,
        handler: Handler,
        options: Options,
    ) -> &Self {
        self.api.on_each(events, handler, options);
        self
    }

    /// Unsubscribe one handler from one event.
    pub fn off(&self, event: impl Into<EventId>, handler: &Handler) -> &Self {
        self.api.off(event, handler);
        self
    }

    /// Unsubscribe a handler from every event it is subscribed to.
    pub fn off_handler(&self, handler: &Handler) -> &Self {
        self.api.off_handler(handler);
        self
    }

    /// Unsubscribe every handler of one event.
    pub fn off_event(&self, event: impl Into<EventId>) -> &Self {
        self.api.off_event(event);
        self
    }

    /// Unsubscribe everything.
    pub fn off_all(&self) -> &Self {
        self.api.off_all();
        self
    }

    /// Publish an event.
    pub fn emit(&self, event: impl Into<EventId>, payload: Payload) -> &Self {
        self.api.emit(event, payload);
        self
    }

    /// Publish an event with initial tags.
    pub fn emit_tagged(
        &self,
        event: impl Into<EventId>,
        payload: Payload,
        tags: Vec<Value>,
    ) -> &Self {
        self.api.emit_tagged(event, payload, tags);
        self
    }

    /// The wildcard-expansion function.
    pub fn parse_event(&self, event: &EventId) -> Vec<EventId> {
        self.api.parse_event(event)
    }

    /// Wait until all queued operations and in-flight dispatches finished.
    pub async fn settled(&self) {
        self.api.settled().await;
    }
}

impl Drop for AvisorCore {
    fn drop(&mut self) {
        self.api.send(Command::Shutdown);
    }
}

/// One stored subscription: the key it is registered under, the handler,
/// its merged options and the publish hook chains bound at subscribe time
/// (their storage persists across raw option updates).
#[derive(Clone)]
struct SubEntry {
    event: EventId,
    handler: Handler,
    options: Options,
    before_publish: Vec<BoundHook>,
    after_publish: Vec<BoundHook>,
}

struct Worker {
    subs: HashMap<EventId, Vec<SubEntry>>,
    api: HookApi,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        mut priority_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            // hook-issued commands jump ahead of caller-issued ones
            let command = tokio::select! {
                biased;
                Some(command) = priority_rx.recv() => command,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => return,
                },
            };
            let shutdown = matches!(command, Command::Shutdown);
            match command {
                Command::On {
                    event,
                    handler,
                    options,
                } => self.handle_on(event, handler, options).await,
                Command::Off { event, handler } => self.handle_off(event, handler).await,
                Command::Emit {
                    event,
                    payload,
                    tags,
                } => self.handle_emit(event, payload, tags).await,
                Command::RawEmit {
                    event,
                    payload,
                    handler,
                    tags,
                } => self.handle_raw_emit(event, payload, handler, tags),
                Command::Shutdown => {}
            }
            self.api.shared.pending.dec();
            if shutdown {
                break;
            }
        }
    }

    fn shared(&self) -> &Shared {
        &self.api.shared
    }

    fn fresh_info(&self, event: EventId, handler: Option<Handler>, tags: Vec<Value>) -> EventInfo {
        EventInfo {
            event,
            handler,
            id: self.shared().next_id(),
            time: now_ms(),
            tags,
        }
    }

    /// Run one hook phase that supports neither payload rewriting nor
    /// handler overwriting (after-on, before-off, after-off).
    async fn run_simple_phase(&self, registry: &HookRegistry, options: &Options, info: &EventInfo) {
        let chain = registry.resolve(options, None);
        if chain.is_empty() {
            return;
        }
        tracing::trace!(phase = registry.phase(), hooks = chain.len(), event = %info.event, "running hook phase");
        for hook in &chain {
            let result = hook
                .call(
                    info.clone(),
                    Payload::none(),
                    Some(info.event.clone()),
                    self.api.for_hooks(),
                )
                .await;
            if result.break_phase || result.kill {
                break;
            }
        }
    }

    async fn handle_on(&mut self, event: EventId, handler: Handler, options: Options) {
        let shared = self.api.shared.clone();
        let (event, options) = match event {
            EventId::Name(raw) => {
                let parsed = shared.hooks.event_str.parse(&raw);
                let mut merged = parsed.options;
                merged.extend(options);
                (EventId::Name(parsed.event), merged)
            }
            token => (token, options),
        };

        let mut handler = handler;
        let mut info = self.fresh_info(event.clone(), Some(handler.clone()), Vec::new());
        for hook in shared.hooks.before_on.resolve(&options, None) {
            let result = hook
                .call(
                    info.clone(),
                    Payload::none(),
                    Some(event.clone()),
                    self.api.for_hooks(),
                )
                .await;
            if let Some(new_handler) = result.overwrite_handler {
                handler = new_handler;
                info.handler = Some(handler.clone());
            }
            if result.break_phase || result.kill {
                break;
            }
        }

        let existing_idx = self
            .subs
            .get(&event)
            .and_then(|entries| entries.iter().position(|e| e.handler == handler));
        let (before_publish, after_publish) = {
            let previous = existing_idx.and_then(|i| self.subs.get(&event).map(|v| &v[i]));
            (
                shared
                    .hooks
                    .before_publish
                    .resolve(&options, previous.map(|e| e.before_publish.as_slice())),
                shared
                    .hooks
                    .after_publish
                    .resolve(&options, previous.map(|e| e.after_publish.as_slice())),
            )
        };
        let entry = SubEntry {
            event: event.clone(),
            handler: handler.clone(),
            options: options.clone(),
            before_publish,
            after_publish,
        };
        let entries = self.subs.entry(event.clone()).or_default();
        match existing_idx {
            // re-subscription replaces options in place, keeping slot order
            Some(i) => entries[i] = entry,
            None => entries.push(entry),
        }
        tracing::debug!(event = %event, ?handler, "subscribed");

        self.run_simple_phase(&shared.hooks.after_on, &options, &info)
            .await;
    }

    async fn handle_off(&mut self, event: Option<EventId>, handler: Option<Handler>) {
        let targets: Vec<(EventId, SubEntry)> = match (&event, &handler) {
            (None, None) => self
                .subs
                .iter()
                .flat_map(|(event, entries)| {
                    entries.iter().map(|e| (event.clone(), e.clone()))
                })
                .collect(),
            (None, Some(handler)) => self
                .subs
                .iter()
                .flat_map(|(event, entries)| {
                    entries
                        .iter()
                        .filter(|e| &e.handler == handler)
                        .map(|e| (event.clone(), e.clone()))
                })
                .collect(),
            (Some(event), None) => self
                .subs
                .get(event)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| (event.clone(), e.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            (Some(event), Some(handler)) => self
                .subs
                .get(event)
                .and_then(|entries| entries.iter().find(|e| &e.handler == handler))
                .map(|e| vec![(event.clone(), e.clone())])
                .unwrap_or_default(),
        };

        let shared = self.api.shared.clone();
        for (event, entry) in targets {
            let info = self.fresh_info(event.clone(), Some(entry.handler.clone()), Vec::new());
            self.run_simple_phase(&shared.hooks.before_off, &entry.options, &info)
                .await;
            if let Some(entries) = self.subs.get_mut(&event) {
                entries.retain(|e| e.handler != entry.handler);
            }
            tracing::debug!(event = %event, handler = ?entry.handler, "unsubscribed");
            self.run_simple_phase(&shared.hooks.after_off, &entry.options, &info)
                .await;
        }
    }

    async fn handle_emit(&mut self, event: EventId, payload: Payload, tags: Vec<Value>) {
        let shared = self.api.shared.clone();
        let mut payload = payload;
        let mut tags = tags;
        let publish_id = shared.next_id();
        let time = now_ms();

        for hook in shared.hooks.on_emit.resolve() {
            let info = EventInfo {
                event: event.clone(),
                handler: None,
                id: publish_id,
                time,
                tags: tags.clone(),
            };
            let mut result = hook
                .call(info, payload.clone(), None, self.api.for_hooks())
                .await;
            if let Some(new_payload) = result.overwrite_payload.take() {
                payload = new_payload;
            }
            result.apply_tags(&mut tags);
            if result.kill {
                tracing::debug!(event = %event, "publish killed by on-emit hook");
                return;
            }
            if result.break_phase {
                break;
            }
        }

        let candidates = expand(&event, shared.ns_separator);
        let mut matched: Vec<SubEntry> = Vec::new();
        for candidate in &candidates {
            if let Some(entries) = self.subs.get(candidate) {
                // duplicates across candidates fire once per match
                matched.extend(entries.iter().cloned());
            }
        }
        tracing::trace!(event = %event, subscribers = matched.len(), "publishing");

        for entry in matched {
            let ctx = FilterContext {
                event: EventInfo {
                    event: event.clone(),
                    handler: Some(entry.handler.clone()),
                    id: publish_id,
                    time,
                    tags: tags.clone(),
                },
                handler: entry.handler.clone(),
                options: entry.options.clone(),
            };
            if !shared.hooks.filter.decide(&ctx).await {
                tracing::trace!(event = %event, handler = ?entry.handler, "subscriber filtered out");
                continue;
            }
            self.spawn_dispatch(event.clone(), entry, payload.clone(), tags.clone());
        }
    }

    fn handle_raw_emit(
        &mut self,
        event: EventId,
        payload: Payload,
        handler: Handler,
        tags: Vec<Value>,
    ) {
        let Some(entry) = self
            .subs
            .get(&event)
            .and_then(|entries| entries.iter().find(|e| e.handler == handler))
            .cloned()
        else {
            return;
        };
        self.spawn_dispatch(event, entry, payload, tags);
    }

    fn spawn_dispatch(&self, event: EventId, entry: SubEntry, payload: Payload, tags: Vec<Value>) {
        let shared = self.api.shared.clone();
        let api = self.api.for_hooks();
        let info = self.fresh_info(event, Some(entry.handler.clone()), tags);
        shared.pending.inc();
        tokio::spawn(async move {
            dispatch(api, info, entry, payload).await;
            shared.pending.dec();
        });
    }
}

/// One subscriber's dispatch: before-publish hooks, the handler, then
/// after-publish hooks, strictly in that order.
async fn dispatch(api: HookApi, mut info: EventInfo, entry: SubEntry, mut payload: Payload) {
    let subscription = Some(entry.event.clone());
    for hook in &entry.before_publish {
        let mut result = hook
            .call(info.clone(), payload.clone(), subscription.clone(), api.clone())
            .await;
        if let Some(new_payload) = result.overwrite_payload.take() {
            payload = new_payload;
        }
        result.apply_tags(&mut info.tags);
        if result.kill {
            tracing::trace!(event = %info.event, "dispatch killed before handler");
            return;
        }
        if result.break_phase {
            break;
        }
    }

    if let Err(error) = entry.handler.invoke(payload.clone(), info.clone()).await {
        if info.event == uncaught_error_event() {
            // never recurse a failing error-event handler back into itself
            tracing::warn!(%error, "uncaught-error handler failed; dropping");
        } else {
            tracing::debug!(%error, event = %info.event, "handler failed; rerouting to uncaught-error event");
            api.emit(
                uncaught_error_event(),
                Payload::new(UncaughtError {
                    error: Arc::new(error),
                    event: info.clone(),
                    payload: payload.clone(),
                }),
            );
        }
    }

    for hook in &entry.after_publish {
        let mut result = hook
            .call(info.clone(), payload.clone(), subscription.clone(), api.clone())
            .await;
        if let Some(new_payload) = result.overwrite_payload.take() {
            // only later after-publish hooks observe this; the handler ran
            payload = new_payload;
        }
        result.apply_tags(&mut info.tags);
        if result.kill || result.break_phase {
            break;
        }
    }
}
