//! The hook pipeline: control results, registries and bound hook chains.
//!
//! Plugins attach callbacks to named phases (before/after subscribe,
//! before/after publish, before/after unsubscribe, on-emit, subscriber
//! filter). Keyed callbacks only run for subscriptions whose option bag
//! contains their key; "all" callbacks run for every subscription. A single
//! per-registry index interleaves both kinds so execution order equals
//! registration order across plugins.

use crate::core::HookApi;
use crate::event::EventId;
use crate::handler::{EventInfo, Handler};
use crate::value::{Options, Payload, Value};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Control result returned by a hook callback.
///
/// The default result is a no-op ("continue"). Effects are combined with
/// builder-style constructors:
///
/// ```rust,ignore
/// HookResult::next().overwrite_payload(Payload::new(2)).add_tag("audited")
/// ```
#[derive(Clone, Default)]
pub struct HookResult {
    pub(crate) overwrite_payload: Option<Payload>,
    pub(crate) overwrite_handler: Option<Handler>,
    pub(crate) break_phase: bool,
    pub(crate) kill: bool,
    pub(crate) add_tags: Vec<Value>,
    pub(crate) remove_tags: Vec<Value>,
}

impl HookResult {
    /// The no-op result: continue with the next hook.
    pub fn next() -> Self {
        Self::default()
    }

    /// Replace the payload seen by later hooks and (in the before-publish
    /// and on-emit phases) by the handler.
    pub fn overwrite_payload(mut self, payload: Payload) -> Self {
        self.overwrite_payload = Some(payload);
        self
    }

    /// Replace the handler being subscribed. Only honored in the
    /// before-subscribe phase.
    pub fn overwrite_handler(mut self, handler: Handler) -> Self {
        self.overwrite_handler = Some(handler);
        self
    }

    /// Stop the remaining hooks of the current phase. The surrounding
    /// operation still completes.
    pub fn break_phase(mut self) -> Self {
        self.break_phase = true;
        self
    }

    /// Stop the remaining hooks *and* abort the rest of this dispatch (or,
    /// in the on-emit phase, the whole publish). Silent by design.
    pub fn kill(mut self) -> Self {
        self.kill = true;
        self
    }

    /// Append a tag to the publish's tag sequence.
    pub fn add_tag(mut self, tag: impl Into<Value>) -> Self {
        self.add_tags.push(tag.into());
        self
    }

    /// Remove every tag equal to `tag` from the publish's tag sequence.
    pub fn remove_tag(mut self, tag: impl Into<Value>) -> Self {
        self.remove_tags.push(tag.into());
        self
    }

    /// Apply this result's tag edits to a tag sequence.
    pub(crate) fn apply_tags(&self, tags: &mut Vec<Value>) {
        tags.extend(self.add_tags.iter().cloned());
        if !self.remove_tags.is_empty() {
            tags.retain(|t| !self.remove_tags.contains(t));
        }
    }
}

/// Private per-subscription storage handed to a bound hook.
///
/// Created once when a hook chain is bound to a subscription and shared by
/// every invocation of that bound hook, so a plugin can keep state (e.g. a
/// countdown) across dispatches. Resetting happens on unsubscribe +
/// re-subscribe, not on a raw option update.
#[derive(Clone, Default)]
pub struct Storage(Arc<Mutex<HashMap<String, Value>>>);

impl Storage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().unwrap().get(key).cloned()
    }

    /// Write a value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.lock().unwrap().insert(key.into(), value.into());
    }

    /// Atomically read-modify-write the storage map. Dispatches for one
    /// subscription may interleave, so compound updates must go through
    /// here.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

/// Everything a hook callback receives.
pub struct HookContext {
    /// The invocation record of the surrounding operation.
    pub event: EventInfo,
    /// The payload in flight (empty for subscribe/unsubscribe phases).
    pub payload: Payload,
    /// The event key the subscription is stored under, wildcard patterns
    /// included ([`HookContext::event`] carries the published event, which
    /// may differ). `None` in the on-emit phase, which runs before
    /// subscribers are resolved.
    pub subscription: Option<EventId>,
    /// Per-subscription private storage.
    pub storage: Storage,
    /// The option value the hook was keyed on; `None` for "all" hooks.
    pub option: Option<Value>,
    /// Re-entrant engine API: subscribe, publish, unsubscribe, parse.
    pub api: HookApi,
}

type HookCallbackFn = dyn Fn(HookContext) -> BoxFuture<'static, HookResult> + Send + Sync + 'static;

#[derive(Clone)]
struct HookCallback(Arc<HookCallbackFn>);

impl HookCallback {
    fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        Self(Arc::new(move |ctx| Box::pin(f(ctx))))
    }
}

/// A callback bound to one subscription: callback + option value + private
/// storage, ready to be invoked once per dispatch.
#[derive(Clone)]
pub(crate) struct BoundHook {
    pub(crate) index: u64,
    callback: HookCallback,
    pub(crate) storage: Storage,
    option: Option<Value>,
}

impl BoundHook {
    pub(crate) fn call(
        &self,
        event: EventInfo,
        payload: Payload,
        subscription: Option<EventId>,
        api: HookApi,
    ) -> BoxFuture<'static, HookResult> {
        (self.callback.0)(HookContext {
            event,
            payload,
            subscription,
            storage: self.storage.clone(),
            option: self.option.clone(),
            api,
        })
    }
}

/// An ordered hook registry with keyed and "all" registration.
///
/// Used for the phases that honor per-subscription configuration:
/// before/after subscribe, before/after publish, before/after unsubscribe.
pub struct HookRegistry {
    phase: &'static str,
    next_index: u64,
    keyed: HashMap<String, (u64, HookCallback)>,
    all: Vec<(u64, HookCallback)>,
}

impl HookRegistry {
    pub(crate) fn new(phase: &'static str) -> Self {
        Self {
            phase,
            next_index: 0,
            keyed: HashMap::new(),
            all: Vec::new(),
        }
    }

    /// Register a callback that runs for subscriptions whose options contain
    /// `key`. Re-registering a key replaces the previous callback.
    pub fn key<F, Fut>(&mut self, key: impl Into<String>, f: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let index = self.bump();
        self.keyed.insert(key.into(), (index, HookCallback::new(f)));
    }

    /// Register a callback that runs for every subscription.
    pub fn all<F, Fut>(&mut self, f: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let index = self.bump();
        self.all.push((index, HookCallback::new(f)));
    }

    fn bump(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub(crate) fn phase(&self) -> &'static str {
        self.phase
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keyed.is_empty() && self.all.is_empty()
    }

    /// Bind this registry to one subscription's options.
    ///
    /// Returns one bound hook per option key with a registered callback plus
    /// one per "all" callback, sorted ascending by registration index.
    /// `reuse` carries the previously bound chain of the same subscription;
    /// hooks that survive a raw option update keep their storage.
    pub(crate) fn resolve(&self, options: &Options, reuse: Option<&[BoundHook]>) -> Vec<BoundHook> {
        let storage_for = |index: u64| {
            reuse
                .and_then(|hooks| hooks.iter().find(|h| h.index == index))
                .map(|h| h.storage.clone())
                .unwrap_or_default()
        };
        let mut bound: Vec<BoundHook> = self
            .keyed
            .iter()
            .filter_map(|(key, (index, callback))| {
                options.get(key).map(|value| BoundHook {
                    index: *index,
                    callback: callback.clone(),
                    storage: storage_for(*index),
                    option: Some(value.clone()),
                })
            })
            .collect();
        bound.extend(self.all.iter().map(|(index, callback)| BoundHook {
            index: *index,
            callback: callback.clone(),
            storage: storage_for(*index),
            option: None,
        }));
        bound.sort_by_key(|h| h.index);
        bound
    }
}

/// An "all"-only hook registry, used for the on-emit phase which runs once
/// per publish and carries no per-subscription configuration.
pub struct AllHookRegistry {
    all: Vec<HookCallback>,
}

impl AllHookRegistry {
    pub(crate) fn new() -> Self {
        Self { all: Vec::new() }
    }

    /// Register a callback that runs for every publish.
    pub fn all<F, Fut>(&mut self, f: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.all.push(HookCallback::new(f));
    }

    /// Bind the registered callbacks with fresh storage, in registration
    /// order.
    pub(crate) fn resolve(&self) -> Vec<BoundHook> {
        self.all
            .iter()
            .enumerate()
            .map(|(index, callback)| BoundHook {
                index: index as u64,
                callback: callback.clone(),
                storage: Storage::new(),
                option: None,
            })
            .collect()
    }
}

/// A candidate subscriber under scrutiny by the filter phase.
#[derive(Clone)]
pub struct FilterContext {
    /// The event being published (after on-emit rewriting).
    pub event: EventInfo,
    /// The candidate subscriber.
    pub handler: Handler,
    /// The candidate subscription's options.
    pub options: Options,
}

type FilterCallbackFn =
    dyn Fn(FilterContext) -> BoxFuture<'static, Option<bool>> + Send + Sync + 'static;

/// The subscriber-filter registry: advisory gates over resolved candidates.
///
/// Filters run in registration order; the first one returning a decision
/// (`Some`) settles the candidate. No decision means keep.
pub struct FilterRegistry {
    filters: Vec<Arc<FilterCallbackFn>>,
}

impl FilterRegistry {
    pub(crate) fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Register a filter callback.
    pub fn all<F, Fut>(&mut self, f: F)
    where
        F: Fn(FilterContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<bool>> + Send + 'static,
    {
        self.filters.push(Arc::new(move |ctx| Box::pin(f(ctx))));
    }

    /// Decide whether a candidate subscriber receives the dispatch.
    pub(crate) async fn decide(&self, ctx: &FilterContext) -> bool {
        for filter in &self.filters {
            if let Some(decision) = filter(ctx.clone()).await {
                return decision;
            }
        }
        true
    }
}
