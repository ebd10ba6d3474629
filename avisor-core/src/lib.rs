//! # avisor-core
//!
//! Core engine for the Avisor event bus: an in-process emitter with a
//! pluggable hook pipeline.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! plugins that don't need the batteries-included `avisor` crate.
//!
//! # Architecture
//!
//! Avisor is built from four layers, leaves first:
//!
//! ## Events ([`EventId`], [`Token`])
//!
//! A notification channel is addressed by a namespaced textual name
//! (`"car.door.open"`) or an opaque [`Token`]. Publishing a textual event
//! reaches exact subscribers and wildcard subscribers (`"car.*"`,
//! `"car.*.open"`, `"*"`); a token only reaches itself and the bare `*`.
//!
//! ## Hook registries ([`HookRegistry`], [`AllHookRegistry`], [`FilterRegistry`])
//!
//! Plugins attach callbacks to well-defined phases: before/after subscribe,
//! before/after publish, before/after unsubscribe, on-emit and subscriber
//! filtering. Keyed callbacks activate per subscription through its option
//! bag; "all" callbacks run unconditionally. A hook steers the pipeline by
//! returning a [`HookResult`]: overwrite payload or handler, break the
//! phase, kill the dispatch, add or remove tags.
//!
//! ## Event-string parser ([`EventStrParser`])
//!
//! A mini-language for encoding per-subscription configuration into the
//! event string itself: postfix tokens after a divider (`"order?3"`) and a
//! single registered prefix character (`"!order"`), both mapped to options
//! by plugin-registered rules.
//!
//! ## Core engine ([`AvisorCore`])
//!
//! Holds the subscriptions, runs the hook phases and fans a publish out to
//! independently scheduled per-subscriber dispatches. Handler failures
//! never reach the publisher; they are rerouted to the reserved
//! [`uncaught_error_event`].
//!
//! # Error types
//!
//! - [`AvisorError`] - Top-level error type
//! - [`ConfigError`] - Build-time and plugin-installation errors

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod core;
mod error;
mod event;
mod event_str;
mod handler;
mod hook;
mod plugin;
pub mod testing;
mod value;

// Re-exports
pub use crate::core::{AvisorBuilder, AvisorCore, HookApi};
pub use error::{AvisorError, BoxError, ConfigError};
pub use event::{EventId, Token, WILDCARD, expand, uncaught_error_event};
pub use event_str::{EventStrParser, ParsedEvent};
pub use handler::{EventInfo, Handler};
pub use hook::{
    AllHookRegistry, FilterContext, FilterRegistry, HookContext, HookRegistry, HookResult, Storage,
};
pub use plugin::{Plugin, PluginHost};
pub use value::{Options, Payload, UncaughtError, Value};
