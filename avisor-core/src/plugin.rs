//! The plugin contract.
//!
//! A plugin is installed exactly once, at engine build time, and receives
//! the full set of hook registries through [`PluginHost`]. Installation is
//! the only moment configuration can fail; nothing a plugin registers can
//! fail later at publish time.

use crate::error::ConfigError;
use crate::event_str::EventStrParser;
use crate::hook::{AllHookRegistry, FilterRegistry, HookRegistry};

/// A third-party extension of the engine.
///
/// # Example
///
/// ```rust,ignore
/// struct Audit;
///
/// impl Plugin for Audit {
///     fn name(&self) -> &'static str {
///         "audit"
///     }
///
///     fn install(&self, host: &mut PluginHost) -> Result<(), ConfigError> {
///         host.on_emit.all(|ctx| async move {
///             tracing::info!(event = %ctx.event.event, "published");
///             HookResult::next()
///         });
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync + 'static {
    /// The plugin's name, used in install-failure errors and logs.
    fn name(&self) -> &'static str;

    /// Attach the plugin's callbacks to the engine's extension points.
    fn install(&self, host: &mut PluginHost) -> Result<(), ConfigError>;
}

/// The registries a plugin may attach to.
///
/// One instance exists per engine; it is handed to each plugin's
/// [`Plugin::install`] in installation order and frozen afterwards.
pub struct PluginHost {
    /// Runs before a subscription is stored; may overwrite the handler.
    pub before_on: HookRegistry,
    /// Runs after a subscription is stored.
    pub after_on: HookRegistry,
    /// Runs per dispatch before the handler; may rewrite payload/tags,
    /// break or kill the dispatch.
    pub before_publish: HookRegistry,
    /// Runs per dispatch after the handler completed.
    pub after_publish: HookRegistry,
    /// Runs before a subscription is removed.
    pub before_off: HookRegistry,
    /// Runs after a subscription is removed.
    pub after_off: HookRegistry,
    /// Runs once per publish, before subscribers are resolved.
    pub on_emit: AllHookRegistry,
    /// Gates resolved candidates per dispatch.
    pub filter: FilterRegistry,
    /// Prefix/postfix extension of the event-string mini-language.
    pub event_str: EventStrParser,
}

impl PluginHost {
    pub(crate) fn new(event_str: EventStrParser) -> Self {
        Self {
            before_on: HookRegistry::new("before-on"),
            after_on: HookRegistry::new("after-on"),
            before_publish: HookRegistry::new("before-publish"),
            after_publish: HookRegistry::new("after-publish"),
            before_off: HookRegistry::new("before-off"),
            after_off: HookRegistry::new("after-off"),
            on_emit: AllHookRegistry::new(),
            filter: FilterRegistry::new(),
            event_str,
        }
    }
}
