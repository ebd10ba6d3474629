//! # avisor-count
//!
//! Bounded-delivery plugin for the Avisor event bus.
//!
//! A subscription carrying a `count` option is delivered to at most that
//! many times and then removed. The budget can be given through the option
//! bag or directly in the event string:
//!
//! ```rust,ignore
//! let bus = AvisorCore::builder().plugin(CountPlugin::new()).build()?;
//! bus.on("tick?3", handler); // delivered at most three times
//! ```
//!
//! The countdown lives in per-subscription hook storage, so it survives raw
//! option updates and only resets after an unsubscribe + resubscribe.
//! Dispatches beyond the budget are killed before the handler runs, which
//! holds the bound even while earlier dispatches are still in flight.

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

use avisor_core::{ConfigError, HookContext, HookResult, Options, Plugin, PluginHost, Value};
use regex::Regex;

/// Default option key read by the plugin.
pub const COUNT_KEY: &str = "count";

const REMAINING: &str = "remaining";

enum Countdown {
    Deliver,
    LastDelivery,
    Spent,
}

/// The bounded-delivery plugin.
#[derive(Debug, Clone)]
pub struct CountPlugin {
    key: String,
}

impl CountPlugin {
    /// Create the plugin with the default `count` option key.
    pub fn new() -> Self {
        Self {
            key: COUNT_KEY.to_owned(),
        }
    }

    /// Use a different option key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Default for CountPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for CountPlugin {
    fn name(&self) -> &'static str {
        "count"
    }

    fn install(&self, host: &mut PluginHost) -> Result<(), ConfigError> {
        let key = self.key.clone();
        let pattern = Regex::new(r"^\d+$").map_err(|e| ConfigError::PluginInstall {
            name: self.name(),
            reason: e.to_string(),
        })?;
        host.event_str.postfix(pattern, move |token| {
            match token.parse::<i64>() {
                Ok(n) => Options::from([(key.clone(), Value::Int(n))]),
                // digits that don't fit an i64; leave the option unset
                Err(_) => Options::new(),
            }
        });
        host.before_publish.key(self.key.clone(), |ctx| {
            let result = consume(&ctx);
            async move { result }
        });
        Ok(())
    }
}

fn consume(ctx: &HookContext) -> HookResult {
    let countdown = ctx.storage.update(|slots| {
        let remaining = slots
            .get(REMAINING)
            .and_then(Value::as_int)
            .or_else(|| ctx.option.as_ref().and_then(Value::as_int))
            .unwrap_or(0);
        if remaining <= 0 {
            slots.insert(REMAINING.to_owned(), Value::Int(0));
            Countdown::Spent
        } else {
            slots.insert(REMAINING.to_owned(), Value::Int(remaining - 1));
            if remaining == 1 {
                Countdown::LastDelivery
            } else {
                Countdown::Deliver
            }
        }
    });
    match countdown {
        Countdown::Deliver => HookResult::next(),
        Countdown::LastDelivery => {
            unsubscribe(ctx);
            HookResult::next()
        }
        Countdown::Spent => {
            unsubscribe(ctx);
            HookResult::next().kill()
        }
    }
}

/// Remove only the exhausted subscription. The stored key can differ from
/// the published event (wildcard subscriptions), and the same handler may
/// hold live budgets elsewhere.
fn unsubscribe(ctx: &HookContext) {
    let Some(handler) = &ctx.event.handler else {
        return;
    };
    match &ctx.subscription {
        Some(event) => {
            tracing::debug!(event = %event, "delivery budget spent; unsubscribing");
            ctx.api.off(event.clone(), handler);
        }
        None => {
            ctx.api.off_handler(handler);
        }
    }
}
