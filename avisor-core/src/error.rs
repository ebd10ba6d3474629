//! Error types for Avisor.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`AvisorError`] - Top-level error type for all Avisor operations
//! - [`ConfigError`] - Builder and plugin-installation failures

use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all Avisor operations.
///
/// Handler failures never surface here; they are rerouted to the
/// uncaught-error event as [`BoxError`] values.
#[derive(Error, Debug)]
pub enum AvisorError {
    /// The engine or a plugin was misconfigured.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while building an engine or installing a plugin.
///
/// Every variant is reported synchronously at construction time, never
/// deferred to publish time.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Two configured characters collide.
    #[error("{first} and {second} can not share the character {value:?}")]
    CharClash {
        /// First parameter involved in the clash.
        first: &'static str,
        /// Second parameter involved in the clash.
        second: &'static str,
        /// The shared character.
        value: char,
    },

    /// A prefix character outside the allow-list, or one that is reserved
    /// by the separator/divider/wildcard configuration.
    #[error("char {0:?} is not allowed as a prefix")]
    PrefixNotAllowed(char),

    /// A prefix character was registered twice.
    #[error("there is already a hook registered with {0:?}")]
    DuplicatePrefix(char),

    /// A plugin refused to install.
    #[error("plugin {name:?} failed to install: {reason}")]
    PluginInstall {
        /// The plugin's name.
        name: &'static str,
        /// Why installation failed.
        reason: String,
    },
}
