use avisor_core::{ConfigError, Plugin, PluginHost};

// ============================================================================
// Test Plugins
// ============================================================================

/// A plugin assembled from a closure, for attaching ad-hoc hooks in tests.
pub struct InstallWith {
    name: &'static str,
    install: Box<dyn Fn(&mut PluginHost) -> Result<(), ConfigError> + Send + Sync>,
}

impl InstallWith {
    pub fn new(
        name: &'static str,
        install: impl Fn(&mut PluginHost) -> Result<(), ConfigError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            install: Box::new(install),
        }
    }
}

impl Plugin for InstallWith {
    fn name(&self) -> &'static str {
        self.name
    }

    fn install(&self, host: &mut PluginHost) -> Result<(), ConfigError> {
        (self.install)(host)
    }
}
