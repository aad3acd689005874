use crate::error::CollectorError;
use crate::Instance;
use anyhow::Result;
use std::collections::HashMap;

/// Factory for creating [`Instance`]s from one `[[inputs.<name>]]` table of
/// the agent configuration.
pub trait InputPlugin: Send + Sync {
    /// Returns the plugin type name (e.g., `"mtail"`, `"github"`).
    fn name(&self) -> &str;

    /// One-sentence description of what the input collects.
    fn description(&self) -> &str;

    /// Validates `config` and builds an instance from it. The instance is
    /// returned uninitialized.
    fn create_instance(&self, config: toml::Value) -> Result<Box<dyn Instance>>;
}

/// Registry of available [`InputPlugin`]s. The host builds one at startup
/// and owns it; nothing registers itself.
///
/// # Examples
///
/// ```
/// use tally_collector::plugin::InputRegistry;
///
/// let registry = InputRegistry::default();
/// assert!(registry.has_plugin("mtail"));
/// assert!(registry.has_plugin("github"));
/// assert!(!registry.has_plugin("nonexistent"));
/// ```
pub struct InputRegistry {
    plugins: HashMap<String, Box<dyn InputPlugin>>,
}

impl InputRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn InputPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn create_instance(&self, type_name: &str, config: toml::Value) -> Result<Box<dyn Instance>> {
        let plugin = self
            .plugins
            .get(type_name)
            .ok_or_else(|| CollectorError::UnknownPlugin(type_name.to_string()))?;
        plugin.create_instance(config)
    }

    pub fn get_plugin(&self, type_name: &str) -> Option<&dyn InputPlugin> {
        self.plugins.get(type_name).map(|p| p.as_ref())
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for InputRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::mtail::MtailPlugin));
        registry.register(Box::new(crate::github::GithubPlugin));
        registry
    }
}

/// Deserializes a plugin's config table, mapping failures to
/// [`CollectorError::InvalidConfig`].
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(plugin: &str, config: toml::Value) -> Result<T> {
    config
        .try_into()
        .map_err(|e| CollectorError::InvalidConfig(format!("{plugin}: {e}")).into())
}
