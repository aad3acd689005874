use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Default tick for instances that do not set `interval_secs`.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Agent-wide tags, applied under each instance's own labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Capacity of the channel between input loops and the writer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// `[[inputs.<plugin>]]` tables, keyed by plugin name.
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<toml::Value>>,
}

fn default_interval_secs() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    64
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.interval_secs == 0 {
            anyhow::bail!("interval_secs must be greater than zero");
        }
        Ok(config)
    }

    /// Every configured instance as `(plugin, table)`, with the agent-wide
    /// labels merged under the instance's own `labels`.
    pub fn instance_configs(&self) -> Vec<(String, toml::Value)> {
        let mut out = Vec::new();
        for (plugin, tables) in &self.inputs {
            for table in tables {
                out.push((plugin.clone(), self.with_agent_labels(table.clone())));
            }
        }
        out
    }

    fn with_agent_labels(&self, mut value: toml::Value) -> toml::Value {
        if self.labels.is_empty() {
            return value;
        }
        let Some(table) = value.as_table_mut() else {
            return value;
        };

        let mut merged: toml::map::Map<String, toml::Value> = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
            .collect();
        if let Some(toml::Value::Table(own)) = table.get("labels") {
            for (k, v) in own {
                merged.insert(k.clone(), v.clone());
            }
        }
        table.insert("labels".to_string(), toml::Value::Table(merged));
        value
    }
}
