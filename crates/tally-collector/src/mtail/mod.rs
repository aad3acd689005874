//! Input that turns the registry of a log-metrics extraction engine (mtail)
//! into samples.
//!
//! Each tick takes one snapshot of the engine's registry and flattens every
//! metric through [`Flattener`] with the instance's name prefix and tags.

pub mod exposition;
pub mod source;

use crate::error::CollectorError;
use crate::normalize::{Flattener, MetricFamily};
use crate::plugin::{parse_config, InputPlugin};
use crate::Instance;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use source::{HttpRegistrySource, RegistrySource};
use std::sync::Arc;
use std::time::Duration;
use tally_common::types::Labels;
use tally_common::SampleList;

const INPUT_NAME: &str = "mtail";

/// Label the engine attaches to name the program that produced a metric.
const PROG_LABEL: &str = "prog";

#[derive(Debug, Clone, Deserialize)]
pub struct MtailConfig {
    /// Exposition endpoint of the engine.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Keep the engine's `prog` label on emitted samples.
    #[serde(default)]
    pub emit_prog_label: bool,
}

fn default_url() -> String {
    "http://127.0.0.1:3903/metrics".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct MtailPlugin;

impl InputPlugin for MtailPlugin {
    fn name(&self) -> &str {
        INPUT_NAME
    }

    fn description(&self) -> &str {
        "extract internal monitoring data from application logs"
    }

    fn create_instance(&self, config: toml::Value) -> Result<Box<dyn Instance>> {
        let config: MtailConfig = parse_config(INPUT_NAME, config)?;
        if config.url.trim().is_empty() {
            return Err(CollectorError::InvalidConfig("mtail: url must not be empty".into()).into());
        }
        Ok(Box::new(MtailInstance::new(config)))
    }
}

pub struct MtailInstance {
    config: MtailConfig,
    source: Option<Arc<dyn RegistrySource>>,
}

impl MtailInstance {
    pub fn new(config: MtailConfig) -> Self {
        Self { config, source: None }
    }

    /// Builds an instance around an existing source; `init` is not needed.
    pub fn with_source(config: MtailConfig, source: Arc<dyn RegistrySource>) -> Self {
        Self {
            config,
            source: Some(source),
        }
    }

    fn strip_prog_labels(&self, families: &mut [MetricFamily]) {
        if self.config.emit_prog_label {
            return;
        }
        for metric in families.iter_mut().flat_map(|f| f.metrics.iter_mut()) {
            metric.labels.retain(|(k, _)| k != PROG_LABEL);
        }
    }
}

#[async_trait]
impl Instance for MtailInstance {
    fn plugin(&self) -> &str {
        INPUT_NAME
    }

    fn interval(&self) -> Option<Duration> {
        self.config.interval_secs.map(Duration::from_secs)
    }

    fn init(&mut self) -> Result<()> {
        if self.source.take().is_some() {
            tracing::info!(url = %self.config.url, "Releasing previous mtail registry source");
        }
        let source = HttpRegistrySource::new(&self.config.url, Duration::from_secs(self.config.timeout_secs))?;
        tracing::info!(url = %source.url(), prefix = %self.config.name_prefix, "mtail input initialized");
        self.source = Some(Arc::new(source));
        Ok(())
    }

    async fn gather(&self, slist: &SampleList) {
        let Some(source) = &self.source else {
            tracing::warn!(url = %self.config.url, error = %CollectorError::NotInitialized, "mtail gather skipped");
            return;
        };

        let mut families = match source.snapshot().await {
            Ok(families) => families,
            Err(e) => {
                tracing::warn!(url = %self.config.url, error = %e, "Failed to snapshot mtail registry");
                return;
            }
        };
        self.strip_prog_labels(&mut families);

        let before = slist.len();
        Flattener::new(&self.config.name_prefix, &self.config.labels).flatten_into(&families, slist);
        tracing::debug!(
            families = families.len(),
            samples = slist.len().saturating_sub(before),
            "mtail registry flattened"
        );
    }

    fn shutdown(&mut self) {
        if self.source.take().is_some() {
            tracing::info!(url = %self.config.url, "mtail input shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;
    use crate::normalize::{Metric, MetricType, MetricValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        families: Vec<MetricFamily>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistrySource for StaticSource {
        async fn snapshot(&self) -> error::Result<Vec<MetricFamily>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.families.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RegistrySource for FailingSource {
        async fn snapshot(&self) -> error::Result<Vec<MetricFamily>> {
            Err(CollectorError::Api {
                status: 500,
                body: "down".into(),
            })
        }
    }

    fn config(prefix: &str, emit_prog_label: bool) -> MtailConfig {
        let mut labels = Labels::new();
        labels.insert("region".to_string(), "eu".to_string());
        MtailConfig {
            url: default_url(),
            name_prefix: prefix.to_string(),
            labels,
            interval_secs: None,
            timeout_secs: 1,
            emit_prog_label,
        }
    }

    fn lines_family() -> MetricFamily {
        MetricFamily {
            name: "lines_total".to_string(),
            help: String::new(),
            kind: MetricType::Counter,
            metrics: vec![Metric {
                labels: vec![
                    ("prog".to_string(), "nginx.mtail".to_string()),
                    ("file".to_string(), "access.log".to_string()),
                ],
                value: MetricValue::Counter(42.0),
            }],
        }
    }

    #[tokio::test]
    async fn gather_flattens_snapshot_with_prefix_and_tags() {
        let source = Arc::new(StaticSource {
            families: vec![lines_family()],
            calls: AtomicUsize::new(0),
        });
        let instance = MtailInstance::with_source(config("mtail", false), source.clone());

        let slist = SampleList::new();
        instance.gather(&slist).await;
        let samples = slist.drain_all();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric(), "mtail_lines_total");
        assert_eq!(samples[0].value(), 42.0);
        assert_eq!(samples[0].labels()["region"], "eu");
        assert_eq!(samples[0].labels()["file"], "access.log");
        assert!(!samples[0].labels().contains_key("prog"));
    }

    #[tokio::test]
    async fn prog_label_kept_when_requested() {
        let source = Arc::new(StaticSource {
            families: vec![lines_family()],
            calls: AtomicUsize::new(0),
        });
        let instance = MtailInstance::with_source(config("", true), source);

        let slist = SampleList::new();
        instance.gather(&slist).await;
        let samples = slist.drain_all();
        assert_eq!(samples[0].metric(), "lines_total");
        assert_eq!(samples[0].labels()["prog"], "nginx.mtail");
    }

    #[tokio::test]
    async fn failed_snapshot_yields_no_samples() {
        let instance = MtailInstance::with_source(config("mtail", false), Arc::new(FailingSource));
        let slist = SampleList::new();
        instance.gather(&slist).await;
        assert!(slist.is_empty());
    }

    #[tokio::test]
    async fn gather_before_init_is_a_no_op() {
        let instance = MtailInstance::new(config("mtail", false));
        let slist = SampleList::new();
        instance.gather(&slist).await;
        assert!(slist.is_empty());
    }

    #[tokio::test]
    async fn shutdown_releases_the_source() {
        let mut instance = MtailInstance::new(config("mtail", false));
        instance.init().unwrap();
        assert!(instance.source.is_some());
        instance.init().unwrap();
        assert!(instance.source.is_some());
        instance.shutdown();
        assert!(instance.source.is_none());
    }

    #[test]
    fn empty_url_is_rejected() {
        let config: toml::Value = toml::from_str(r#"url = " ""#).unwrap();
        assert!(MtailPlugin.create_instance(config).is_err());
    }
}
