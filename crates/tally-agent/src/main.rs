mod config;
mod output;

use anyhow::Result;
use tally_collector::plugin::InputRegistry;
use tally_collector::Instance;
use tally_common::{Sample, SampleList};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

/// Builds and initializes every configured instance. Instances that fail to
/// build or initialize are logged and left out.
fn build_instances(config: &config::AgentConfig, registry: &InputRegistry) -> Vec<Box<dyn Instance>> {
    let mut instances = Vec::new();
    for (plugin, table) in config.instance_configs() {
        let mut instance = match registry.create_instance(&plugin, table) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::error!(input = %plugin, error = %e, "Invalid input configuration");
                continue;
            }
        };
        if let Err(e) = instance.init() {
            tracing::error!(input = %plugin, error = %e, "Failed to initialize input");
            continue;
        }
        instances.push(instance);
    }
    instances
}

/// Gathers on every tick until shutdown, then releases the instance.
async fn run_instance(
    mut instance: Box<dyn Instance>,
    every: Duration,
    tx: mpsc::Sender<Vec<Sample>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let slist = SampleList::new();
                instance.gather(&slist).await;
                let samples = slist.drain_all();
                tracing::debug!(input = instance.plugin(), count = samples.len(), "Gathered samples");

                if !samples.is_empty() && tx.send(samples).await.is_err() {
                    tracing::warn!(input = instance.plugin(), "Writer gone, stopping input");
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    instance.shutdown();
    tracing::info!(input = instance.plugin(), "Input stopped");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("tally=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = config::AgentConfig::load(&config_path)?;
    let registry = InputRegistry::default();
    tracing::info!(
        config = %config_path,
        plugins = ?registry.plugin_names(),
        "tally-agent starting"
    );

    for plugin in config.inputs.keys() {
        if !registry.has_plugin(plugin) {
            anyhow::bail!(tally_collector::error::CollectorError::UnknownPlugin(plugin.clone()));
        }
    }

    let instances = build_instances(&config, &registry);
    if instances.is_empty() {
        tracing::warn!("No inputs configured, nothing to collect");
    }

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = tokio::spawn(output::run_writer(tokio::io::stdout(), rx));

    let default_interval = Duration::from_secs(config.interval_secs);
    let mut loops = Vec::with_capacity(instances.len());
    for instance in instances {
        let every = instance.interval().filter(|d| !d.is_zero()).unwrap_or(default_interval);
        tracing::info!(input = instance.plugin(), interval_secs = every.as_secs(), "Starting input loop");
        loops.push(tokio::spawn(run_instance(instance, every, tx.clone(), shutdown_rx.clone())));
    }
    drop(tx);

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    let _ = shutdown_tx.send(true);

    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Input loop panicked");
        }
    }
    let written = writer.await?;
    tracing::info!(samples = written, "Writer drained");

    Ok(())
}
