use clap::Parser;
use serde_json::Value;
use slaguard::agreement::{Agreement, InMemoryAgreementStore, LinkTarget};
use slaguard::collector::{
    CollectorRegistry, DeviceBindings, InMemoryMetricSource, MonitoringSystem, Notifier,
    PollingCollector,
};
use slaguard::monitoring::init_logging;
use slaguard::policy::InMemoryPolicyStore;
use slaguard::reasoning::{EngineConfig, ReasoningEngine};
use slaguard::remedy::LogRemedySink;
use slaguard::violation::InMemoryViolationStore;
use slaguard::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Name of the collector serving the in-memory readings.
const MEMORY_COLLECTOR: &str = "memory";

/// Continuous SLO verification and remedy enforcement
#[derive(Parser)]
#[command(name = "slaguard")]
#[command(about = "Continuous SLO verification and remedy enforcement")]
#[command(version)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, env = "SLAGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Agreements to enforce (JSON array)
    #[arg(short, long)]
    agreements: Option<PathBuf>,

    /// Initial readings, as {"device": {"metric": value}}
    #[arg(short, long)]
    readings: Option<PathBuf>,

    /// Run a single reconciliation tick and exit
    #[arg(long)]
    once: bool,
}

fn load_agreements(path: Option<&PathBuf>) -> Result<Vec<Agreement>> {
    match path {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(Vec::new()),
    }
}

fn load_readings(path: &PathBuf, source: &InMemoryMetricSource) -> Result<()> {
    let readings: HashMap<String, HashMap<String, Value>> =
        serde_json::from_str(&std::fs::read_to_string(path)?)?;
    for (device, metrics) in readings {
        for (metric, value) in metrics {
            source.set(&device, &metric, value);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if cli.once {
        config = config.with_refresh_interval(0);
    }
    init_logging(&config.log);

    let catalog = Arc::new(config.load_catalog()?);
    let agreements = load_agreements(cli.agreements.as_ref())?;
    info!("Loaded {} agreements", agreements.len());

    let source = Arc::new(InMemoryMetricSource::new());
    if let Some(path) = &cli.readings {
        load_readings(path, &source)?;
    }

    let (notifier, notifications) = Notifier::channel();
    let mut registry = CollectorRegistry::new();
    registry.register(Arc::new(PollingCollector::new(
        MEMORY_COLLECTOR,
        source,
        Arc::clone(&catalog),
        notifier,
        config.collector_poll_interval(),
    )))?;

    match &config.device_bindings {
        Some(path) => registry.apply_bindings(DeviceBindings::from_file(path)?),
        None => {
            // Every directly linked device is served from memory
            let mut system = MonitoringSystem::new(MEMORY_COLLECTOR, MEMORY_COLLECTOR);
            for metric in catalog.names() {
                system = system.with_metric(metric);
            }
            registry.add_system(system);

            let devices: BTreeSet<String> = agreements
                .iter()
                .flat_map(|a| a.links.iter())
                .filter_map(|link| match link {
                    LinkTarget::Device(device) => Some(device.to_string()),
                    LinkTarget::Agreement(_) => None,
                })
                .collect();
            for device in &devices {
                registry.bind_device(device, &[MEMORY_COLLECTOR]);
            }
        }
    }

    let engine = ReasoningEngine::new(
        config,
        catalog,
        Arc::new(InMemoryAgreementStore::with_agreements(agreements)),
        Arc::new(InMemoryPolicyStore::new()),
        Arc::new(InMemoryViolationStore::new()),
        Arc::new(registry),
        Arc::new(LogRemedySink::new()),
        notifications,
    );

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = stop.send(true);
            }
            Err(e) => warn!("Cannot listen for shutdown signal: {}", e),
        }
    });

    engine.run(shutdown).await?;
    if cli.once {
        engine.shutdown().await;
    }
    Ok(())
}
