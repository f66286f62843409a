//! Imperium controller binary.
//!
//! Wires the intent pipeline together: registry discovery, the traffic
//! control and MQTT enforcers, the metrics collector/exporter and the
//! intent API, then serves until interrupted.

mod api;
mod config;
mod dispatcher;
mod intents;

use anyhow::Result;
use api::AppState;
use clap::Parser;
use config::ControllerConfig;
use dispatcher::PolicyDispatcher;
use imperium_device::DeviceEnforcer;
use imperium_intent::{IntentParser, PolicyEngine};
use imperium_monitoring::{ControllerMetrics, MetricsCollector, MetricsExporter};
use imperium_network::NetworkEnforcer;
use intents::IntentLog;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "imperium-controller", about = "Intent-based IoT fleet controller")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Primary egress interface (overrides config)
    #[arg(long)]
    interface: Option<String>,

    /// MQTT broker host (overrides config)
    #[arg(long)]
    broker_host: Option<String>,

    /// MQTT broker port (overrides config)
    #[arg(long)]
    broker_port: Option<u16>,

    /// Skip container discovery of simulator nodes
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imperium=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ControllerConfig::load(cli.config.as_deref())?;
    if let Some(interface) = cli.interface {
        config.interface = interface;
    }
    if let Some(host) = cli.broker_host {
        config.mqtt.host = host;
    }
    if let Some(port) = cli.broker_port {
        config.mqtt.port = port;
    }

    info!("Starting Imperium controller v{}", env!("CARGO_PKG_VERSION"));

    // Device registry: static seed plus simulator containers, then frozen.
    let mut registry = config.registry();
    if !cli.no_discovery {
        registry.discover_sim_nodes(&config.container_network).await;
    }
    let registry = Arc::new(registry);
    info!(
        devices = registry.device_ids().count(),
        interfaces = ?registry.interfaces(),
        "device registry ready"
    );

    let metrics = Arc::new(ControllerMetrics::new()?);
    metrics.seed_defaults(registry.device_ids().map(String::as_str));

    let network = Arc::new(NetworkEnforcer::new(registry.clone()).await);

    let (device, mqtt_task) =
        DeviceEnforcer::connect(&config.mqtt.host, config.mqtt.port, metrics.clone());

    let intents = Arc::new(IntentLog::new());
    let dispatcher = Arc::new(PolicyDispatcher::new(
        network.clone(),
        device.clone(),
        metrics.clone(),
    ));

    let collector = Arc::new(MetricsCollector::new(
        network.clone(),
        metrics.clone(),
        Some(intents.clone()),
        Duration::from_secs(config.poll_interval_secs),
    ));
    let collector_task = collector.spawn();

    let exporter_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let exporter = MetricsExporter::new(metrics.clone(), exporter_addr);
    let exporter_task = tokio::spawn(async move {
        if let Err(e) = exporter.serve().await {
            error!(error = %e, "metrics exporter stopped");
        }
    });

    let state = AppState {
        parser: Arc::new(IntentParser::new()),
        engine: Arc::new(PolicyEngine::new()),
        dispatcher,
        intents,
        network: network.clone(),
        device: device.clone(),
    };
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("intent API listening on http://{}", api_addr);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    axum::serve(listener, api::router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Shut down the background planes; tc state stays in the kernel until
    // cleared explicitly.
    device.disconnect().await;
    mqtt_task.abort();
    collector_task.abort();
    exporter_task.abort();
    info!("controller stopped");
    Ok(())
}
