//! Prometheus exporter for Cloudera Manager.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use cmsight_exporter_prometheus::{
    ExporterConfig, HttpServer, ModuleRegistry, QueryClient, ScrapeSettings,
};

/// Prometheus exporter for Cloudera Manager timeseries metrics.
#[derive(Parser, Debug)]
#[command(name = "cmsight-exporter-prometheus")]
#[command(about = "Export Cloudera Manager metrics to Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level or filter directive (overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    // CLI overrides
    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    cmsight_common::init_tracing(&config.logging)?;

    info!(
        endpoint = %config.connection.timeseries_endpoint(),
        "Starting Cloudera Manager Prometheus Exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = QueryClient::new(
        Arc::new(config.connection.clone()),
        config.scrape.request_timeout(),
    )?;
    let registry = Arc::new(ModuleRegistry::from_config(&config)?);

    for module in registry.modules() {
        info!(
            module = module.name(),
            version = module.version(),
            metrics = module.describe().len(),
            "Module registered"
        );
    }

    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let http_server = HttpServer::new(
        registry.clone(),
        Arc::new(client),
        ScrapeSettings {
            timeout: config.scrape.scrape_timeout(),
            scope: config.scrape.cluster.clone(),
        },
        listen_addr,
        config.prometheus.path.clone(),
    );

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for in-flight scrapes to drain
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    let stats = registry.stats();
    info!(
        scrapes = stats.scrapes,
        last_queries_succeeded = stats.last_queries_succeeded,
        last_queries_failed = stats.last_queries_failed,
        last_samples = stats.last_samples,
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Resolve when the process receives SIGTERM.
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
