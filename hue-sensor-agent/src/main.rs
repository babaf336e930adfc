//! Philips Hue sensor agent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use hue_sensor_agent::{
    AgentConfig, HttpServer, Poller, ReportRelay, SensorMetrics, init_tracing,
};

/// Polls a Philips Hue bridge and exports sensor readings.
#[derive(Parser, Debug)]
#[command(name = "hue-sensor-agent")]
#[command(about = "Export Philips Hue sensor readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = AgentConfig::resolve(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hue-sensor-agent");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create components
    let metrics = Arc::new(SensorMetrics::new());
    let relay = ReportRelay::new(&config, metrics.clone())?;
    let poller = Poller::new(config.clone(), metrics.clone(), relay)?;
    let listener = HttpServer::bind(config.listen_addr()).await?;
    let http_server = HttpServer::new(metrics.clone());

    // Start poller
    let poller_shutdown = shutdown_rx.clone();
    let poller_task = tokio::spawn(async move {
        poller.run(poller_shutdown).await;
    });

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let mut http_task =
        tokio::spawn(async move { http_server.serve(listener, http_shutdown).await });

    // Wait for a shutdown signal, or for the server to stop on its own
    let server_failure = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            None
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            None
        }
        result = &mut http_task => {
            let e = match result {
                Ok(Ok(())) => anyhow::anyhow!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => e.into(),
            };
            error!(error = %e, "HTTP server failed, shutting down");
            Some(e)
        }
    };

    // Signal shutdown; a task that already exited has dropped its receiver
    let _ = shutdown_tx.send(true);

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        if server_failure.is_none() {
            let _ = http_task.await;
        }
    })
    .await;

    info!(
        polls = metrics.polls(),
        relay_delivered = metrics.relay_delivered(),
        relay_dropped = metrics.relay_dropped(),
        "Final statistics"
    );

    if let Some(e) = server_failure {
        return Err(e);
    }

    info!("Agent stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
