//! Philips Hue sensor agent.
//!
//! Polls a Hue bridge for sensor state, exposes temperature, presence and
//! light level as Prometheus gauges, and optionally relays a normalized
//! report to a downstream endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Hue bridge    │────>│     Poller      │────>│   HTTP Server   │
//! │   (/sensors)    │     │  (every cycle)  │     │   (/metrics)    │
//! └─────────────────┘     └────────┬────────┘     └─────────────────┘
//!                                  │
//!                                  v
//!                         ┌─────────────────┐
//!                         │  Report Relay   │
//!                         │  (POST report)  │
//!                         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! hue-sensor-agent --config config.json
//! ```
//!
//! # Configuration
//!
//! See [`config::AgentConfig`] for configuration options and the environment
//! variables that override them.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod poller;
pub mod relay;
pub mod report;
pub mod sensor;

pub use config::{AgentConfig, LogFormat, LoggingConfig, SchedulePolicy};
pub use error::{Error, Result};
pub use http::HttpServer;
pub use metrics::{SensorMetrics, SharedMetrics};
pub use poller::{CycleOutcome, Poller};
pub use relay::{RelayOutcome, ReportRelay};
pub use report::SensorReport;
pub use sensor::{SelectedSensors, Sensor, SensorRole, SensorState};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Tracing(e.to_string()))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Tracing(e.to_string()))?;
        }
    }

    Ok(())
}
