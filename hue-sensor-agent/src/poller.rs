//! Hub polling loop.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, SchedulePolicy};
use crate::error::Result;
use crate::metrics::{PollStage, SharedMetrics};
use crate::relay::{RelayOutcome, ReportRelay};
use crate::sensor::{SelectedSensors, SensorRole, decode_sensors};

/// Computes the wait between two cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
    policy: SchedulePolicy,
}

impl Schedule {
    pub fn new(interval: Duration, policy: SchedulePolicy) -> Self {
        Self { interval, policy }
    }

    /// How long to wait after a cycle that took `cycle`.
    pub fn wait_after(&self, cycle: Duration) -> Duration {
        match self.policy {
            SchedulePolicy::FixedDelay => self.interval,
            SchedulePolicy::FixedRate => self.interval.saturating_sub(cycle),
        }
    }
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The hub could not be reached; gauges were left untouched.
    FetchFailed,
    /// Gauges were updated and the relay was invoked.
    Published {
        /// False when the response had to be read or decoded with defaults.
        clean: bool,
        /// Configured sensors absent from the response.
        missing: Vec<SensorRole>,
        relay: RelayOutcome,
    },
}

/// Polls the hub and publishes the configured sensors.
pub struct Poller {
    config: AgentConfig,
    client: reqwest::Client,
    metrics: SharedMetrics,
    relay: ReportRelay,
    schedule: Schedule,
}

impl Poller {
    /// Create a new poller.
    pub fn new(config: AgentConfig, metrics: SharedMetrics, relay: ReportRelay) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.poll.hub_timeout())
            .build()?;
        let schedule = Schedule::new(config.poll.interval(), config.poll.schedule);

        Ok(Self {
            config,
            client,
            metrics,
            relay,
            schedule,
        })
    }

    /// Run the polling loop until the shutdown signal is received.
    ///
    /// Shutdown is only observed between cycles; a cycle in progress always
    /// completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.config.hue_url.is_empty() {
            info!("Philips Hue URL not set, polling disabled");
            return;
        }

        info!(
            hub = %self.config.hue_url,
            interval_secs = self.config.poll.interval_secs,
            schedule = ?self.config.poll.schedule,
            relay = self.relay.is_enabled(),
            "Starting sensor poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let outcome = self.poll_once().await;
            debug!(?outcome, elapsed_ms = started.elapsed().as_millis() as u64, "Cycle finished");

            let wait = self.schedule.wait_after(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Sensor poller stopped");
    }

    /// Perform a single fetch, decode, select, publish and relay cycle.
    pub async fn poll_once(&self) -> CycleOutcome {
        let url = self.sensors_url();

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %url, error = %e, "Failed to get sensor data");
                self.metrics.record_poll_error(PollStage::Fetch);
                return CycleOutcome::FetchFailed;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, %status, "Hub answered with an error status");
        }

        let mut clean = true;
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(e) => {
                error!(url = %url, error = %e, "Failed to read sensor response");
                self.metrics.record_poll_error(PollStage::Read);
                clean = false;
                Vec::new()
            }
        };

        let decoded = decode_sensors(&body);
        if !decoded.is_clean() {
            warn!(
                issues = decoded.issues.len(),
                first = %decoded.issues[0],
                "Sensor response decoded with defaults"
            );
            self.metrics.record_poll_error(PollStage::Decode);
            clean = false;
        }

        let (selected, missing) = SelectedSensors::select(&decoded, &self.config);
        for role in &missing {
            debug!(
                role = role.as_str(),
                id = self.config.sensor_id(*role),
                "Configured sensor missing from hub response"
            );
            self.metrics.record_missing(*role);
        }

        self.metrics.publish(&selected);
        self.metrics.record_poll(clean);

        let relay = self.relay.send(&selected).await;

        CycleOutcome::Published {
            clean,
            missing,
            relay,
        }
    }

    fn sensors_url(&self) -> String {
        format!("{}/sensors", self.config.hue_url.trim_end_matches('/'))
    }
}

/// Resolve once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
