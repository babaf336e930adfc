//! Prometheus metrics published by the agent.
//!
//! The three sensor gauges carry the latest reading. The remaining metrics
//! make it possible to tell a genuine zero reading apart from "no data": a
//! failed or degraded poll shows up in `sensor_up`, the error counters and
//! the last-success timestamp, while the gauges keep their values.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::warn;

use crate::sensor::{SelectedSensors, SensorRole};

/// Content type of [`SensorMetrics::render`] output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Where in a cycle a poll went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStage {
    /// The hub request failed or timed out.
    Fetch,
    /// The response body could not be read.
    Read,
    /// The body was read but had to be decoded with defaults.
    Decode,
}

impl PollStage {
    pub const ALL: [PollStage; 3] = [PollStage::Fetch, PollStage::Read, PollStage::Decode];

    /// Get the string representation for labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStage::Fetch => "fetch",
            PollStage::Read => "read",
            PollStage::Decode => "decode",
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StageLabels {
    stage: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RoleLabels {
    role: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: String,
}

const DELIVERED: &str = "delivered";
const DROPPED: &str = "dropped";

/// Metric registry and handles, shared between the poller and the exposition
/// endpoint.
pub struct SensorMetrics {
    registry: Registry,
    temperature: Gauge<f64, AtomicU64>,
    presence: Gauge<f64, AtomicU64>,
    light_level: Gauge<f64, AtomicU64>,
    up: Gauge,
    last_success: Gauge,
    polls: Counter,
    poll_errors: Family<StageLabels, Counter>,
    missing: Family<RoleLabels, Counter>,
    relay_reports: Family<OutcomeLabels, Counter>,
    relay_retries: Counter,
}

/// Shareable metrics handle.
pub type SharedMetrics = Arc<SensorMetrics>;

impl SensorMetrics {
    /// Create and register all metrics.
    pub fn new() -> Self {
        let metrics = Self {
            registry: Registry::default(),
            temperature: Gauge::default(),
            presence: Gauge::default(),
            light_level: Gauge::default(),
            up: Gauge::default(),
            last_success: Gauge::default(),
            polls: Counter::default(),
            poll_errors: Family::default(),
            missing: Family::default(),
            relay_reports: Family::default(),
            relay_retries: Counter::default(),
        };
        metrics.register()
    }

    fn register(mut self) -> Self {
        let registry = &mut self.registry;

        registry.register("sensor_temperature", "Temperature", self.temperature.clone());
        registry.register("sensor_presence", "Motion Detector", self.presence.clone());
        registry.register("sensor_light_level", "Light Level", self.light_level.clone());
        registry.register(
            "sensor_up",
            "Whether the last hub poll succeeded and decoded cleanly",
            self.up.clone(),
        );
        registry.register(
            "sensor_last_success_timestamp_seconds",
            "Unix time of the last successful hub poll",
            self.last_success.clone(),
        );
        registry.register("sensor_polls", "Completed hub polls", self.polls.clone());
        registry.register(
            "sensor_poll_errors",
            "Hub poll failures by stage",
            self.poll_errors.clone(),
        );
        registry.register(
            "sensor_missing",
            "Configured sensors absent from the hub response",
            self.missing.clone(),
        );
        registry.register(
            "sensor_relay_reports",
            "Relay reports by outcome",
            self.relay_reports.clone(),
        );
        registry.register(
            "sensor_relay_retries",
            "Relay attempts retried after the connection closed early",
            self.relay_retries.clone(),
        );

        // Expose every label value from the start so rates work before the
        // first failure.
        for stage in PollStage::ALL {
            let _ = self.poll_errors.get_or_create(&stage_labels(stage));
        }
        for role in SensorRole::ALL {
            let _ = self.missing.get_or_create(&role_labels(role));
        }
        for outcome in [DELIVERED, DROPPED] {
            let _ = self.relay_reports.get_or_create(&outcome_labels(outcome));
        }

        self
    }

    /// Overwrite the three sensor gauges.
    pub fn publish(&self, selected: &SelectedSensors) {
        self.temperature
            .set(selected.temperature.state.temperature as f64);
        self.presence.set(selected.motion.presence_value());
        self.light_level
            .set(selected.light_level.state.light_level as f64);
    }

    /// Record a cycle in which the hub answered.
    pub fn record_poll(&self, clean: bool) {
        self.polls.inc();
        self.up.set(i64::from(clean));
        self.last_success.set(chrono::Utc::now().timestamp());
    }

    /// Record a failed or degraded stage of a cycle.
    pub fn record_poll_error(&self, stage: PollStage) {
        self.poll_errors.get_or_create(&stage_labels(stage)).inc();
        if stage == PollStage::Fetch {
            self.up.set(0);
        }
    }

    /// Record a configured sensor missing from the hub response.
    pub fn record_missing(&self, role: SensorRole) {
        self.missing.get_or_create(&role_labels(role)).inc();
    }

    /// Record a delivered report.
    pub fn record_relay_delivered(&self) {
        self.relay_reports
            .get_or_create(&outcome_labels(DELIVERED))
            .inc();
    }

    /// Record a dropped report.
    pub fn record_relay_dropped(&self) {
        self.relay_reports
            .get_or_create(&outcome_labels(DROPPED))
            .inc();
    }

    /// Record a relay retry.
    pub fn record_relay_retry(&self) {
        self.relay_retries.inc();
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.get()
    }

    pub fn presence(&self) -> f64 {
        self.presence.get()
    }

    pub fn light_level(&self) -> f64 {
        self.light_level.get()
    }

    /// 1 if the last poll was clean, 0 otherwise.
    pub fn up(&self) -> i64 {
        self.up.get()
    }

    /// Number of cycles in which the hub answered.
    pub fn polls(&self) -> u64 {
        self.polls.get()
    }

    /// Unix time of the last cycle in which the hub answered, 0 before that.
    pub fn last_success(&self) -> i64 {
        self.last_success.get()
    }

    pub fn poll_errors(&self, stage: PollStage) -> u64 {
        self.poll_errors.get_or_create(&stage_labels(stage)).get()
    }

    pub fn missing(&self, role: SensorRole) -> u64 {
        self.missing.get_or_create(&role_labels(role)).get()
    }

    pub fn relay_delivered(&self) -> u64 {
        self.relay_reports
            .get_or_create(&outcome_labels(DELIVERED))
            .get()
    }

    pub fn relay_dropped(&self) -> u64 {
        self.relay_reports
            .get_or_create(&outcome_labels(DROPPED))
            .get()
    }

    pub fn relay_retries(&self) -> u64 {
        self.relay_retries.get()
    }

    /// Render all metrics in the OpenMetrics text format.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            warn!(error = %e, "Failed to encode metrics");
        }
        output
    }
}

impl Default for SensorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn stage_labels(stage: PollStage) -> StageLabels {
    StageLabels {
        stage: stage.as_str().to_string(),
    }
}

fn role_labels(role: SensorRole) -> RoleLabels {
    RoleLabels {
        role: role.as_str().to_string(),
    }
}

fn outcome_labels(outcome: &str) -> OutcomeLabels {
    OutcomeLabels {
        outcome: outcome.to_string(),
    }
}
