//! Normalized report sent to the relay endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sensor::SelectedSensors;

/// Reporter label carried by every report.
pub const REPORTER: &str = "hue-sensor-agent";

/// Topic label carried by every report.
pub const TOPIC: &str = "sensors";

pub const TEMPERATURE_KEY: &str = "hue_temperature";
pub const PRESENCE_KEY: &str = "hue_presence";
pub const LIGHT_LEVEL_KEY: &str = "hue_lightlevel";

/// Content type of the serialized report.
pub const CONTENT_TYPE: &str = "application/json";

/// A snapshot of the selected sensors, every value string-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReport {
    pub reporter: String,
    pub topic: String,
    pub sensors: BTreeMap<String, String>,
}

impl SensorReport {
    /// Build the report for one cycle.
    pub fn from_selected(selected: &SelectedSensors) -> Self {
        let mut sensors = BTreeMap::new();
        sensors.insert(
            TEMPERATURE_KEY.to_string(),
            format_temperature(selected.temperature.state.temperature),
        );
        sensors.insert(
            PRESENCE_KEY.to_string(),
            selected.motion.state.presence.to_string(),
        );
        sensors.insert(
            LIGHT_LEVEL_KEY.to_string(),
            selected.light_level.state.light_level.to_string(),
        );

        Self {
            reporter: REPORTER.to_string(),
            topic: TOPIC.to_string(),
            sensors,
        }
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Hundredths of a degree as degrees with two fractional digits.
pub fn format_temperature(hundredths: i64) -> String {
    format!("{:.2}", hundredths as f64 / 100.0)
}
