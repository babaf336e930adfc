//! Hub sensor model and lenient decoding of the `/sensors` response.
//!
//! The hub reports its inventory as a JSON object keyed by sensor id. Decoding
//! never fails outright: anything that cannot be read becomes the zero value
//! for that field and is recorded as an issue, so a single odd device (or a
//! hub error document) still yields a usable, if empty, reading.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::AgentConfig;

/// State reported by a single hub sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorState {
    /// Hundredths of a degree Celsius.
    pub temperature: i64,
    pub status: i64,
    pub last_updated: String,
    pub presence: bool,
    /// Hub-native light level units.
    pub light_level: i64,
}

/// A single hub-reported device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sensor {
    pub name: String,
    pub state: SensorState,
}

impl Sensor {
    /// Presence as a gauge value.
    pub fn presence_value(&self) -> f64 {
        if self.state.presence { 1.0 } else { 0.0 }
    }
}

/// The configured purpose of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorRole {
    Motion,
    LightLevel,
    Temperature,
}

impl SensorRole {
    pub const ALL: [SensorRole; 3] = [
        SensorRole::Motion,
        SensorRole::LightLevel,
        SensorRole::Temperature,
    ];

    /// Get the string representation for labels and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorRole::Motion => "motion",
            SensorRole::LightLevel => "light_level",
            SensorRole::Temperature => "temperature",
        }
    }
}

/// Result of decoding a hub response.
#[derive(Debug, Clone, Default)]
pub struct DecodedSensors {
    /// Sensors by hub id.
    pub sensors: HashMap<String, Sensor>,
    /// Everything that had to be replaced by a zero value.
    pub issues: Vec<String>,
}

impl DecodedSensors {
    /// True when nothing had to be defaulted.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// The three sensors chosen for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedSensors {
    pub motion: Sensor,
    pub light_level: Sensor,
    pub temperature: Sensor,
}

impl SelectedSensors {
    /// Pick the configured sensors out of a decoded response.
    ///
    /// Ids absent from the response select the zero sensor; their roles are
    /// returned so the caller can account for them.
    pub fn select(decoded: &DecodedSensors, config: &AgentConfig) -> (Self, Vec<SensorRole>) {
        let mut missing = Vec::new();
        let mut pick = |role: SensorRole| match decoded.sensors.get(config.sensor_id(role)) {
            Some(sensor) => sensor.clone(),
            None => {
                missing.push(role);
                Sensor::default()
            }
        };

        let selected = Self {
            motion: pick(SensorRole::Motion),
            light_level: pick(SensorRole::LightLevel),
            temperature: pick(SensorRole::Temperature),
        };

        (selected, missing)
    }
}

/// Decode a `/sensors` response body.
pub fn decode_sensors(body: &[u8]) -> DecodedSensors {
    let mut decoded = DecodedSensors::default();

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            decoded.issues.push(format!("invalid JSON: {}", e));
            return decoded;
        }
    };

    let entries = match value {
        Value::Object(entries) => entries,
        // A null document is an empty sensor list
        Value::Null => return decoded,
        other => {
            decoded.issues.push(format!(
                "expected an object of sensors, got {}",
                type_name(&other)
            ));
            return decoded;
        }
    };

    for (id, entry) in entries {
        let sensor = FieldReader::new(&id, &mut decoded.issues).sensor(&entry);
        decoded.sensors.insert(id, sensor);
    }

    decoded
}

/// Reads typed fields, recording an issue for each mismatch.
struct FieldReader<'a> {
    id: &'a str,
    issues: &'a mut Vec<String>,
}

impl<'a> FieldReader<'a> {
    fn new(id: &'a str, issues: &'a mut Vec<String>) -> Self {
        Self { id, issues }
    }

    fn sensor(&mut self, value: &Value) -> Sensor {
        let Some(obj) = self.object("", value) else {
            return Sensor::default();
        };

        let state = match lookup(obj, "State") {
            Some(state) => match self.object("State", state) {
                Some(state) => self.state(state),
                None => SensorState::default(),
            },
            None => SensorState::default(),
        };

        Sensor {
            name: self.string(obj, "Name"),
            state,
        }
    }

    fn state(&mut self, obj: &Map<String, Value>) -> SensorState {
        SensorState {
            temperature: self.int(obj, "Temperature"),
            status: self.int(obj, "Status"),
            last_updated: self.string(obj, "LastUpdated"),
            presence: self.boolean(obj, "Presence"),
            light_level: self.int(obj, "LightLevel"),
        }
    }

    fn object<'v>(&mut self, field: &str, value: &'v Value) -> Option<&'v Map<String, Value>> {
        match value {
            Value::Object(obj) => Some(obj),
            Value::Null => None,
            other => {
                self.mismatch(field, "an object", other);
                None
            }
        }
    }

    fn int(&mut self, obj: &Map<String, Value>, field: &str) -> i64 {
        match lookup(obj, field) {
            None | Some(Value::Null) => 0,
            Some(value) => match value.as_i64() {
                Some(n) => n,
                None => {
                    self.mismatch(field, "an integer", value);
                    0
                }
            },
        }
    }

    fn boolean(&mut self, obj: &Map<String, Value>, field: &str) -> bool {
        match lookup(obj, field) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(value) => {
                self.mismatch(field, "a boolean", value);
                false
            }
        }
    }

    fn string(&mut self, obj: &Map<String, Value>, field: &str) -> String {
        match lookup(obj, field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(value) => {
                self.mismatch(field, "a string", value);
                String::new()
            }
        }
    }

    fn mismatch(&mut self, field: &str, expected: &str, got: &Value) {
        let location = if field.is_empty() {
            format!("sensor {}", self.id)
        } else {
            format!("sensor {} field {}", self.id, field)
        };
        self.issues.push(format!(
            "{}: expected {}, got {}",
            location,
            expected,
            type_name(got)
        ));
    }
}

/// Field lookup preferring an exact key, then a case-insensitive one.
///
/// The hub itself emits lowercase keys (`lightlevel`, `lastupdated`).
fn lookup<'v>(obj: &'v Map<String, Value>, field: &str) -> Option<&'v Value> {
    obj.get(field).or_else(|| {
        obj.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_ids(motion: &str, light: &str, temperature: &str) -> AgentConfig {
        AgentConfig {
            motion_sensor_id: motion.to_string(),
            light_level_sensor_id: light.to_string(),
            temperature_sensor_id: temperature.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_documented_shape() {
        let body = br#"{"1": {"Name": "Hall", "State": {"Temperature": 2137, "Presence": true, "LightLevel": 500}}}"#;
        let decoded = decode_sensors(body);

        assert!(decoded.is_clean());
        let sensor = &decoded.sensors["1"];
        assert_eq!(sensor.name, "Hall");
        assert_eq!(sensor.state.temperature, 2137);
        assert!(sensor.state.presence);
        assert_eq!(sensor.state.light_level, 500);
    }

    #[test]
    fn test_decode_hub_lowercase_keys() {
        let body = br#"{
            "4": {
                "name": "Hue temperature sensor 1",
                "type": "ZLLTemperature",
                "state": {"temperature": 1987, "lastupdated": "2024-01-01T10:00:00"},
                "config": {"on": true, "battery": 100}
            },
            "5": {
                "name": "Hue motion sensor 1",
                "state": {"presence": true, "lastupdated": "2024-01-01T10:00:01"}
            },
            "6": {
                "name": "Hue ambient light sensor 1",
                "state": {"lightlevel": 14500, "dark": false, "daylight": true}
            }
        }"#;
        let decoded = decode_sensors(body);

        assert!(decoded.is_clean(), "issues: {:?}", decoded.issues);
        assert_eq!(decoded.sensors["4"].state.temperature, 1987);
        assert_eq!(decoded.sensors["4"].state.last_updated, "2024-01-01T10:00:00");
        assert!(decoded.sensors["5"].state.presence);
        assert_eq!(decoded.sensors["6"].state.light_level, 14500);
    }

    #[test]
    fn test_malformed_field_zeroes_only_that_field() {
        let body = br#"{"1": {"State": {"Temperature": "warm", "Presence": true, "LightLevel": 12.5}}}"#;
        let decoded = decode_sensors(body);

        assert_eq!(decoded.issues.len(), 2);
        let state = &decoded.sensors["1"].state;
        assert_eq!(state.temperature, 0);
        assert!(state.presence);
        assert_eq!(state.light_level, 0);
    }

    #[test]
    fn test_non_object_document() {
        // The hub answers errors with an array.
        let body = br#"[{"error": {"type": 1, "description": "unauthorized user"}}]"#;
        let decoded = decode_sensors(body);

        assert!(decoded.sensors.is_empty());
        assert!(decoded.issues[0].contains("array"));
    }

    #[test]
    fn test_invalid_json() {
        let decoded = decode_sensors(b"");
        assert!(decoded.sensors.is_empty());
        assert!(!decoded.is_clean());
    }

    #[test]
    fn test_null_document_is_empty() {
        let decoded = decode_sensors(b"null");

        assert!(decoded.sensors.is_empty());
        assert!(decoded.is_clean());
    }

    #[test]
    fn test_null_fields_are_not_issues() {
        let body = br#"{"1": {"Name": null, "State": {"Temperature": null}}, "2": null}"#;
        let decoded = decode_sensors(body);

        assert!(decoded.is_clean());
        assert_eq!(decoded.sensors["1"], Sensor::default());
        assert_eq!(decoded.sensors["2"], Sensor::default());
    }

    #[test]
    fn test_select_present_sensors() {
        let decoded = decode_sensors(
            br#"{"1": {"State": {"Presence": true}}, "2": {"State": {"LightLevel": 10}}, "3": {"State": {"Temperature": 2000}}}"#,
        );
        let (selected, missing) = SelectedSensors::select(&decoded, &config_with_ids("1", "2", "3"));

        assert!(missing.is_empty());
        assert_eq!(selected.motion.presence_value(), 1.0);
        assert_eq!(selected.light_level.state.light_level, 10);
        assert_eq!(selected.temperature.state.temperature, 2000);
    }

    #[test]
    fn test_select_missing_sensor_is_zero() {
        let decoded = decode_sensors(br#"{"3": {"State": {"Temperature": 2000}}}"#);
        let (selected, missing) = SelectedSensors::select(&decoded, &config_with_ids("1", "2", "3"));

        assert_eq!(missing, vec![SensorRole::Motion, SensorRole::LightLevel]);
        assert_eq!(selected.motion, Sensor::default());
        assert_eq!(selected.motion.presence_value(), 0.0);
        assert_eq!(selected.temperature.state.temperature, 2000);
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(SensorRole::Motion.as_str(), "motion");
        assert_eq!(SensorRole::LightLevel.as_str(), "light_level");
        assert_eq!(SensorRole::Temperature.as_str(), "temperature");
    }
}
