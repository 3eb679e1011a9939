//! Telemetry Record — normalized observation for one miner at one instant.
//!
//! Missing fields are permitted and propagate as `None`, never as zero;
//! zero is a legitimate reading (e.g. a dead fan) and must stay distinct
//! from "not reported this cycle".

use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

/// Raw, ephemeral telemetry for one miner, one cycle.
///
/// This is the internal, flat shape every other module in this crate
/// works with. On the wire (§6.1) records arrive nested —
/// `hashrate: {value, expected_ths}`, `temperature: {max, avg?}`,
/// `hardware: {boards_healthy, boards_total, fan_speeds[], model,
/// firmware}` — so `Deserialize` is implemented by hand via
/// [`WireTelemetryRecord`] rather than derived, keeping the nested
/// transport contract out of every consumer's way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub miner_id: String,
    pub site_id: i64,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub is_online: bool,
    pub hashrate_current: Option<f64>,
    pub hashrate_expected: Option<f64>,
    pub boards_healthy: Option<i32>,
    pub boards_total: Option<i32>,
    pub temperature_max: Option<f64>,
    pub fan_speeds: Vec<i32>,
    pub power_draw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireHashrate {
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    expected_ths: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireTemperature {
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    #[allow(dead_code)]
    avg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireHardware {
    #[serde(default)]
    boards_healthy: Option<i32>,
    #[serde(default)]
    boards_total: Option<i32>,
    #[serde(default)]
    fan_speeds: Vec<i32>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    firmware: Option<String>,
}

/// The §6.1 wire contract: what a telemetry-producing agent actually sends.
#[derive(Debug, Deserialize)]
struct WireTelemetryRecord {
    miner_id: String,
    site_id: i64,
    online: bool,
    #[serde(default)]
    hashrate: Option<WireHashrate>,
    #[serde(default)]
    temperature: Option<WireTemperature>,
    #[serde(default)]
    hardware: Option<WireHardware>,
    #[serde(default)]
    power: Option<f64>,
}

impl From<WireTelemetryRecord> for TelemetryRecord {
    fn from(wire: WireTelemetryRecord) -> Self {
        let (hashrate_current, hashrate_expected) = match wire.hashrate {
            Some(h) => (h.value, h.expected_ths),
            None => (None, None),
        };
        let temperature_max = wire.temperature.and_then(|t| t.max);
        let (boards_healthy, boards_total, fan_speeds, model, firmware) = match wire.hardware {
            Some(h) => (h.boards_healthy, h.boards_total, h.fan_speeds, h.model, h.firmware),
            None => (None, None, Vec::new(), None, None),
        };

        TelemetryRecord {
            miner_id: wire.miner_id,
            site_id: wire.site_id,
            model,
            firmware,
            is_online: wire.online,
            hashrate_current,
            hashrate_expected,
            boards_healthy,
            boards_total,
            temperature_max,
            fan_speeds,
            power_draw: wire.power,
        }
    }
}

impl<'de> Deserialize<'de> for TelemetryRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        WireTelemetryRecord::deserialize(deserializer).map(TelemetryRecord::from)
    }
}

impl TelemetryRecord {
    /// Validate the record has the identity fields every downstream
    /// component relies on. Anything else missing is tolerated.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.miner_id.trim().is_empty() {
            return Err(TelemetryError::MissingMinerId);
        }
        Ok(())
    }

    /// `model`/`firmware` normalized for peer-group keying: unknown values
    /// collapse to the literal string `"unknown"` so group keys stay
    /// well-formed even for unidentified hardware.
    pub fn model_or_unknown(&self) -> &str {
        self.model.as_deref().unwrap_or("unknown")
    }

    pub fn firmware_or_unknown(&self) -> &str {
        self.firmware.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_nested_wire_shape() {
        let json = r#"{
            "miner_id": "m-1",
            "site_id": 7,
            "online": true,
            "hashrate": {"value": 92.5, "expected_ths": 100.0},
            "temperature": {"max": 78.2, "avg": 70.1},
            "hardware": {"boards_healthy": 3, "boards_total": 3, "fan_speeds": [4200, 4300], "model": "S19", "firmware": "1.2.3"},
            "power": 3200.0
        }"#;

        let record: TelemetryRecord = serde_json::from_str(json).expect("valid wire record");
        assert_eq!(record.miner_id, "m-1");
        assert_eq!(record.site_id, 7);
        assert!(record.is_online);
        assert_eq!(record.hashrate_current, Some(92.5));
        assert_eq!(record.hashrate_expected, Some(100.0));
        assert_eq!(record.temperature_max, Some(78.2));
        assert_eq!(record.boards_healthy, Some(3));
        assert_eq!(record.boards_total, Some(3));
        assert_eq!(record.fan_speeds, vec![4200, 4300]);
        assert_eq!(record.model.as_deref(), Some("S19"));
        assert_eq!(record.firmware.as_deref(), Some("1.2.3"));
        assert_eq!(record.power_draw, Some(3200.0));
    }

    #[test]
    fn missing_nested_blocks_propagate_as_none_not_zero() {
        let json = r#"{"miner_id": "m-2", "site_id": 1, "online": false}"#;
        let record: TelemetryRecord = serde_json::from_str(json).expect("valid wire record");
        assert_eq!(record.hashrate_current, None);
        assert_eq!(record.hashrate_expected, None);
        assert_eq!(record.temperature_max, None);
        assert_eq!(record.boards_healthy, None);
        assert!(record.fan_speeds.is_empty());
        assert_eq!(record.power_draw, None);
    }

    #[test]
    fn rejects_blank_miner_id() {
        let record = TelemetryRecord {
            miner_id: "  ".to_string(),
            site_id: 1,
            model: None,
            firmware: None,
            is_online: true,
            hashrate_current: None,
            hashrate_expected: None,
            boards_healthy: None,
            boards_total: None,
            temperature_max: None,
            fan_speeds: Vec::new(),
            power_draw: None,
        };
        assert!(record.validate().is_err());
    }
}
