use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct SoilMoisture {
    pub raw: u16,
    pub normalized: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Temperature {
    pub temperature_c: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct AmbientClimate {
    pub temperature_c: f32,
    pub humidity: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Light {
    pub lux: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Battery {
    pub voltage: f32,
}

/// One sampling cycle's readings. `ok` is false if any single read failed;
/// the failed reading is left at its zero value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub soil_moisture: SoilMoisture,
    pub soil_temperature: Temperature,
    pub ambient: AmbientClimate,
    pub light: Light,
    pub battery: Battery,
    pub ok: bool,
    pub timestamp_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    pub soil_moisture: f32,
    #[serde(rename = "soilTempC")]
    pub soil_temp_c: f32,
    #[serde(rename = "ambientTempC")]
    pub ambient_temp_c: f32,
    pub ambient_humidity: f32,
    pub light_lux: f32,
    pub battery_voltage: f32,
}

/// Outbound wire payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub version: String,
    pub org: String,
    pub site: String,
    pub node: String,
    pub ts: u64,
    pub measurements: Measurements,
}

impl TelemetryRecord {
    pub fn from_snapshot(snapshot: &SensorSnapshot, config: &NodeConfig, version: &str) -> Self {
        Self {
            version: version.to_string(),
            org: config.org_id.clone(),
            site: config.site_id.clone(),
            node: config.node_id.clone(),
            ts: snapshot.timestamp_ms,
            measurements: Measurements {
                soil_moisture: snapshot.soil_moisture.normalized,
                soil_temp_c: snapshot.soil_temperature.temperature_c,
                ambient_temp_c: snapshot.ambient.temperature_c,
                ambient_humidity: snapshot.ambient.humidity,
                light_lux: snapshot.light.lux,
                battery_voltage: snapshot.battery.voltage,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
