use serde::Serialize;
use time::OffsetDateTime;

/// A validated vehicle reading, ready to be written to both stores.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTelemetry {
    pub vehicle_id: String,
    pub state_of_charge: f64,
    pub dc_energy_delivered_kwh: f64,
    pub battery_temperature_c: f64,
    pub ts: OffsetDateTime,
}

/// Immutable row of `vehicle_telemetry_history`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VehicleReading {
    pub id: i64,
    pub vehicle_id: String,
    pub state_of_charge: f64,
    pub dc_energy_delivered_kwh: f64,
    pub battery_temperature_c: f64,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}
