use serde::Serialize;
use time::OffsetDateTime;

/// A validated smart-meter reading, ready to be written to both stores.
///
/// `ac_energy_consumed_kwh` is the energy drawn during the reading interval,
/// not a running total.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterTelemetry {
    pub meter_id: String,
    pub ac_energy_consumed_kwh: f64,
    pub voltage: f64,
    pub ts: OffsetDateTime,
}

/// Immutable row of `meter_telemetry_history`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    pub id: i64,
    pub meter_id: String,
    pub ac_energy_consumed_kwh: f64,
    pub voltage: f64,
    /// Reading time as reported by the device.
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    /// Receipt time assigned by the store.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}
