use serde::Serialize;
use time::OffsetDateTime;

use super::{MeterTelemetry, VehicleTelemetry};

/// Latest reading for one meter (`meter_current_state`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MeterCurrentState {
    pub meter_id: String,
    pub ac_energy_consumed_kwh: f64,
    pub voltage: f64,
    /// Timestamp of the reading this row was taken from.
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

impl From<&MeterTelemetry> for MeterCurrentState {
    fn from(r: &MeterTelemetry) -> Self {
        MeterCurrentState {
            meter_id: r.meter_id.clone(),
            ac_energy_consumed_kwh: r.ac_energy_consumed_kwh,
            voltage: r.voltage,
            last_update: r.ts,
        }
    }
}

/// Latest reading for one vehicle (`vehicle_current_state`).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCurrentState {
    pub vehicle_id: String,
    pub state_of_charge: f64,
    pub dc_energy_delivered_kwh: f64,
    pub battery_temperature_c: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

impl From<&VehicleTelemetry> for VehicleCurrentState {
    fn from(r: &VehicleTelemetry) -> Self {
        VehicleCurrentState {
            vehicle_id: r.vehicle_id.clone(),
            state_of_charge: r.state_of_charge,
            dc_energy_delivered_kwh: r.dc_energy_delivered_kwh,
            battery_temperature_c: r.battery_temperature_c,
            last_update: r.ts,
        }
    }
}
