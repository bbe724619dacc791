use serde::{Deserialize, Serialize};
use telemetry_client::domain::{MeterTelemetry, VehicleTelemetry};
use time::{
    format_description::well_known::{Iso8601, Rfc3339},
    macros::datetime,
    Date, OffsetDateTime, PrimitiveDateTime,
};

use crate::error::{Result, TelemetryError};

pub const MAX_VOLTAGE: f64 = 500.0;
pub const MIN_BATTERY_TEMPERATURE_C: f64 = -40.0;
pub const MAX_BATTERY_TEMPERATURE_C: f64 = 80.0;

/// Meter reading as received from a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReadingInput {
    pub meter_id: String,
    #[serde(alias = "kwhConsumedAc")]
    pub ac_energy_consumed_kwh: f64,
    pub voltage: f64,
    pub timestamp: String,
}

/// Vehicle reading as received from a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleReadingInput {
    pub vehicle_id: String,
    #[serde(alias = "soc")]
    pub state_of_charge: f64,
    #[serde(alias = "kwhDeliveredDc")]
    pub dc_energy_delivered_kwh: f64,
    #[serde(alias = "batteryTemp")]
    pub battery_temperature_c: f64,
    pub timestamp: String,
}

/// Parse a reading timestamp and check it lies in [2000-01-01, 2100-01-01].
///
/// Accepts RFC 3339 and ISO 8601 date-times. Values without an offset, and
/// bare dates, are read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<OffsetDateTime> {
    let trimmed = raw.trim();
    let ts = OffsetDateTime::parse(trimmed, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(trimmed, &Iso8601::DEFAULT))
        .or_else(|_| PrimitiveDateTime::parse(trimmed, &Iso8601::DEFAULT).map(PrimitiveDateTime::assume_utc))
        .or_else(|_| Date::parse(trimmed, &Iso8601::DEFAULT).map(|d| d.midnight().assume_utc()))
        .map_err(|e| TelemetryError::Validation(format!("invalid timestamp '{raw}': {e}")))?;

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if ts < min_ts || ts > max_ts {
        return Err(TelemetryError::Validation(format!(
            "timestamp '{raw}' out of allowed range"
        )));
    }

    Ok(ts)
}

fn require_id(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TelemetryError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn require_energy(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(TelemetryError::Validation(format!("{field} must be non-negative")));
    }
    Ok(())
}

fn require_within(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    // NaN fails `contains`.
    if !(min..=max).contains(&value) {
        return Err(TelemetryError::Validation(format!(
            "{field} must be within [{min}, {max}], got {value}"
        )));
    }
    Ok(())
}

/// Validate a meter reading.
///
/// Rules:
/// - meterId must be non-empty (surrounding whitespace is dropped).
/// - acEnergyConsumedKwh must be non-negative.
/// - voltage must be within [0, 500].
/// - timestamp must be an ISO 8601 date-time within the sanity window of [`parse_timestamp`].
pub fn validate_meter_reading(input: &MeterReadingInput) -> Result<MeterTelemetry> {
    let meter_id = require_id("meterId", &input.meter_id)?;
    require_energy("acEnergyConsumedKwh", input.ac_energy_consumed_kwh)?;
    require_within("voltage", input.voltage, 0.0, MAX_VOLTAGE)?;
    let ts = parse_timestamp(&input.timestamp)?;

    Ok(MeterTelemetry {
        meter_id,
        ac_energy_consumed_kwh: input.ac_energy_consumed_kwh,
        voltage: input.voltage,
        ts,
    })
}

/// Validate a vehicle reading.
///
/// Rules:
/// - vehicleId must be non-empty.
/// - stateOfCharge must be within [0, 100].
/// - dcEnergyDeliveredKwh must be non-negative.
/// - batteryTemperatureC must be within [-40, 80].
/// - timestamp as for meters.
pub fn validate_vehicle_reading(input: &VehicleReadingInput) -> Result<VehicleTelemetry> {
    let vehicle_id = require_id("vehicleId", &input.vehicle_id)?;
    require_within("stateOfCharge", input.state_of_charge, 0.0, 100.0)?;
    require_energy("dcEnergyDeliveredKwh", input.dc_energy_delivered_kwh)?;
    require_within(
        "batteryTemperatureC",
        input.battery_temperature_c,
        MIN_BATTERY_TEMPERATURE_C,
        MAX_BATTERY_TEMPERATURE_C,
    )?;
    let ts = parse_timestamp(&input.timestamp)?;

    Ok(VehicleTelemetry {
        vehicle_id,
        state_of_charge: input.state_of_charge,
        dc_energy_delivered_kwh: input.dc_energy_delivered_kwh,
        battery_temperature_c: input.battery_temperature_c,
        ts,
    })
}

/// Validate every record before anything is written; the first bad record rejects the batch.
pub fn validate_batch<I, O>(
    inputs: &[I],
    validate: impl Fn(&I) -> Result<O>,
) -> Result<Vec<O>> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            validate(input).map_err(|e| match e {
                TelemetryError::Validation(msg) => {
                    TelemetryError::Validation(format!("record {index}: {msg}"))
                }
                other => other,
            })
        })
        .collect()
}
