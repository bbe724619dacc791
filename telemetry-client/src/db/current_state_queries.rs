use sqlx::PgExecutor;

use crate::domain::{MeterCurrentState, MeterTelemetry, VehicleCurrentState, VehicleTelemetry};

/// Insert or overwrite the hot row for a meter.
///
/// A reading older than the stored `last_update` leaves the row untouched, so the
/// hot row always mirrors the newest history row by reading time.
pub async fn upsert_meter_state<'e, E>(executor: E, r: &MeterTelemetry) -> sqlx::Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO meter_current_state (meter_id, ac_energy_consumed_kwh, voltage, last_update)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (meter_id)
        DO UPDATE SET
            ac_energy_consumed_kwh = EXCLUDED.ac_energy_consumed_kwh,
            voltage                = EXCLUDED.voltage,
            last_update            = EXCLUDED.last_update
        WHERE meter_current_state.last_update <= EXCLUDED.last_update
        "#,
    )
    .bind(&r.meter_id)
    .bind(r.ac_energy_consumed_kwh)
    .bind(r.voltage)
    .bind(r.ts)
    .execute(executor)
    .await
    .map(|_| ())
}

/// Insert or overwrite the hot row for a vehicle. Same ordering rule as meters.
pub async fn upsert_vehicle_state<'e, E>(executor: E, r: &VehicleTelemetry) -> sqlx::Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO vehicle_current_state
            (vehicle_id, state_of_charge, dc_energy_delivered_kwh, battery_temperature_c, last_update)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (vehicle_id)
        DO UPDATE SET
            state_of_charge         = EXCLUDED.state_of_charge,
            dc_energy_delivered_kwh = EXCLUDED.dc_energy_delivered_kwh,
            battery_temperature_c   = EXCLUDED.battery_temperature_c,
            last_update             = EXCLUDED.last_update
        WHERE vehicle_current_state.last_update <= EXCLUDED.last_update
        "#,
    )
    .bind(&r.vehicle_id)
    .bind(r.state_of_charge)
    .bind(r.dc_energy_delivered_kwh)
    .bind(r.battery_temperature_c)
    .bind(r.ts)
    .execute(executor)
    .await
    .map(|_| ())
}

pub async fn meter_state<'e, E>(executor: E, meter_id: &str) -> sqlx::Result<Option<MeterCurrentState>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, MeterCurrentState>(
        r#"
        SELECT meter_id, ac_energy_consumed_kwh, voltage, last_update
        FROM meter_current_state
        WHERE meter_id = $1
        "#,
    )
    .bind(meter_id)
    .fetch_optional(executor)
    .await
}

pub async fn vehicle_state<'e, E>(
    executor: E,
    vehicle_id: &str,
) -> sqlx::Result<Option<VehicleCurrentState>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, VehicleCurrentState>(
        r#"
        SELECT vehicle_id, state_of_charge, dc_energy_delivered_kwh, battery_temperature_c, last_update
        FROM vehicle_current_state
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .fetch_optional(executor)
    .await
}

/// All meters, most recently active first.
pub async fn meter_states<'e, E>(executor: E) -> sqlx::Result<Vec<MeterCurrentState>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, MeterCurrentState>(
        r#"
        SELECT meter_id, ac_energy_consumed_kwh, voltage, last_update
        FROM meter_current_state
        ORDER BY last_update DESC, meter_id
        "#,
    )
    .fetch_all(executor)
    .await
}

/// All vehicles, most recently active first.
pub async fn vehicle_states<'e, E>(executor: E) -> sqlx::Result<Vec<VehicleCurrentState>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, VehicleCurrentState>(
        r#"
        SELECT vehicle_id, state_of_charge, dc_energy_delivered_kwh, battery_temperature_c, last_update
        FROM vehicle_current_state
        ORDER BY last_update DESC, vehicle_id
        "#,
    )
    .fetch_all(executor)
    .await
}

/// Ids of every vehicle that has ever reported, in id order.
pub async fn vehicle_ids<'e, E>(executor: E) -> sqlx::Result<Vec<String>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT vehicle_id FROM vehicle_current_state ORDER BY vehicle_id")
        .fetch_all(executor)
        .await
}
