use sqlx::PgExecutor;
use time::OffsetDateTime;

use crate::domain::{
    MeterReading, MeterTelemetry, MeterWindowTotals, VehicleReading, VehicleTelemetry,
    VehicleWindowTotals,
};

/// Append one row to `meter_telemetry_history`.
pub async fn insert_meter_reading<'e, E>(executor: E, r: &MeterTelemetry) -> sqlx::Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO meter_telemetry_history (meter_id, ac_energy_consumed_kwh, voltage, ts)
        VALUES ($1, $2, $3, $4)
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

/// Append one row to `vehicle_telemetry_history`.
pub async fn insert_vehicle_reading<'e, E>(executor: E, r: &VehicleTelemetry) -> sqlx::Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO vehicle_telemetry_history
            (vehicle_id, state_of_charge, dc_energy_delivered_kwh, battery_temperature_c, ts)
        VALUES ($1, $2, $3, $4, $5)
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

/// Time-ordered meter history within `[start, end]`.
pub async fn meter_history<'e, E>(
    executor: E,
    meter_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> sqlx::Result<Vec<MeterReading>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, MeterReading>(
        r#"
        SELECT id, meter_id, ac_energy_consumed_kwh, voltage, ts, recorded_at
        FROM meter_telemetry_history
        WHERE meter_id = $1
          AND ts >= $2
          AND ts <= $3
        ORDER BY ts, id
        "#,
    )
    .bind(meter_id)
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await
}

/// Time-ordered vehicle history within `[start, end]`.
pub async fn vehicle_history<'e, E>(
    executor: E,
    vehicle_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> sqlx::Result<Vec<VehicleReading>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, VehicleReading>(
        r#"
        SELECT id, vehicle_id, state_of_charge, dc_energy_delivered_kwh,
               battery_temperature_c, ts, recorded_at
        FROM vehicle_telemetry_history
        WHERE vehicle_id = $1
          AND ts >= $2
          AND ts <= $3
        ORDER BY ts, id
        "#,
    )
    .bind(vehicle_id)
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await
}

/// Sum of AC energy drawn by a meter within `[start, end]`.
pub async fn meter_window_totals<'e, E>(
    executor: E,
    meter_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> sqlx::Result<MeterWindowTotals>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, MeterWindowTotals>(
        r#"
        SELECT
            COALESCE(SUM(ac_energy_consumed_kwh), 0)::DOUBLE PRECISION AS total_ac_kwh,
            COUNT(*)                                                   AS reading_count
        FROM meter_telemetry_history
        WHERE meter_id = $1
          AND ts >= $2
          AND ts <= $3
        "#,
    )
    .bind(meter_id)
    .bind(start)
    .bind(end)
    .fetch_one(executor)
    .await
}

/// DC energy, mean battery temperature and reading count for a vehicle within `[start, end]`.
pub async fn vehicle_window_totals<'e, E>(
    executor: E,
    vehicle_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> sqlx::Result<VehicleWindowTotals>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, VehicleWindowTotals>(
        r#"
        SELECT
            COALESCE(SUM(dc_energy_delivered_kwh), 0)::DOUBLE PRECISION AS total_dc_kwh,
            COALESCE(AVG(battery_temperature_c), 0)::DOUBLE PRECISION   AS avg_battery_temperature_c,
            COUNT(*)                                                    AS reading_count
        FROM vehicle_telemetry_history
        WHERE vehicle_id = $1
          AND ts >= $2
          AND ts <= $3
        "#,
    )
    .bind(vehicle_id)
    .bind(start)
    .bind(end)
    .fetch_one(executor)
    .await
}

pub async fn count_meter_history<'e, E>(executor: E, meter_id: &str) -> sqlx::Result<i64>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM meter_telemetry_history WHERE meter_id = $1")
        .bind(meter_id)
        .fetch_one(executor)
        .await
}

pub async fn count_vehicle_history<'e, E>(executor: E, vehicle_id: &str) -> sqlx::Result<i64>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM vehicle_telemetry_history WHERE vehicle_id = $1")
        .bind(vehicle_id)
        .fetch_one(executor)
        .await
}
