use sqlx::PgExecutor;

use crate::domain::VehicleMeterMapping;

pub async fn mapping_for_vehicle<'e, E>(
    executor: E,
    vehicle_id: &str,
) -> sqlx::Result<Option<VehicleMeterMapping>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, VehicleMeterMapping>(
        r#"
        SELECT vehicle_id, meter_id, assigned_at
        FROM vehicle_meter_mapping
        WHERE vehicle_id = $1
        "#,
    )
    .bind(vehicle_id)
    .fetch_optional(executor)
    .await
}

/// Assign `meter_id` to `vehicle_id` unless the vehicle already has a meter.
///
/// Returns `true` when a new mapping was written.
pub async fn assign_meter<'e, E>(executor: E, vehicle_id: &str, meter_id: &str) -> sqlx::Result<bool>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO vehicle_meter_mapping (vehicle_id, meter_id)
        VALUES ($1, $2)
        ON CONFLICT (vehicle_id) DO NOTHING
        "#,
    )
    .bind(vehicle_id)
    .bind(meter_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}
