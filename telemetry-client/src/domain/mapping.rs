use serde::Serialize;
use time::OffsetDateTime;

/// Static association of a vehicle with the meter that charges it.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VehicleMeterMapping {
    pub vehicle_id: String,
    pub meter_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
}
