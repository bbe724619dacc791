/// AC aggregate for one meter over a closed time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, sqlx::FromRow)]
pub struct MeterWindowTotals {
    pub total_ac_kwh: f64,
    pub reading_count: i64,
}

/// DC aggregate for one vehicle over a closed time window.
///
/// `avg_battery_temperature_c` is `0.0` when `reading_count` is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, sqlx::FromRow)]
pub struct VehicleWindowTotals {
    pub total_dc_kwh: f64,
    pub avg_battery_temperature_c: f64,
    pub reading_count: i64,
}
