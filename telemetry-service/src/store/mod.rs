use std::sync::Arc;

use telemetry_client::domain::{
    MeterCurrentState, MeterReading, MeterTelemetry, MeterWindowTotals, VehicleCurrentState,
    VehicleMeterMapping, VehicleReading, VehicleTelemetry, VehicleWindowTotals,
};
use time::OffsetDateTime;

use crate::config::{DatabaseConfig, StorageBackend};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTelemetryStore;
pub use postgres::PgTelemetryStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the hot (current-state) and cold (history) tables and the
/// vehicle-to-meter association.
///
/// `record_meter` and `record_vehicle` are the only writers of telemetry. Each one
/// upserts the hot row and appends the history row as a single atomic unit: either
/// both are visible to readers or neither is. The hot row only moves forward in
/// reading time; an older reading is appended to history and otherwise ignored.
///
/// Window queries use the closed interval `[start, end]` on reading time.
#[async_trait::async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn record_meter(&self, reading: &MeterTelemetry) -> Result<(), StoreError>;
    async fn record_vehicle(&self, reading: &VehicleTelemetry) -> Result<(), StoreError>;

    async fn meter_state(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, StoreError>;
    async fn vehicle_state(&self, vehicle_id: &str) -> Result<Option<VehicleCurrentState>, StoreError>;
    /// Ordered by `last_update` descending.
    async fn meter_states(&self) -> Result<Vec<MeterCurrentState>, StoreError>;
    /// Ordered by `last_update` descending.
    async fn vehicle_states(&self) -> Result<Vec<VehicleCurrentState>, StoreError>;
    /// Every vehicle with a current-state row, ordered by id.
    async fn vehicle_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn mapping_for_vehicle(&self, vehicle_id: &str) -> Result<Option<VehicleMeterMapping>, StoreError>;
    /// Insert-if-absent. Returns `false` when the vehicle already had a meter.
    async fn assign_meter(&self, vehicle_id: &str, meter_id: &str) -> Result<bool, StoreError>;

    async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterReading>, StoreError>;
    async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleReading>, StoreError>;
    async fn meter_window(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindowTotals, StoreError>;
    async fn vehicle_window(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<VehicleWindowTotals, StoreError>;

    async fn count_meter_history(&self, meter_id: &str) -> Result<u64, StoreError>;
    async fn count_vehicle_history(&self, vehicle_id: &str) -> Result<u64, StoreError>;
}

/// Open the backend selected in the configuration.
pub async fn open(cfg: &DatabaseConfig) -> Result<Arc<dyn TelemetryStore>, StoreError> {
    match cfg.backend {
        StorageBackend::Postgres => Ok(Arc::new(PgTelemetryStore::connect(cfg).await?)),
        StorageBackend::Memory => {
            tracing::warn!("using in-memory telemetry store; data is lost on exit");
            Ok(Arc::new(InMemoryTelemetryStore::new()))
        }
    }
}
