use sqlx::postgres::{PgPool, PgPoolOptions};
use telemetry_client::{
    db::{current_state_queries, history_queries, mapping_queries},
    domain::{
        MeterCurrentState, MeterReading, MeterTelemetry, MeterWindowTotals, VehicleCurrentState,
        VehicleMeterMapping, VehicleReading, VehicleTelemetry, VehicleWindowTotals,
    },
};
use time::OffsetDateTime;

use super::{StoreError, TelemetryStore};
use crate::config::DatabaseConfig;

/// Postgres-backed store. One transaction per reading covers both tables.
#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.uri)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn record_meter(&self, reading: &MeterTelemetry) -> Result<(), StoreError> {
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;
        current_state_queries::upsert_meter_state(&mut *tx, reading).await?;
        history_queries::insert_meter_reading(&mut *tx, reading).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_vehicle(&self, reading: &VehicleTelemetry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        current_state_queries::upsert_vehicle_state(&mut *tx, reading).await?;
        history_queries::insert_vehicle_reading(&mut *tx, reading).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn meter_state(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, StoreError> {
        Ok(current_state_queries::meter_state(&self.pool, meter_id).await?)
    }

    async fn vehicle_state(&self, vehicle_id: &str) -> Result<Option<VehicleCurrentState>, StoreError> {
        Ok(current_state_queries::vehicle_state(&self.pool, vehicle_id).await?)
    }

    async fn meter_states(&self) -> Result<Vec<MeterCurrentState>, StoreError> {
        Ok(current_state_queries::meter_states(&self.pool).await?)
    }

    async fn vehicle_states(&self) -> Result<Vec<VehicleCurrentState>, StoreError> {
        Ok(current_state_queries::vehicle_states(&self.pool).await?)
    }

    async fn vehicle_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(current_state_queries::vehicle_ids(&self.pool).await?)
    }

    async fn mapping_for_vehicle(&self, vehicle_id: &str) -> Result<Option<VehicleMeterMapping>, StoreError> {
        Ok(mapping_queries::mapping_for_vehicle(&self.pool, vehicle_id).await?)
    }

    async fn assign_meter(&self, vehicle_id: &str, meter_id: &str) -> Result<bool, StoreError> {
        Ok(mapping_queries::assign_meter(&self.pool, vehicle_id, meter_id).await?)
    }

    async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterReading>, StoreError> {
        Ok(history_queries::meter_history(&self.pool, meter_id, start, end).await?)
    }

    async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleReading>, StoreError> {
        Ok(history_queries::vehicle_history(&self.pool, vehicle_id, start, end).await?)
    }

    async fn meter_window(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindowTotals, StoreError> {
        Ok(history_queries::meter_window_totals(&self.pool, meter_id, start, end).await?)
    }

    async fn vehicle_window(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<VehicleWindowTotals, StoreError> {
        Ok(history_queries::vehicle_window_totals(&self.pool, vehicle_id, start, end).await?)
    }

    async fn count_meter_history(&self, meter_id: &str) -> Result<u64, StoreError> {
        let n = history_queries::count_meter_history(&self.pool, meter_id).await?;
        Ok(n.max(0) as u64)
    }

    async fn count_vehicle_history(&self, vehicle_id: &str) -> Result<u64, StoreError> {
        let n = history_queries::count_vehicle_history(&self.pool, vehicle_id).await?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    async fn store_from_env() -> PgTelemetryStore {
        let uri = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&uri).await.expect("connect to DATABASE_URL");
        PgTelemetryStore::new(pool)
    }

    fn meter(id: &str, kwh: f64, ts: OffsetDateTime) -> MeterTelemetry {
        MeterTelemetry {
            meter_id: id.to_string(),
            ac_energy_consumed_kwh: kwh,
            voltage: 240.0,
            ts,
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a database with sql/schema applied"]
    async fn guarded_upsert_keeps_newest_reading() {
        let store = store_from_env().await;
        let meter_id = format!("IT-METER-{}", OffsetDateTime::now_utc().unix_timestamp_nanos());
        let newer = datetime!(2024-01-01 00:05:00 UTC);
        let older = datetime!(2024-01-01 00:01:00 UTC);

        store.record_meter(&meter(&meter_id, 0.7, newer)).await.unwrap();
        store.record_meter(&meter(&meter_id, 0.2, older)).await.unwrap();
        store.record_meter(&meter(&meter_id, 0.9, newer)).await.unwrap();

        let state = store.meter_state(&meter_id).await.unwrap().unwrap();
        assert_eq!(state.last_update, newer);
        assert_eq!(state.ac_energy_consumed_kwh, 0.9);

        assert_eq!(store.count_meter_history(&meter_id).await.unwrap(), 3);
        let totals = store.meter_window(&meter_id, older, newer).await.unwrap();
        assert_eq!(totals.reading_count, 3);
        assert!((totals.total_ac_kwh - 1.8).abs() < 1e-9);

        let history = store.meter_history(&meter_id, older, newer).await.unwrap();
        assert_eq!(history.first().map(|r| r.ts), Some(older));
    }
}
