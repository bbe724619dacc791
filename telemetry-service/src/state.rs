use std::sync::Arc;

use telemetry_client::domain::{
    MeterCurrentState, MeterReading, VehicleCurrentState, VehicleReading,
};
use time::OffsetDateTime;

use crate::{
    error::{Result, TelemetryError},
    store::TelemetryStore,
};

/// Read side of the hot and cold stores.
#[derive(Clone)]
pub struct TelemetryReader {
    store: Arc<dyn TelemetryStore>,
}

impl TelemetryReader {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn meter_state(&self, meter_id: &str) -> Result<MeterCurrentState> {
        self.store
            .meter_state(meter_id)
            .await
            .map_err(TelemetryError::storage("meter_state"))?
            .ok_or_else(|| TelemetryError::NotFound(format!("meter {meter_id} not found")))
    }

    pub async fn vehicle_state(&self, vehicle_id: &str) -> Result<VehicleCurrentState> {
        self.store
            .vehicle_state(vehicle_id)
            .await
            .map_err(TelemetryError::storage("vehicle_state"))?
            .ok_or_else(|| TelemetryError::NotFound(format!("vehicle {vehicle_id} not found")))
    }

    /// Most recently active meter first.
    pub async fn list_meter_states(&self) -> Result<Vec<MeterCurrentState>> {
        self.store
            .meter_states()
            .await
            .map_err(TelemetryError::storage("meter_states"))
    }

    /// Most recently active vehicle first.
    pub async fn list_vehicle_states(&self) -> Result<Vec<VehicleCurrentState>> {
        self.store
            .vehicle_states()
            .await
            .map_err(TelemetryError::storage("vehicle_states"))
    }

    pub async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterReading>> {
        check_window(start, end)?;
        self.store
            .meter_history(meter_id, start, end)
            .await
            .map_err(TelemetryError::storage("meter_history"))
    }

    pub async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleReading>> {
        check_window(start, end)?;
        self.store
            .vehicle_history(vehicle_id, start, end)
            .await
            .map_err(TelemetryError::storage("vehicle_history"))
    }
}

fn check_window(start: OffsetDateTime, end: OffsetDateTime) -> Result<()> {
    if start > end {
        return Err(TelemetryError::Validation(format!(
            "window start {start} is after end {end}"
        )));
    }
    Ok(())
}
