use std::{sync::Arc, time::Instant};

use telemetry_client::domain::{MeterTelemetry, VehicleTelemetry};

use crate::{
    error::{Result, TelemetryError},
    store::{StoreError, TelemetryStore},
    validate::{self, MeterReadingInput, VehicleReadingInput},
};

/// A validated reading that knows how to commit itself to a store.
#[async_trait::async_trait]
trait Recordable: Send + Sync {
    const DEVICE: &'static str;

    fn device_id(&self) -> &str;

    async fn record(&self, store: &dyn TelemetryStore) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl Recordable for MeterTelemetry {
    const DEVICE: &'static str = "meter";

    fn device_id(&self) -> &str {
        &self.meter_id
    }

    async fn record(&self, store: &dyn TelemetryStore) -> Result<(), StoreError> {
        store.record_meter(self).await
    }
}

#[async_trait::async_trait]
impl Recordable for VehicleTelemetry {
    const DEVICE: &'static str = "vehicle";

    fn device_id(&self) -> &str {
        &self.vehicle_id
    }

    async fn record(&self, store: &dyn TelemetryStore) -> Result<(), StoreError> {
        store.record_vehicle(self).await
    }
}

/// Writes readings to the hot and cold stores.
///
/// Every request is validated in full before the first write. Each reading is
/// then committed in its own store transaction, in request order; a failure at
/// record k returns [`TelemetryError::Ingestion`] and leaves records before k
/// committed.
#[derive(Clone)]
pub struct IngestionEngine {
    store: Arc<dyn TelemetryStore>,
}

impl IngestionEngine {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn ingest_meter(&self, input: &MeterReadingInput) -> Result<usize> {
        let reading = rejected::<MeterTelemetry, _>(validate::validate_meter_reading(input))?;
        self.write_all(std::slice::from_ref(&reading), "ingest_meter").await
    }

    pub async fn ingest_vehicle(&self, input: &VehicleReadingInput) -> Result<usize> {
        let reading = rejected::<VehicleTelemetry, _>(validate::validate_vehicle_reading(input))?;
        self.write_all(std::slice::from_ref(&reading), "ingest_vehicle").await
    }

    pub async fn batch_ingest_meter(&self, inputs: &[MeterReadingInput]) -> Result<usize> {
        let readings = rejected::<MeterTelemetry, _>(validate::validate_batch(
            inputs,
            validate::validate_meter_reading,
        ))?;
        self.write_all(&readings, "batch_ingest_meter").await
    }

    pub async fn batch_ingest_vehicle(&self, inputs: &[VehicleReadingInput]) -> Result<usize> {
        let readings = rejected::<VehicleTelemetry, _>(validate::validate_batch(
            inputs,
            validate::validate_vehicle_reading,
        ))?;
        self.write_all(&readings, "batch_ingest_vehicle").await
    }

    async fn write_all<R: Recordable>(&self, readings: &[R], operation: &'static str) -> Result<usize> {
        if readings.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        for (index, reading) in readings.iter().enumerate() {
            if let Err(source) = reading.record(self.store.as_ref()).await {
                tracing::error!(
                    error = %source,
                    device = R::DEVICE,
                    device_id = reading.device_id(),
                    operation,
                    index,
                    committed = index,
                    "telemetry write failed"
                );
                metrics::counter!("telemetry_ingest_errors_total", "device" => R::DEVICE).increment(1);
                if index > 0 {
                    metrics::counter!("telemetry_ingested_records_total", "device" => R::DEVICE)
                        .increment(index as u64);
                }
                return Err(TelemetryError::Ingestion {
                    device_id: reading.device_id().to_string(),
                    operation,
                    source,
                });
            }
        }

        metrics::counter!("telemetry_ingested_records_total", "device" => R::DEVICE)
            .increment(readings.len() as u64);

        if readings.len() == 1 {
            tracing::debug!(device = R::DEVICE, device_id = readings[0].device_id(), operation, "telemetry ingested");
        } else {
            tracing::info!(
                device = R::DEVICE,
                operation,
                count = readings.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "telemetry batch ingested"
            );
        }

        Ok(readings.len())
    }
}

/// Count validation rejections on their way out.
fn rejected<R: Recordable, T>(res: Result<T>) -> Result<T> {
    res.map_err(|e| {
        tracing::warn!(device = R::DEVICE, error = %e, "telemetry rejected");
        metrics::counter!("telemetry_validation_rejected_total", "device" => R::DEVICE).increment(1);
        e
    })
}
