use std::sync::Arc;

use crate::{
    config::MappingConfig,
    error::{Result, TelemetryError},
    store::TelemetryStore,
};

/// Vehicle-to-meter association used to pair DC delivery with AC draw.
///
/// A vehicle has at most one meter; a meter may serve many vehicles. Mappings are
/// written once and never changed by this service.
#[derive(Clone)]
pub struct AssociationRegistry {
    store: Arc<dyn TelemetryStore>,
}

impl AssociationRegistry {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Meter that charges `vehicle_id`, or `NotFound` when none is assigned.
    pub async fn meter_for(&self, vehicle_id: &str) -> Result<String> {
        self.store
            .mapping_for_vehicle(vehicle_id)
            .await
            .map_err(TelemetryError::storage("mapping_for_vehicle"))?
            .map(|m| m.meter_id)
            .ok_or_else(|| TelemetryError::NotFound(format!("no meter associated with vehicle {vehicle_id}")))
    }

    /// Assign a meter to a vehicle that has none. Returns `false` if one was already assigned.
    pub async fn assign(&self, vehicle_id: &str, meter_id: &str) -> Result<bool> {
        let vehicle_id = vehicle_id.trim();
        let meter_id = meter_id.trim();
        if vehicle_id.is_empty() || meter_id.is_empty() {
            return Err(TelemetryError::Validation(
                "vehicleId and meterId must not be empty".to_string(),
            ));
        }

        let created = self
            .store
            .assign_meter(vehicle_id, meter_id)
            .await
            .map_err(TelemetryError::storage("assign_meter"))?;

        if created {
            tracing::info!(vehicle_id, meter_id, "vehicle assigned to meter");
        } else {
            tracing::debug!(vehicle_id, meter_id, "vehicle already has a meter, keeping it");
        }
        Ok(created)
    }

    /// Register configured mappings. Returns how many were new.
    pub async fn register_all(&self, mappings: &[MappingConfig]) -> Result<usize> {
        let mut created = 0;
        for m in mappings {
            if self.assign(&m.vehicle_id, &m.meter_id).await? {
                created += 1;
            }
        }
        Ok(created)
    }
}
