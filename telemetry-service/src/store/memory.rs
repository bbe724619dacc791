use std::collections::{BTreeMap, HashMap};

use telemetry_client::domain::{
    MeterCurrentState, MeterReading, MeterTelemetry, MeterWindowTotals, VehicleCurrentState,
    VehicleMeterMapping, VehicleReading, VehicleTelemetry, VehicleWindowTotals,
};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use super::{StoreError, TelemetryStore};

/// History key: (device id, reading time, insert sequence). Mirrors the
/// `(device_id, ts)` composite index of the SQL schema.
type HistoryKey = (String, OffsetDateTime, i64);

#[derive(Default)]
struct Tables {
    meter_states: HashMap<String, MeterCurrentState>,
    vehicle_states: HashMap<String, VehicleCurrentState>,
    meter_history: BTreeMap<HistoryKey, MeterReading>,
    vehicle_history: BTreeMap<HistoryKey, VehicleReading>,
    mappings: HashMap<String, VehicleMeterMapping>,
    next_id: i64,
    last_recorded_at: Option<OffsetDateTime>,
    writes: u64,
    fail_on_write: Option<u64>,
}

impl Tables {
    /// Reserve an id and a strictly increasing receipt time for the next history row.
    ///
    /// Fails before anything is mutated when a write fault is armed.
    fn begin_write(&mut self) -> Result<(i64, OffsetDateTime), StoreError> {
        self.writes += 1;
        if self.fail_on_write == Some(self.writes) {
            return Err(StoreError::Unavailable(format!(
                "injected failure on write {}",
                self.writes
            )));
        }

        let now = OffsetDateTime::now_utc();
        let recorded_at = match self.last_recorded_at {
            Some(prev) if prev >= now => prev + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_recorded_at = Some(recorded_at);
        self.next_id += 1;
        Ok((self.next_id, recorded_at))
    }
}

fn history_range<'a, V>(
    table: &'a BTreeMap<HistoryKey, V>,
    device_id: &'a str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> impl Iterator<Item = &'a V> + 'a {
    // An inverted window is empty; BTreeMap::range would panic on it.
    let bounds = if start <= end { Some((start, end)) } else { None };
    bounds.into_iter().flat_map(move |(start, end)| {
        table
            .range((device_id.to_string(), start, i64::MIN)..=(device_id.to_string(), end, i64::MAX))
            .map(|(_, v)| v)
    })
}

/// Process-local store guarded by a single lock.
///
/// A write holds the lock across both the hot upsert and the history append, so
/// readers never see one without the other. Used for tests, demos and the
/// `memory` storage backend.
#[derive(Default)]
pub struct InMemoryTelemetryStore {
    tables: RwLock<Tables>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `nth` telemetry write (1-based, counted from store creation) fail.
    #[cfg(test)]
    pub(crate) async fn fail_on_write(&self, nth: u64) {
        self.tables.write().await.fail_on_write = Some(nth);
    }
}

#[async_trait::async_trait]
impl TelemetryStore for InMemoryTelemetryStore {
    async fn record_meter(&self, reading: &MeterTelemetry) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let (id, recorded_at) = tables.begin_write()?;

        let advance = tables
            .meter_states
            .get(&reading.meter_id)
            .map_or(true, |s| s.last_update <= reading.ts);
        if advance {
            tables
                .meter_states
                .insert(reading.meter_id.clone(), MeterCurrentState::from(reading));
        }

        tables.meter_history.insert(
            (reading.meter_id.clone(), reading.ts, id),
            MeterReading {
                id,
                meter_id: reading.meter_id.clone(),
                ac_energy_consumed_kwh: reading.ac_energy_consumed_kwh,
                voltage: reading.voltage,
                ts: reading.ts,
                recorded_at,
            },
        );
        Ok(())
    }

    async fn record_vehicle(&self, reading: &VehicleTelemetry) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let (id, recorded_at) = tables.begin_write()?;

        let advance = tables
            .vehicle_states
            .get(&reading.vehicle_id)
            .map_or(true, |s| s.last_update <= reading.ts);
        if advance {
            tables
                .vehicle_states
                .insert(reading.vehicle_id.clone(), VehicleCurrentState::from(reading));
        }

        tables.vehicle_history.insert(
            (reading.vehicle_id.clone(), reading.ts, id),
            VehicleReading {
                id,
                vehicle_id: reading.vehicle_id.clone(),
                state_of_charge: reading.state_of_charge,
                dc_energy_delivered_kwh: reading.dc_energy_delivered_kwh,
                battery_temperature_c: reading.battery_temperature_c,
                ts: reading.ts,
                recorded_at,
            },
        );
        Ok(())
    }

    async fn meter_state(&self, meter_id: &str) -> Result<Option<MeterCurrentState>, StoreError> {
        Ok(self.tables.read().await.meter_states.get(meter_id).cloned())
    }

    async fn vehicle_state(&self, vehicle_id: &str) -> Result<Option<VehicleCurrentState>, StoreError> {
        Ok(self.tables.read().await.vehicle_states.get(vehicle_id).cloned())
    }

    async fn meter_states(&self) -> Result<Vec<MeterCurrentState>, StoreError> {
        let mut states: Vec<_> = self.tables.read().await.meter_states.values().cloned().collect();
        states.sort_by(|a, b| {
            b.last_update
                .cmp(&a.last_update)
                .then_with(|| a.meter_id.cmp(&b.meter_id))
        });
        Ok(states)
    }

    async fn vehicle_states(&self) -> Result<Vec<VehicleCurrentState>, StoreError> {
        let mut states: Vec<_> = self.tables.read().await.vehicle_states.values().cloned().collect();
        states.sort_by(|a, b| {
            b.last_update
                .cmp(&a.last_update)
                .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
        });
        Ok(states)
    }

    async fn vehicle_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<_> = self.tables.read().await.vehicle_states.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn mapping_for_vehicle(&self, vehicle_id: &str) -> Result<Option<VehicleMeterMapping>, StoreError> {
        Ok(self.tables.read().await.mappings.get(vehicle_id).cloned())
    }

    async fn assign_meter(&self, vehicle_id: &str, meter_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.mappings.contains_key(vehicle_id) {
            return Ok(false);
        }
        tables.mappings.insert(
            vehicle_id.to_string(),
            VehicleMeterMapping {
                vehicle_id: vehicle_id.to_string(),
                meter_id: meter_id.to_string(),
                assigned_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(true)
    }

    async fn meter_history(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MeterReading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(history_range(&tables.meter_history, meter_id, start, end)
            .cloned()
            .collect())
    }

    async fn vehicle_history(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<VehicleReading>, StoreError> {
        let tables = self.tables.read().await;
        Ok(history_range(&tables.vehicle_history, vehicle_id, start, end)
            .cloned()
            .collect())
    }

    async fn meter_window(
        &self,
        meter_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<MeterWindowTotals, StoreError> {
        let tables = self.tables.read().await;
        let totals = history_range(&tables.meter_history, meter_id, start, end).fold(
            MeterWindowTotals::default(),
            |mut acc, r| {
                acc.total_ac_kwh += r.ac_energy_consumed_kwh;
                acc.reading_count += 1;
                acc
            },
        );
        Ok(totals)
    }

    async fn vehicle_window(
        &self,
        vehicle_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<VehicleWindowTotals, StoreError> {
        let tables = self.tables.read().await;
        let mut totals = VehicleWindowTotals::default();
        let mut temperature_sum = 0.0;
        for r in history_range(&tables.vehicle_history, vehicle_id, start, end) {
            totals.total_dc_kwh += r.dc_energy_delivered_kwh;
            temperature_sum += r.battery_temperature_c;
            totals.reading_count += 1;
        }
        if totals.reading_count > 0 {
            totals.avg_battery_temperature_c = temperature_sum / totals.reading_count as f64;
        }
        Ok(totals)
    }

    async fn count_meter_history(&self, meter_id: &str) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.meter_history.keys().filter(|k| k.0 == meter_id).count() as u64)
    }

    async fn count_vehicle_history(&self, vehicle_id: &str) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.vehicle_history.keys().filter(|k| k.0 == vehicle_id).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn meter(id: &str, kwh: f64, ts: OffsetDateTime) -> MeterTelemetry {
        MeterTelemetry {
            meter_id: id.to_string(),
            ac_energy_consumed_kwh: kwh,
            voltage: 240.0,
            ts,
        }
    }

    #[tokio::test]
    async fn record_meter_writes_hot_and_cold() {
        let store = InMemoryTelemetryStore::new();
        let ts = datetime!(2024-01-01 00:00:00 UTC);
        store.record_meter(&meter("M-1", 0.5, ts)).await.unwrap();

        let state = store.meter_state("M-1").await.unwrap().unwrap();
        assert_eq!(state.ac_energy_consumed_kwh, 0.5);
        assert_eq!(state.last_update, ts);
        assert_eq!(store.count_meter_history("M-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn equal_timestamp_takes_the_later_write() {
        let store = InMemoryTelemetryStore::new();
        let ts = datetime!(2024-01-01 00:05:00 UTC);

        store.record_meter(&meter("M-1", 0.5, ts)).await.unwrap();
        store.record_meter(&meter("M-1", 0.9, ts)).await.unwrap();

        let state = store.meter_state("M-1").await.unwrap().unwrap();
        assert_eq!(state.ac_energy_consumed_kwh, 0.9);
        assert_eq!(state.last_update, ts);

        let history = store.meter_history("M-1", ts, ts).await.unwrap();
        let kwh: Vec<f64> = history.iter().map(|r| r.ac_energy_consumed_kwh).collect();
        assert_eq!(kwh, vec![0.5, 0.9]);

        let vehicle = |soc: f64| VehicleTelemetry {
            vehicle_id: "V-1".to_string(),
            state_of_charge: soc,
            dc_energy_delivered_kwh: 0.4,
            battery_temperature_c: 25.0,
            ts,
        };
        store.record_vehicle(&vehicle(40.0)).await.unwrap();
        store.record_vehicle(&vehicle(41.0)).await.unwrap();

        let state = store.vehicle_state("V-1").await.unwrap().unwrap();
        assert_eq!(state.state_of_charge, 41.0);
        assert_eq!(store.count_vehicle_history("V-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn late_reading_is_appended_but_does_not_rewind_state() {
        let store = InMemoryTelemetryStore::new();
        let newer = datetime!(2024-01-01 00:05:00 UTC);
        let older = datetime!(2024-01-01 00:01:00 UTC);

        store.record_meter(&meter("M-1", 0.7, newer)).await.unwrap();
        store.record_meter(&meter("M-1", 0.2, older)).await.unwrap();

        let state = store.meter_state("M-1").await.unwrap().unwrap();
        assert_eq!(state.last_update, newer);
        assert_eq!(state.ac_energy_consumed_kwh, 0.7);

        let history = store
            .meter_history("M-1", older, newer)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].ts, older);
        assert_eq!(history[1].ts, newer);
        assert!(history[1].recorded_at < history[0].recorded_at);
    }

    #[tokio::test]
    async fn failed_write_leaves_both_tables_untouched() {
        let store = InMemoryTelemetryStore::new();
        store.fail_on_write(1).await;

        let ts = datetime!(2024-01-01 00:00:00 UTC);
        assert!(store.record_meter(&meter("M-1", 0.5, ts)).await.is_err());
        assert!(store.meter_state("M-1").await.unwrap().is_none());
        assert_eq!(store.count_meter_history("M-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn window_is_closed_on_both_ends() {
        let store = InMemoryTelemetryStore::new();
        let start = datetime!(2024-01-01 00:00:00 UTC);
        let end = datetime!(2024-01-02 00:00:00 UTC);

        store.record_meter(&meter("M-1", 1.0, start)).await.unwrap();
        store.record_meter(&meter("M-1", 2.0, end)).await.unwrap();
        store
            .record_meter(&meter("M-1", 4.0, end + Duration::seconds(1)))
            .await
            .unwrap();
        store.record_meter(&meter("M-2", 8.0, start)).await.unwrap();

        let totals = store.meter_window("M-1", start, end).await.unwrap();
        assert_eq!(totals.total_ac_kwh, 3.0);
        assert_eq!(totals.reading_count, 2);

        let inverted = store.meter_window("M-1", end, start).await.unwrap();
        assert_eq!(inverted.reading_count, 0);
    }

    #[tokio::test]
    async fn assign_meter_keeps_first_mapping() {
        let store = InMemoryTelemetryStore::new();
        assert!(store.assign_meter("V-1", "M-1").await.unwrap());
        assert!(!store.assign_meter("V-1", "M-2").await.unwrap());

        let mapping = store.mapping_for_vehicle("V-1").await.unwrap().unwrap();
        assert_eq!(mapping.meter_id, "M-1");
    }
}
