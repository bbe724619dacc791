use anyhow::Result;
use telemetry_service::{
    config::{AppConfig, StorageBackend},
    ingest::IngestionEngine,
    observability,
    registry::AssociationRegistry,
    store,
    validate::{MeterReadingInput, VehicleReadingInput},
};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

const METERS: usize = 5;
const VEHICLES: usize = 10;
const HOURS: i64 = 24;
const CHARGING_MINUTES: i64 = 45;
const BATTERY_CAPACITY_KWH: f64 = 75.0;
const FAULTY_VEHICLE: &str = "VEHICLE-007";

/// Deterministic value in [0, 1) for a (series, step) pair.
fn wobble(series: usize, step: i64) -> f64 {
    let x = (step as f64 * 0.618_034 + series as f64 * 1.414_213).sin() * 43_758.545_3;
    x - x.floor()
}

fn rfc3339(ts: OffsetDateTime) -> Result<String> {
    Ok(ts.format(&Rfc3339)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    if cfg.database.backend == StorageBackend::Memory {
        tracing::warn!("seeding the in-memory backend only exercises the pipeline; nothing persists");
    }

    let store = store::open(&cfg.database).await?;
    let registry = AssociationRegistry::new(store.clone());
    let engine = IngestionEngine::new(store);

    let meter_ids: Vec<String> = (1..=METERS).map(|i| format!("METER-{i:03}")).collect();
    let mut vehicles: Vec<(String, bool, f64)> = Vec::with_capacity(VEHICLES);
    for i in 1..=VEHICLES {
        let vehicle_id = format!("VEHICLE-{i:03}");
        let meter_id = &meter_ids[i % METERS];
        registry.assign(&vehicle_id, meter_id).await?;
        let faulty = vehicle_id == FAULTY_VEHICLE;
        tracing::info!(vehicle_id = %vehicle_id, meter_id = %meter_id, faulty, "vehicle mapped");
        vehicles.push((vehicle_id, faulty, 50.0));
    }

    let now = OffsetDateTime::now_utc().replace_nanosecond(0)?.replace_second(0)?;
    let start = now - Duration::hours(HOURS);
    let mut total = 0usize;

    for hour in 0..HOURS {
        let mut meter_batch = Vec::with_capacity(METERS * 60);
        let mut vehicle_batch = Vec::with_capacity(VEHICLES * 60);

        for minute in 0..60 {
            let step = hour * 60 + minute;
            let timestamp = rfc3339(start + Duration::minutes(step))?;
            let charging = minute < CHARGING_MINUTES;

            for (m, meter_id) in meter_ids.iter().enumerate() {
                let w = wobble(m, step);
                let ac = if charging { 0.4 + w * 0.2 } else { 0.05 + w * 0.05 };
                meter_batch.push(MeterReadingInput {
                    meter_id: meter_id.clone(),
                    ac_energy_consumed_kwh: ac,
                    voltage: 238.0 + wobble(m + 100, step) * 4.0,
                    timestamp: timestamp.clone(),
                });
            }

            for (v, (vehicle_id, faulty, soc)) in vehicles.iter_mut().enumerate() {
                let w = wobble(v + 200, step);
                let efficiency = if *faulty { 0.65 + w * 0.05 } else { 0.85 + w * 0.07 };
                let dc = if charging { 0.5 * efficiency } else { 0.0 };
                *soc = (*soc + dc / BATTERY_CAPACITY_KWH * 100.0).clamp(0.0, 100.0);
                let temperature = match (charging, *faulty) {
                    (true, true) => 35.0 + w * 8.0,
                    (true, false) => 25.0 + w * 8.0,
                    (false, _) => 22.0 + w * 3.0,
                };
                vehicle_batch.push(VehicleReadingInput {
                    vehicle_id: vehicle_id.clone(),
                    state_of_charge: *soc,
                    dc_energy_delivered_kwh: dc,
                    battery_temperature_c: temperature,
                    timestamp: timestamp.clone(),
                });
            }
        }

        total += engine.batch_ingest_meter(&meter_batch).await?;
        total += engine.batch_ingest_vehicle(&vehicle_batch).await?;
        tracing::info!(hour = hour + 1, of = HOURS, records = total, "hour seeded");
    }

    tracing::info!(
        records = total,
        faulty_vehicle = FAULTY_VEHICLE,
        "seeding complete; the faulty vehicle should appear in /api/v1/analytics/anomalies"
    );

    Ok(())
}
