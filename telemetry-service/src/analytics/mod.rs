use std::{sync::Arc, time::Instant};

use futures::{stream, StreamExt};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    error::{Result, TelemetryError},
    registry::AssociationRegistry,
    store::TelemetryStore,
};

pub mod efficiency;

pub use efficiency::{EfficiencyFigures, EfficiencyStatus, ANALYSIS_WINDOW, EXPECTED_READINGS};

/// AC-to-DC efficiency of one vehicle over `[window_start, window_end]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub vehicle_id: String,
    pub meter_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub window_end: OffsetDateTime,
    pub total_ac_consumed_kwh: f64,
    pub total_dc_delivered_kwh: f64,
    pub efficiency_ratio: f64,
    pub efficiency_pct: f64,
    pub energy_loss_kwh: f64,
    pub avg_battery_temperature_c: f64,
    pub reading_count: u64,
    pub expected_readings: u32,
    pub completeness_pct: f64,
    pub status: EfficiencyStatus,
    pub status_message: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBreakdown {
    pub optimal: usize,
    pub degraded: usize,
    pub critical: usize,
}

impl StatusBreakdown {
    fn tally(&mut self, status: EfficiencyStatus) {
        match status {
            EfficiencyStatus::Optimal => self.optimal += 1,
            EfficiencyStatus::Degraded => self.degraded += 1,
            EfficiencyStatus::Critical => self.critical += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    /// Vehicles with a current-state row.
    pub total_vehicles: usize,
    /// Vehicles whose performance could be computed for the window.
    pub vehicles_analyzed: usize,
    pub total_ac_consumed_kwh: f64,
    pub total_dc_delivered_kwh: f64,
    pub fleet_efficiency_pct: f64,
    pub status_breakdown: StatusBreakdown,
    pub alerts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEntry {
    pub vehicle_id: String,
    pub meter_id: String,
    pub efficiency_pct: f64,
    pub status: EfficiencyStatus,
    pub energy_loss_kwh: f64,
}

impl From<&PerformanceReport> for AnomalyEntry {
    fn from(p: &PerformanceReport) -> Self {
        AnomalyEntry {
            vehicle_id: p.vehicle_id.clone(),
            meter_id: p.meter_id.clone(),
            efficiency_pct: p.efficiency_pct,
            status: p.status,
            energy_loss_kwh: p.energy_loss_kwh,
        }
    }
}

/// Result of evaluating one vehicle during a fleet scan.
#[derive(Debug)]
enum VehicleOutcome {
    Computed(PerformanceReport),
    /// No mapping or no readings in the window; expected for idle vehicles.
    NoData { vehicle_id: String, reason: String },
    Failed(TelemetryError),
}

/// Efficiency analytics over the history tables.
///
/// Every operation takes the window end explicitly; callers decide what "now" is.
#[derive(Clone)]
pub struct EfficiencyAnalytics {
    store: Arc<dyn TelemetryStore>,
    registry: AssociationRegistry,
    fleet_concurrency: usize,
}

impl EfficiencyAnalytics {
    pub fn new(store: Arc<dyn TelemetryStore>, fleet_concurrency: usize) -> Self {
        Self {
            registry: AssociationRegistry::new(store.clone()),
            store,
            fleet_concurrency: fleet_concurrency.max(1),
        }
    }

    /// Efficiency of `vehicle_id` over `[end - 24h, end]`.
    ///
    /// Fails with `NotFound` when the vehicle has no meter or no readings in the window.
    /// Readings without any matching AC draw are a valid zero-efficiency result.
    pub async fn vehicle_performance(&self, vehicle_id: &str, end: OffsetDateTime) -> Result<PerformanceReport> {
        let started = Instant::now();
        let meter_id = self.registry.meter_for(vehicle_id).await?;
        let start = end - ANALYSIS_WINDOW;

        let dc = self
            .store
            .vehicle_window(vehicle_id, start, end)
            .await
            .map_err(TelemetryError::storage("vehicle_window"))?;
        if dc.reading_count == 0 {
            return Err(TelemetryError::NotFound(format!(
                "no telemetry for vehicle {vehicle_id} between {start} and {end}"
            )));
        }

        let ac = self
            .store
            .meter_window(&meter_id, start, end)
            .await
            .map_err(TelemetryError::storage("meter_window"))?;

        let reading_count = dc.reading_count.max(0) as u64;
        let figures = EfficiencyFigures::compute(ac.total_ac_kwh, dc.total_dc_kwh, reading_count);

        let elapsed = started.elapsed();
        metrics::histogram!("analytics_vehicle_performance_seconds").record(elapsed.as_secs_f64());
        tracing::debug!(
            vehicle_id,
            meter_id = %meter_id,
            total_ac = ac.total_ac_kwh,
            total_dc = dc.total_dc_kwh,
            efficiency_pct = figures.efficiency_pct,
            status = %figures.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "vehicle performance computed"
        );

        Ok(PerformanceReport {
            vehicle_id: vehicle_id.to_string(),
            meter_id,
            window_start: start,
            window_end: end,
            total_ac_consumed_kwh: ac.total_ac_kwh,
            total_dc_delivered_kwh: dc.total_dc_kwh,
            efficiency_ratio: figures.efficiency_ratio,
            efficiency_pct: figures.efficiency_pct,
            energy_loss_kwh: figures.energy_loss_kwh,
            avg_battery_temperature_c: dc.avg_battery_temperature_c,
            reading_count,
            expected_readings: EXPECTED_READINGS,
            completeness_pct: figures.completeness_pct,
            status: figures.status,
            status_message: figures.status.message(),
        })
    }

    /// Fleet-wide totals, status tally and critical alerts for the window ending at `end`.
    pub async fn fleet_performance(&self, end: OffsetDateTime) -> Result<FleetSummary> {
        let (total_vehicles, reports) = self.evaluate_fleet(end).await?;

        if total_vehicles == 0 {
            return Ok(FleetSummary {
                total_vehicles: 0,
                vehicles_analyzed: 0,
                total_ac_consumed_kwh: 0.0,
                total_dc_delivered_kwh: 0.0,
                fleet_efficiency_pct: 0.0,
                status_breakdown: StatusBreakdown::default(),
                alerts: vec!["No vehicles found - no vehicle telemetry has been ingested yet".to_string()],
            });
        }

        let mut total_ac = 0.0;
        let mut total_dc = 0.0;
        let mut breakdown = StatusBreakdown::default();
        let mut alerts = Vec::new();

        for report in &reports {
            total_ac += report.total_ac_consumed_kwh;
            total_dc += report.total_dc_delivered_kwh;
            breakdown.tally(report.status);
            if report.status == EfficiencyStatus::Critical {
                alerts.push(format!(
                    "CRITICAL: {} - {}% efficiency",
                    report.vehicle_id, report.efficiency_pct
                ));
            }
        }

        let fleet_efficiency_pct = efficiency::round_to(efficiency::efficiency_ratio(total_dc, total_ac) * 100.0, 2);

        tracing::info!(
            total_vehicles,
            vehicles_analyzed = reports.len(),
            fleet_efficiency_pct,
            critical = breakdown.critical,
            "fleet performance computed"
        );

        Ok(FleetSummary {
            total_vehicles,
            vehicles_analyzed: reports.len(),
            total_ac_consumed_kwh: total_ac,
            total_dc_delivered_kwh: total_dc,
            fleet_efficiency_pct,
            status_breakdown: breakdown,
            alerts,
        })
    }

    /// Vehicles whose efficiency is below `threshold_pct`, worst first.
    pub async fn detect_anomalies(&self, threshold_pct: f64, end: OffsetDateTime) -> Result<Vec<AnomalyEntry>> {
        if !threshold_pct.is_finite() {
            return Err(TelemetryError::Validation(format!(
                "threshold must be a finite percentage, got {threshold_pct}"
            )));
        }

        let (_, reports) = self.evaluate_fleet(end).await?;

        let mut anomalies: Vec<AnomalyEntry> = reports
            .iter()
            .filter(|r| r.efficiency_pct < threshold_pct)
            .map(AnomalyEntry::from)
            .collect();
        anomalies.sort_by(|a, b| a.efficiency_pct.total_cmp(&b.efficiency_pct));

        tracing::info!(threshold_pct, anomalies = anomalies.len(), "anomaly scan finished");
        Ok(anomalies)
    }

    /// Evaluate every known vehicle, skipping those without data.
    ///
    /// Returns the number of known vehicles and the computed reports in vehicle id order.
    async fn evaluate_fleet(&self, end: OffsetDateTime) -> Result<(usize, Vec<PerformanceReport>)> {
        let vehicle_ids = self
            .store
            .vehicle_ids()
            .await
            .map_err(TelemetryError::storage("vehicle_ids"))?;

        // `buffered` keeps vehicle id order so totals are summed deterministically.
        let outcomes: Vec<VehicleOutcome> = stream::iter(vehicle_ids.iter().cloned())
            .map(|vehicle_id| async move { self.evaluate(&vehicle_id, end).await })
            .buffered(self.fleet_concurrency)
            .collect()
            .await;

        let mut reports = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                VehicleOutcome::Computed(report) => reports.push(report),
                VehicleOutcome::NoData { vehicle_id, reason } => {
                    tracing::debug!(vehicle_id = %vehicle_id, reason = %reason, "vehicle skipped in fleet scan");
                    metrics::counter!("analytics_fleet_vehicles_skipped_total").increment(1);
                }
                VehicleOutcome::Failed(err) => return Err(err),
            }
        }

        Ok((vehicle_ids.len(), reports))
    }

    async fn evaluate(&self, vehicle_id: &str, end: OffsetDateTime) -> VehicleOutcome {
        match self.vehicle_performance(vehicle_id, end).await {
            Ok(report) => VehicleOutcome::Computed(report),
            Err(TelemetryError::NotFound(reason)) => VehicleOutcome::NoData {
                vehicle_id: vehicle_id.to_string(),
                reason,
            },
            Err(err) => VehicleOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ingest::IngestionEngine,
        store::InMemoryTelemetryStore,
        validate::{MeterReadingInput, VehicleReadingInput},
    };
    use time::{format_description::well_known::Rfc3339, macros::datetime, Duration};

    const END: OffsetDateTime = datetime!(2024-06-01 12:00:00 UTC);

    struct Fleet {
        store: Arc<InMemoryTelemetryStore>,
        ingest: IngestionEngine,
        analytics: EfficiencyAnalytics,
    }

    impl Fleet {
        fn new() -> Self {
            let store = Arc::new(InMemoryTelemetryStore::new());
            Self {
                ingest: IngestionEngine::new(store.clone()),
                analytics: EfficiencyAnalytics::new(store.clone(), 4),
                store,
            }
        }

        async fn map(&self, vehicle_id: &str, meter_id: &str) {
            self.store.assign_meter(vehicle_id, meter_id).await.unwrap();
        }

        /// Readings at `END - 1h + minute` for each listed minute.
        async fn meter(&self, meter_id: &str, kwh: f64, minutes: impl IntoIterator<Item = i64>) {
            let batch: Vec<_> = minutes
                .into_iter()
                .map(|m| MeterReadingInput {
                    meter_id: meter_id.to_string(),
                    ac_energy_consumed_kwh: kwh,
                    voltage: 240.0,
                    timestamp: at(m),
                })
                .collect();
            self.ingest.batch_ingest_meter(&batch).await.unwrap();
        }

        async fn vehicle(&self, vehicle_id: &str, kwh: f64, minutes: impl IntoIterator<Item = i64>) {
            let batch: Vec<_> = minutes
                .into_iter()
                .map(|m| VehicleReadingInput {
                    vehicle_id: vehicle_id.to_string(),
                    state_of_charge: 50.0,
                    dc_energy_delivered_kwh: kwh,
                    battery_temperature_c: 20.0 + m as f64,
                    timestamp: at(m),
                })
                .collect();
            self.ingest.batch_ingest_vehicle(&batch).await.unwrap();
        }
    }

    fn at(minute: i64) -> String {
        (END - Duration::hours(1) + Duration::minutes(minute))
            .format(&Rfc3339)
            .unwrap()
    }

    #[tokio::test]
    async fn degraded_vehicle_scenario() {
        let fleet = Fleet::new();
        fleet.map("VEHICLE-001", "METER-001").await;
        fleet.meter("METER-001", 0.5, 0..3).await;
        fleet.vehicle("VEHICLE-001", 0.4, 0..3).await;

        let p = fleet.analytics.vehicle_performance("VEHICLE-001", END).await.unwrap();

        assert_eq!(p.meter_id, "METER-001");
        assert!((p.total_ac_consumed_kwh - 1.5).abs() < 1e-9);
        assert!((p.total_dc_delivered_kwh - 1.2).abs() < 1e-9);
        assert_eq!(p.efficiency_pct, 80.0);
        assert_eq!(p.energy_loss_kwh, 0.3);
        assert_eq!(p.status, EfficiencyStatus::Degraded);
        assert_eq!(p.status_message, "Charger inefficiency detected - schedule maintenance");
        assert_eq!(p.reading_count, 3);
        assert_eq!(p.avg_battery_temperature_c, 21.0);
        assert_eq!(p.window_start, END - Duration::hours(24));
        assert_eq!(p.window_end, END);
    }

    #[tokio::test]
    async fn readings_outside_window_are_ignored() {
        let fleet = Fleet::new();
        fleet.map("VEHICLE-001", "METER-001").await;
        fleet.meter("METER-001", 1.0, [0, -23 * 60 - 1, 61]).await;
        fleet.vehicle("VEHICLE-001", 0.9, [0]).await;

        let p = fleet.analytics.vehicle_performance("VEHICLE-001", END).await.unwrap();
        assert_eq!(p.total_ac_consumed_kwh, 1.0);
        assert_eq!(p.efficiency_pct, 90.0);
        assert_eq!(p.status, EfficiencyStatus::Optimal);
    }

    #[tokio::test]
    async fn no_readings_in_window_is_not_found() {
        let fleet = Fleet::new();
        fleet.map("VEHICLE-001", "METER-001").await;
        fleet.meter("METER-001", 0.5, 0..3).await;
        fleet.vehicle("VEHICLE-001", 0.4, 0..3).await;

        let much_later = END + Duration::days(3);
        assert!(matches!(
            fleet.analytics.vehicle_performance("VEHICLE-001", much_later).await,
            Err(TelemetryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unmapped_vehicle_is_not_found_even_with_data() {
        let fleet = Fleet::new();
        fleet.vehicle("VEHICLE-002", 0.4, 0..3).await;

        assert!(matches!(
            fleet.analytics.vehicle_performance("VEHICLE-002", END).await,
            Err(TelemetryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn dc_without_ac_is_zero_efficiency_not_missing() {
        let fleet = Fleet::new();
        fleet.map("VEHICLE-001", "METER-silent").await;
        fleet.vehicle("VEHICLE-001", 0.4, 0..2).await;

        let p = fleet.analytics.vehicle_performance("VEHICLE-001", END).await.unwrap();
        assert_eq!(p.efficiency_ratio, 0.0);
        assert_eq!(p.efficiency_pct, 0.0);
        assert_eq!(p.status, EfficiencyStatus::Critical);
    }

    #[tokio::test]
    async fn empty_fleet_returns_informational_summary() {
        let fleet = Fleet::new();
        let summary = fleet.analytics.fleet_performance(END).await.unwrap();

        assert_eq!(summary.total_vehicles, 0);
        assert_eq!(summary.fleet_efficiency_pct, 0.0);
        assert_eq!(summary.alerts.len(), 1);
        assert!(summary.alerts[0].starts_with("No vehicles found"));
    }

    async fn mixed_fleet() -> Fleet {
        let fleet = Fleet::new();
        // Two vehicles share METER-001.
        fleet.map("VEHICLE-001", "METER-001").await;
        fleet.map("VEHICLE-002", "METER-001").await;
        fleet.map("VEHICLE-003", "METER-002").await;
        fleet.map("VEHICLE-004", "METER-003").await;

        fleet.meter("METER-001", 1.0, 0..10).await;
        fleet.meter("METER-002", 1.0, 0..10).await;
        fleet.meter("METER-003", 1.0, 0..10).await;

        fleet.vehicle("VEHICLE-001", 0.9, 0..10).await; // 90%
        fleet.vehicle("VEHICLE-002", 0.8, 0..10).await; // 80%
        fleet.vehicle("VEHICLE-003", 0.6, 0..10).await; // 60%
        fleet.vehicle("VEHICLE-004", 0.7, 0..10).await; // 70%

        // Known but unmapped, and known but stale.
        fleet.vehicle("VEHICLE-005", 0.5, 0..2).await;
        fleet.map("VEHICLE-006", "METER-002").await;
        fleet.vehicle("VEHICLE-006", 0.5, [-25 * 60]).await;
        fleet
    }

    #[tokio::test]
    async fn fleet_rollup_skips_vehicles_without_data() {
        let fleet = mixed_fleet().await;
        let summary = fleet.analytics.fleet_performance(END).await.unwrap();

        assert_eq!(summary.total_vehicles, 6);
        assert_eq!(summary.vehicles_analyzed, 4);
        assert_eq!(
            summary.status_breakdown,
            StatusBreakdown { optimal: 1, degraded: 1, critical: 2 }
        );
        assert_eq!(
            summary.alerts,
            vec![
                "CRITICAL: VEHICLE-003 - 60% efficiency".to_string(),
                "CRITICAL: VEHICLE-004 - 70% efficiency".to_string(),
            ]
        );

        // Shared meters are counted once per vehicle, matching the per-vehicle reports.
        let mut ac = 0.0;
        let mut dc = 0.0;
        for id in ["VEHICLE-001", "VEHICLE-002", "VEHICLE-003", "VEHICLE-004"] {
            let p = fleet.analytics.vehicle_performance(id, END).await.unwrap();
            ac += p.total_ac_consumed_kwh;
            dc += p.total_dc_delivered_kwh;
        }
        assert!((summary.total_ac_consumed_kwh - ac).abs() < 1e-9);
        assert!((summary.total_dc_delivered_kwh - dc).abs() < 1e-9);
        assert_eq!(summary.fleet_efficiency_pct, efficiency::round_to(dc / ac * 100.0, 2));
        assert_eq!(summary.fleet_efficiency_pct, 75.0);
    }

    #[tokio::test]
    async fn anomalies_are_sorted_worst_first() {
        let fleet = mixed_fleet().await;
        let anomalies = fleet.analytics.detect_anomalies(85.0, END).await.unwrap();

        let ids: Vec<_> = anomalies.iter().map(|a| a.vehicle_id.as_str()).collect();
        assert_eq!(ids, ["VEHICLE-003", "VEHICLE-004", "VEHICLE-002"]);
        assert!(anomalies
            .windows(2)
            .all(|w| w[0].efficiency_pct <= w[1].efficiency_pct));
        assert!(anomalies.iter().all(|a| a.efficiency_pct < 85.0));
    }

    #[tokio::test]
    async fn anomaly_threshold_is_exclusive() {
        let fleet = mixed_fleet().await;
        let anomalies = fleet.analytics.detect_anomalies(70.0, END).await.unwrap();

        let ids: Vec<_> = anomalies.iter().map(|a| a.vehicle_id.as_str()).collect();
        assert_eq!(ids, ["VEHICLE-003"]);
    }

    #[tokio::test]
    async fn non_finite_threshold_is_rejected() {
        let fleet = Fleet::new();
        assert!(matches!(
            fleet.analytics.detect_anomalies(f64::NAN, END).await,
            Err(TelemetryError::Validation(_))
        ));
    }
}
