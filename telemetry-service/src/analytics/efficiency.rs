use std::fmt;

use serde::Serialize;
use time::Duration;

/// Length of the analysis window ending at the requested `end`.
pub const ANALYSIS_WINDOW: Duration = Duration::hours(24);

/// One reading per minute over [`ANALYSIS_WINDOW`].
pub const EXPECTED_READINGS: u32 = 1440;

pub const OPTIMAL_MIN_PCT: f64 = 85.0;
pub const DEGRADED_MIN_PCT: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EfficiencyStatus {
    Optimal,
    Degraded,
    Critical,
}

impl EfficiencyStatus {
    /// `>= 85` optimal, `[75, 85)` degraded, below 75 critical.
    pub fn classify(efficiency_pct: f64) -> Self {
        if efficiency_pct >= OPTIMAL_MIN_PCT {
            EfficiencyStatus::Optimal
        } else if efficiency_pct >= DEGRADED_MIN_PCT {
            EfficiencyStatus::Degraded
        } else {
            EfficiencyStatus::Critical
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            EfficiencyStatus::Optimal => "Normal AC-to-DC conversion efficiency",
            EfficiencyStatus::Degraded => "Charger inefficiency detected - schedule maintenance",
            EfficiencyStatus::Critical => {
                "CRITICAL: Hardware fault or energy leakage - immediate inspection required"
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EfficiencyStatus::Optimal => "optimal",
            EfficiencyStatus::Degraded => "degraded",
            EfficiencyStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for EfficiencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// DC delivered over AC drawn; `0.0` when no AC was drawn.
pub fn efficiency_ratio(total_dc_kwh: f64, total_ac_kwh: f64) -> f64 {
    if total_ac_kwh > 0.0 {
        total_dc_kwh / total_ac_kwh
    } else {
        0.0
    }
}

/// Derived figures for one vehicle over one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficiencyFigures {
    pub efficiency_ratio: f64,
    pub efficiency_pct: f64,
    pub energy_loss_kwh: f64,
    pub completeness_pct: f64,
    pub status: EfficiencyStatus,
}

impl EfficiencyFigures {
    pub fn compute(total_ac_kwh: f64, total_dc_kwh: f64, reading_count: u64) -> Self {
        let efficiency_ratio = efficiency_ratio(total_dc_kwh, total_ac_kwh);
        let efficiency_pct = round_to(efficiency_ratio * 100.0, 2);

        Self {
            efficiency_ratio,
            efficiency_pct,
            energy_loss_kwh: round_to(total_ac_kwh - total_dc_kwh, 3),
            completeness_pct: round_to(reading_count as f64 / f64::from(EXPECTED_READINGS) * 100.0, 2),
            status: EfficiencyStatus::classify(efficiency_pct),
        }
    }
}
