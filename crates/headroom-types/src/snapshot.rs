// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Headroom.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::health::HealthReport;
use crate::schedule::ScheduleWindow;

/// Reserve SOC evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReserveStatus {
    pub observe_reserve_soc: bool,
    pub reserve_soc_target: Option<f64>,
    /// SOC is below the reserve floor (only meaningful while observing)
    pub reserve_limit_reached: bool,
}

/// Output of one successful control-loop tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub computed_at: DateTime<Utc>,

    // Export allowance
    pub export_cap_kwh: f64,
    pub export_headroom_kwh: f64,
    pub exported_today_kwh: f64,
    pub export_allowed: bool,

    // Discharge recommendation
    pub discharge_needed: bool,
    pub recommended_discharge_w: f64,
    pub discharge_duration_minutes: f64,

    // PV production and forecast
    pub current_pv_kwh: f64,
    pub forecast_pv_kwh: f64,
    pub forecast_so_far_kwh: Option<f64>,
    pub forecast_tomorrow_kwh: Option<f64>,

    // Plans
    pub discharge_plan_today: Vec<ScheduleWindow>,
    pub discharge_plan_tomorrow: Vec<ScheduleWindow>,
    pub next_charge_session: Vec<ScheduleWindow>,
    pub charge_energy_needed_kwh: f64,

    // Carbon intensity
    pub current_intensity: Option<f64>,
    pub current_intensity_label: Option<String>,
    pub forecast_region: Option<String>,

    // Battery
    pub current_soc: f64,
    pub min_soc: f64,
    #[serde(flatten)]
    pub reserve: ReserveStatus,

    // Sessions
    pub discharge_active: bool,
    pub charge_active: bool,

    #[serde(flatten)]
    pub health: HealthReport,
}

impl Snapshot {
    /// Flatten into the string-keyed attribute map consumed by presentation
    pub fn to_attributes(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
