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

/// One planned discharge or charge action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: f64,
    pub energy_kwh: f64,
    pub intensity_value: f64,
    pub intensity_label: String,
    /// Start of the forecast period this window was cut from
    pub period_start: DateTime<Utc>,
}

/// Total energy of a plan (kWh)
pub fn total_energy_kwh(windows: &[ScheduleWindow]) -> f64 {
    windows.iter().map(|w| w.energy_kwh).sum()
}

/// Total active time of a plan (minutes)
pub fn total_duration_minutes(windows: &[ScheduleWindow]) -> f64 {
    windows.iter().map(|w| w.duration_minutes).sum()
}
