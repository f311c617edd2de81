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

//! Export allowance for the current day.

use serde::{Deserialize, Serialize};

/// Export cap and what is left of it (kWh)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadroomResult {
    pub export_cap_kwh: f64,
    /// Negative when today's exports already exceed the cap
    pub headroom_kwh: f64,
}

impl HeadroomResult {
    pub fn export_allowed(&self) -> bool {
        self.headroom_kwh > 0.0
    }
}

/// Export cap is the larger of actual and forecast PV production plus a
/// safety margin; headroom is the cap minus what was exported already.
/// Headroom is not clamped.
pub fn compute_headroom(
    pv_energy_today: f64,
    forecast_total_today: f64,
    exported_today: f64,
    safety_margin: f64,
) -> HeadroomResult {
    let export_cap_kwh = pv_energy_today.max(forecast_total_today) + safety_margin;
    HeadroomResult {
        export_cap_kwh,
        headroom_kwh: export_cap_kwh - exported_today,
    }
}
