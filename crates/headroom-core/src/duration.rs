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

use headroom_types::ZeroTargetPolicy;

/// Default share of extra time for unmodelled house consumption
pub const DEFAULT_BACKGROUND_LOAD_BUFFER: f64 = 0.10;

/// Minutes needed to export `headroom_kwh` at `power_w`, lengthened by
/// `background_load_buffer` and rounded to one decimal.
///
/// Zero when there is nothing to export or no power to export it with.
pub fn compute_duration_minutes(headroom_kwh: f64, power_w: f64, background_load_buffer: f64) -> f64 {
    if power_w <= 0.0 || headroom_kwh <= 0.0 {
        return 0.0;
    }
    let minutes = headroom_kwh / (power_w / 1000.0) * 60.0 * (1.0 + background_load_buffer);
    (minutes * 10.0).round() / 10.0
}

/// Power (W) to discharge at for the current headroom.
///
/// A configured target export wins. Without one the zero-target policy
/// decides: spread the headroom over one hour, or do nothing.
pub fn recommended_power_w(target_export_w: f64, headroom_kwh: f64, policy: ZeroTargetPolicy) -> f64 {
    if target_export_w > 0.0 {
        return target_export_w;
    }
    match policy {
        ZeroTargetPolicy::HeadroomOverHour => headroom_kwh.max(0.0) * 1000.0,
        ZeroTargetPolicy::NoDischarge => 0.0,
    }
}
