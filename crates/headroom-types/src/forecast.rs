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

/// One interval of a carbon-intensity forecast, `[start, end)` in UTC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// gCO2/kWh
    pub intensity_value: f64,
    /// Provider band, e.g. "low", "very high"
    pub intensity_label: String,
}

impl ForecastPeriod {
    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 60_000.0
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Normalised forecast feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedForecast {
    pub periods: Vec<ForecastPeriod>,
    /// Provider region name, empty when the feed has none
    pub region: String,
}
