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

/// Circuit breaker view for health reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub open: bool,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Health of the control loop, published after every tick attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Last successful tick
    pub last_update: Option<DateTime<Utc>>,
    /// Seconds since the last successful tick
    pub data_age_seconds: Option<f64>,
    /// True when the last successful tick is older than the staleness threshold
    pub stale: bool,
    /// Staleness threshold (seconds)
    #[serde(default)]
    pub stale_after_seconds: u64,
    /// Outcome of the most recent tick
    pub last_update_success: bool,
    /// Identifier of the most recent unresolved failure
    pub error_state: Option<String>,
    pub discharge_breaker: BreakerStatus,
    pub charge_breaker: BreakerStatus,
}

impl HealthReport {
    /// Age and staleness recomputed against `now`, for readers that may
    /// look at a report long after it was published
    #[must_use]
    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        let threshold_ms = i64::try_from(self.stale_after_seconds.saturating_mul(1000))
            .unwrap_or(i64::MAX);
        let age_ms = self.last_update.map(|last| (now - last).num_milliseconds());

        self.data_age_seconds = age_ms.map(|ms| ms as f64 / 1000.0);
        self.stale = age_ms.is_none_or(|ms| ms > threshold_ms);
        self
    }
}
