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

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

/// Tracks the age of the last successful control-loop tick
#[derive(Debug, Clone)]
pub struct StaleDataDetector {
    max_age: TimeDelta,
    last_update: Option<DateTime<Utc>>,
}

impl StaleDataDetector {
    pub fn new(max_age: TimeDelta) -> Self {
        Self {
            max_age,
            last_update: None,
        }
    }

    pub fn record_update(&mut self, now: DateTime<Utc>) {
        self.last_update = Some(now);
    }

    /// Stale when never updated or older than the threshold
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_update {
            None => true,
            Some(last) => {
                let stale = now - last > self.max_age;
                if stale {
                    debug!(
                        "🛡️ [SAFETY] Data is stale: {}s old (max {}s)",
                        (now - last).num_seconds(),
                        self.max_age.num_seconds()
                    );
                }
                stale
            }
        }
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_update
            .map(|last| (now - last).num_milliseconds() as f64 / 1000.0)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Human-readable age for logs and errors
    pub fn describe_age(&self, now: DateTime<Utc>) -> String {
        self.age_seconds(now)
            .map_or_else(|| "never".to_owned(), |age| format!("{age:.0}s ago"))
    }
}
