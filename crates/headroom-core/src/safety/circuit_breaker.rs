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
use headroom_types::BreakerStatus;
use tracing::{error, info, warn};

/// Refuses attempts after repeated failures of one logical operation.
///
/// Closed until `failure_threshold` consecutive failures, then open for
/// `timeout`. After the cooldown exactly one trial attempt is allowed: its
/// success closes the breaker, its failure reopens it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: TimeDelta,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    open: bool,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, timeout: TimeDelta) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            timeout,
            failure_count: 0,
            last_failure_time: None,
            open: false,
            trial_in_flight: false,
        }
    }

    /// Whether an attempt may be made now. Consumes the trial slot when the
    /// cooldown has just elapsed.
    pub fn can_attempt(&mut self, now: DateTime<Utc>) -> bool {
        if self.trial_in_flight {
            return false;
        }
        if !self.open {
            return true;
        }

        let cooled_down = self
            .last_failure_time
            .is_none_or(|last| now - last >= self.timeout);
        if cooled_down {
            info!(
                "🛡️ [SAFETY] Circuit breaker '{}' cooled down, allowing one trial attempt",
                self.name
            );
            self.open = false;
            self.failure_count = 0;
            self.trial_in_flight = true;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        if self.open || self.trial_in_flight || self.failure_count > 0 {
            info!("✅ [SAFETY] Circuit breaker '{}' closed", self.name);
        }
        self.failure_count = 0;
        self.open = false;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.last_failure_time = Some(now);

        if self.trial_in_flight {
            self.trial_in_flight = false;
            self.failure_count = self.failure_threshold;
            self.open = true;
            warn!(
                "⚠️ [SAFETY] Probe attempt for '{}' failed, circuit breaker reopened",
                self.name
            );
            return;
        }

        self.failure_count += 1;
        if self.failure_count >= self.failure_threshold && !self.open {
            self.open = true;
            error!(
                "❌ [SAFETY] Circuit breaker '{}' opened after {} consecutive failures",
                self.name, self.failure_count
            );
        } else {
            warn!(
                "⚠️ [SAFETY] '{}' failure {}/{}",
                self.name, self.failure_count, self.failure_threshold
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            open: self.open,
            failure_count: self.failure_count,
            last_failure: self.last_failure_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("discharge", 5, TimeDelta::seconds(60))
    }

    #[test]
    fn test_opens_after_threshold() {
        let mut cb = breaker();
        for i in 0..4 {
            cb.record_failure(t0() + TimeDelta::seconds(i));
            assert!(cb.can_attempt(t0() + TimeDelta::seconds(i)));
        }
        cb.record_failure(t0() + TimeDelta::seconds(4));
        assert!(cb.is_open());
        assert!(!cb.can_attempt(t0() + TimeDelta::seconds(5)));
        assert!(!cb.can_attempt(t0() + TimeDelta::seconds(63)));
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let mut cb = breaker();
        for _ in 0..5 {
            cb.record_failure(t0());
        }

        let later = t0() + TimeDelta::seconds(60);
        assert!(cb.can_attempt(later));
        assert!(!cb.can_attempt(later));
        assert!(!cb.can_attempt(later + TimeDelta::seconds(1)));

        cb.record_success();
        assert!(cb.can_attempt(later + TimeDelta::seconds(2)));
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let mut cb = breaker();
        for _ in 0..5 {
            cb.record_failure(t0());
        }
        let later = t0() + TimeDelta::seconds(61);
        assert!(cb.can_attempt(later));

        cb.record_failure(later);
        assert!(cb.is_open());
        assert!(!cb.can_attempt(later + TimeDelta::seconds(30)));
        assert!(cb.can_attempt(later + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_success_resets_count() {
        let mut cb = breaker();
        cb.record_failure(t0());
        cb.record_failure(t0());
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        for _ in 0..4 {
            cb.record_failure(t0());
        }
        assert!(!cb.is_open());
    }

    #[test]
    fn test_status() {
        let mut cb = breaker();
        cb.record_failure(t0());
        let status = cb.status();
        assert!(!status.open);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.last_failure, Some(t0()));
    }
}
