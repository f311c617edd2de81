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

use crate::traits::{PointRegistry, ServiceCall};
use headroom_types::SafetyConfig;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, error, info, warn};

/// Numeric read-backs within this tolerance count as a match
pub const VALUE_TOLERANCE: f64 = 0.01;

/// Timing bounds for a single verified actuation
#[derive(Debug, Clone, Copy)]
pub struct ActuationPolicy {
    pub request_timeout: Duration,
    pub verify_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ActuationPolicy {
    fn default() -> Self {
        Self::from(&SafetyConfig::default())
    }
}

impl From<&SafetyConfig> for ActuationPolicy {
    fn from(config: &SafetyConfig) -> Self {
        Self {
            request_timeout: config.service_timeout(),
            verify_timeout: config.verify_timeout(),
            poll_interval: config.verify_poll_interval().max(Duration::from_millis(10)),
        }
    }
}

/// Value a point is expected to settle at after a command
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedValue {
    Text(String),
    Number(f64),
}

impl ExpectedValue {
    pub fn on() -> Self {
        Self::Text("on".to_owned())
    }

    pub fn off() -> Self {
        Self::Text("off".to_owned())
    }

    pub fn matches(&self, raw: &str) -> bool {
        match self {
            Self::Text(expected) => raw.trim().eq_ignore_ascii_case(expected),
            Self::Number(expected) => raw
                .trim()
                .parse::<f64>()
                .is_ok_and(|actual| (actual - expected).abs() <= VALUE_TOLERANCE),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub point_id: String,
    pub expected: ExpectedValue,
}

impl Verification {
    pub fn new(point_id: impl Into<String>, expected: ExpectedValue) -> Self {
        Self {
            point_id: point_id.into(),
            expected,
        }
    }
}

/// Issue a command and optionally confirm its effect.
///
/// Returns false on request error or timeout, or when the point has not
/// settled at the expected value before the verification deadline. Never
/// retries the command itself.
pub async fn safe_invoke(
    registry: &dyn PointRegistry,
    call: &ServiceCall,
    verification: Option<&Verification>,
    policy: &ActuationPolicy,
) -> bool {
    info!(
        "📞 [HA SERVICE] Calling {} on {}",
        call,
        call.point_id().unwrap_or("<no point>")
    );

    match timeout(policy.request_timeout, registry.invoke(call)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("❌ [HA SERVICE] {} failed: {:#}", call, e);
            return false;
        }
        Err(_) => {
            error!(
                "❌ [HA SERVICE] {} timed out after {:?}",
                call, policy.request_timeout
            );
            return false;
        }
    }

    let Some(verification) = verification else {
        return true;
    };

    let deadline = Instant::now() + policy.verify_timeout;
    let settled = timeout_at(deadline, poll_until_settled(registry, verification, policy)).await;

    match settled {
        Ok(()) => {
            debug!(
                "✅ [HA SERVICE] {} settled at {:?}",
                verification.point_id, verification.expected
            );
            true
        }
        Err(_) => {
            warn!(
                "⚠️ [SAFETY] {} did not reach {:?} within {:?}",
                verification.point_id, verification.expected, policy.verify_timeout
            );
            false
        }
    }
}

async fn poll_until_settled(
    registry: &dyn PointRegistry,
    verification: &Verification,
    policy: &ActuationPolicy,
) {
    loop {
        match registry.read(&verification.point_id).await {
            Ok(reading) if reading.is_available() => {
                if verification.expected.matches(&reading.value) {
                    return;
                }
                debug!(
                    "🔍 [HA QUERY] {} = {} (waiting for {:?})",
                    verification.point_id, reading.value, verification.expected
                );
            }
            Ok(reading) => {
                debug!(
                    "🔍 [HA QUERY] {} is {} while verifying",
                    verification.point_id, reading.value
                );
            }
            Err(e) => {
                debug!(
                    "🔍 [HA QUERY] Read of {} failed while verifying: {}",
                    verification.point_id, e
                );
            }
        }
        sleep(policy.poll_interval).await;
    }
}
