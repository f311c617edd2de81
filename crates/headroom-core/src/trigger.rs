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

//! Start/stop decisions for the discharge and charge loops.
//!
//! Both loops are IDLE/ACTIVE machines. Starting fires once per planned
//! window within a short grace period after the window opens; stopping is
//! evaluated every tick while a session is active.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use headroom_types::{ControlState, ScheduleWindow, Session, StopReason, WindowKey};

/// How long after a window opens it may still trigger
pub const TRIGGER_GRACE_MINUTES: i64 = 5;

/// Readings relevant to ending a discharge session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DischargeObservation {
    pub headroom_kwh: f64,
    pub exported_today_kwh: f64,
    pub current_soc: f64,
    /// Reserve floor, only set while reserve monitoring is enabled
    pub reserve_soc: Option<f64>,
}

/// Identity of a window for once-per-day triggering.
///
/// Keyed on the forecast period rather than the (possibly clipped) window
/// start so a window in progress keeps the same key across ticks.
pub fn window_key(window: &ScheduleWindow, tz: Tz) -> WindowKey {
    let local = window.period_start.with_timezone(&tz);
    WindowKey {
        date: local.date_naive(),
        start: local.time(),
    }
}

/// First window, in chronological order, that should start now.
///
/// Nothing fires while the loop is already active. Windows already
/// triggered today are skipped; missed windows are not caught up on.
pub fn due_window<'a>(
    state: &ControlState,
    plan: &'a [ScheduleWindow],
    now: DateTime<Utc>,
    tz: Tz,
) -> Option<(WindowKey, &'a ScheduleWindow)> {
    if state.is_active() {
        return None;
    }

    let grace = TimeDelta::minutes(TRIGGER_GRACE_MINUTES);
    let mut ordered: Vec<&ScheduleWindow> = plan.iter().collect();
    ordered.sort_by_key(|w| w.start);

    ordered.into_iter().find_map(|window| {
        let since_start = now - window.start;
        if since_start < TimeDelta::zero() || since_start > grace {
            return None;
        }
        let key = window_key(window, tz);
        (!state.already_triggered(&key)).then_some((key, window))
    })
}

/// Reason to end an active discharge session, in priority order:
/// headroom exhausted, energy target reached, reserve floor breached.
pub fn discharge_stop_reason(session: &Session, observed: &DischargeObservation) -> Option<StopReason> {
    if observed.headroom_kwh <= 0.0 {
        return Some(StopReason::HeadroomExhausted);
    }

    let exported_since_start = observed.exported_today_kwh - session.start_reference;
    if exported_since_start >= session.target_energy_kwh {
        return Some(StopReason::TargetReached);
    }

    match observed.reserve_soc {
        Some(reserve) if observed.current_soc < reserve => Some(StopReason::ReserveBreached),
        _ => None,
    }
}

/// Reason to end an active charge session: full battery or target energy
/// stored since the session started.
pub fn charge_stop_reason(session: &Session, current_soc: f64, battery_capacity_kwh: f64) -> Option<StopReason> {
    let stored_kwh = (current_soc - session.start_reference) / 100.0 * battery_capacity_kwh;
    (current_soc >= 100.0 || stored_kwh >= session.target_energy_kwh)
        .then_some(StopReason::TargetReached)
}
