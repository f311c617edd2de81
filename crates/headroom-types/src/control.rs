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

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two independent battery control loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Discharge,
    Charge,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discharge => "discharge",
            Self::Charge => "charge",
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an active session was (or should be) ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Export allowance used up
    HeadroomExhausted,
    /// Session energy target delivered
    TargetReached,
    /// SOC fell below the inverter reserve floor
    ReserveBreached,
    /// Operator or external command
    External,
}

impl StopReason {
    /// Stops that protect the export contract or the battery floor
    pub fn is_safety_critical(&self) -> bool {
        matches!(self, Self::HeadroomExhausted | Self::ReserveBreached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeadroomExhausted => "headroom_exhausted",
            Self::TargetReached => "target_reached",
            Self::ReserveBreached => "reserve_breached",
            Self::External => "external",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a planned window within one local day, used to fire each
/// window at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub date: NaiveDate,
    pub start: NaiveTime,
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.date, self.start.format("%H:%M"))
    }
}

/// A running discharge or charge session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Exported energy (kWh) for discharge, SOC (%) for charge, at start
    pub start_reference: f64,
    /// Energy the session is expected to move (kWh)
    pub target_energy_kwh: f64,
    pub start_time: DateTime<Utc>,
}

/// Session state of one control loop.
///
/// Session fields only exist while active; the trigger key survives the
/// session and is cleared at local-date rollover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    session: Option<Session>,
    last_triggered_window: Option<WindowKey>,
}

impl ControlState {
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Replace the session; `None` ends it
    pub fn set_session(&mut self, session: Option<Session>) -> Option<Session> {
        std::mem::replace(&mut self.session, session)
    }

    pub fn last_triggered_window(&self) -> Option<WindowKey> {
        self.last_triggered_window
    }

    pub fn record_trigger(&mut self, key: WindowKey) {
        self.last_triggered_window = Some(key);
    }

    pub fn already_triggered(&self, key: &WindowKey) -> bool {
        self.last_triggered_window.as_ref() == Some(key)
    }

    /// Clear the trigger key once the local date has moved on
    pub fn roll_over(&mut self, today: NaiveDate) {
        if self
            .last_triggered_window
            .is_some_and(|key| key.date != today)
        {
            self.last_triggered_window = None;
        }
    }
}
