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

pub mod config;
pub mod control;
pub mod forecast;
pub mod health;
pub mod point;
pub mod schedule;
pub mod snapshot;
pub mod time_window;
pub mod validation;

// Re-export common types for convenience
pub use config::{
    ChargeConfig, ChargePointsConfig, DischargeConfig, EngineConfig, PlanningConfig, PointsConfig,
    SafetyConfig, ZeroTargetPolicy,
};
pub use control::{ControlKind, ControlState, Session, StopReason, WindowKey};
pub use forecast::{ForecastPeriod, ParsedForecast};
pub use health::{BreakerStatus, HealthReport};
pub use point::{PointReading, ReadingKind};
pub use schedule::ScheduleWindow;
pub use snapshot::{ReserveStatus, Snapshot};
pub use time_window::TimeWindow;
pub use validation::{ValidationIssue, ValidationResult, ValidationSeverity};
