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

pub mod control_loop;
pub mod coordinator;
pub mod duration;
pub mod errors;
pub mod forecast;
pub mod headroom;
pub mod notifications;
pub mod planner;
pub mod readings;
pub mod safety;
pub mod traits;
pub mod trigger;

// Re-export types crate so downstream crates need a single dependency
pub use headroom_types as types;

pub use control_loop::{
    CommandReply, ControlChannel, ControlCommand, ControlError, ControlLoop, ControlSender,
    PublishedState, SharedState,
};
pub use coordinator::{Coordinator, StartOrigin, TickEvent, TickOutcome};
pub use duration::{compute_duration_minutes, recommended_power_w};
pub use errors::{ActuationStep, EngineError, EngineResult};
pub use forecast::{current_intensity, parse_forecast};
pub use headroom::{HeadroomResult, compute_headroom};
pub use notifications::{NotificationKind, Notifier};
pub use planner::{DayFilter, PlanRequest, Selection, plan};
pub use safety::{
    ActuationPolicy, CircuitBreaker, ExpectedValue, StaleDataDetector, Verification, safe_invoke,
};
pub use traits::{PointRegistry, ServiceCall};
