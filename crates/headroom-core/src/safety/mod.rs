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

//! Guard rails around actuation: verified service calls, a circuit
//! breaker per control loop and a staleness detector for tick data.

mod actuation;
mod circuit_breaker;
mod staleness;

pub use actuation::{ActuationPolicy, ExpectedValue, VALUE_TOLERANCE, Verification, safe_invoke};
pub use circuit_breaker::CircuitBreaker;
pub use staleness::StaleDataDetector;
