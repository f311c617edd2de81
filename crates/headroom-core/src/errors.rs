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

use headroom_types::ControlKind;
use std::fmt;
use thiserror::Error;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Reading unavailable for {point}: {reason}")]
    DataUnavailable { point: String, reason: String },

    #[error("Reading for {point} out of range: {value}{unit} (expected {min}..={max})")]
    OutOfRange {
        point: String,
        value: f64,
        unit: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{control} {step} failed")]
    Actuation {
        control: ControlKind,
        step: ActuationStep,
    },

    #[error("Circuit breaker open for {0} control")]
    CircuitOpen(ControlKind),

    #[error("Data is stale (last update {age})")]
    StaleData { age: String },

    #[error("{control} request refused: {reason}")]
    Refused {
        control: ControlKind,
        reason: String,
    },

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),
}

impl EngineError {
    pub fn refused(control: ControlKind, reason: impl Into<String>) -> Self {
        Self::Refused {
            control,
            reason: reason.into(),
        }
    }

    /// Data problems abort a tick; everything else is a command failure
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::DataUnavailable { .. } | Self::OutOfRange { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Individual step of a start/stop actuation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuationStep {
    PowerSetpoint,
    CutoffSetpoint,
    EnableCommand,
    DisableCommand,
}

impl ActuationStep {
    /// Short identifier used in notification ids and error states
    pub fn id(&self) -> &'static str {
        match self {
            Self::PowerSetpoint => "power",
            Self::CutoffSetpoint => "cutoff",
            Self::EnableCommand => "start",
            Self::DisableCommand => "stop",
        }
    }
}

impl fmt::Display for ActuationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PowerSetpoint => "power set-point",
            Self::CutoffSetpoint => "cutoff set-point",
            Self::EnableCommand => "enable command",
            Self::DisableCommand => "disable command",
        })
    }
}
