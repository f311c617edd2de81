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

use serde::{Deserialize, Serialize};

/// States the host reports for points it cannot currently read
const UNAVAILABLE_STATES: [&str; 3] = ["unknown", "unavailable", "none"];

/// Current value of a registry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReading {
    pub point_id: String,
    /// Raw state string as reported by the host
    pub value: String,
    /// Side-channel attributes (JSON object, may be null)
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl PointReading {
    pub fn new(point_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            point_id: point_id.into(),
            value: value.into(),
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn is_available(&self) -> bool {
        let value = self.value.trim();
        !value.is_empty()
            && !UNAVAILABLE_STATES
                .iter()
                .any(|state| value.eq_ignore_ascii_case(state))
    }

    /// Numeric value, `None` when unavailable or not a finite number
    pub fn as_f64(&self) -> Option<f64> {
        if !self.is_available() {
            return None;
        }
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

/// Physical quantity of a numeric reading, with its plausible range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    /// State of charge (%)
    Soc,
    /// Energy counter (kWh)
    Energy,
    /// Instantaneous power (W)
    Power,
}

impl ReadingKind {
    /// Inclusive plausible range
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::Soc => (0.0, 100.0),
            Self::Energy => (0.0, 1000.0),
            Self::Power => (-50_000.0, 50_000.0),
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        let (min, max) = self.range();
        (min..=max).contains(&value)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Soc => "%",
            Self::Energy => "kWh",
            Self::Power => "W",
        }
    }
}
