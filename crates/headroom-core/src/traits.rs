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

use anyhow::Result;
use async_trait::async_trait;
use headroom_types::PointReading;
use serde_json::{Value, json};
use std::fmt;

/// Access to the host's sensor/actuator registry.
///
/// Implementations live in adapter crates (e.g. the Home Assistant REST
/// adapter); the engine only sees named points and service calls.
#[async_trait]
pub trait PointRegistry: Send + Sync {
    /// Read the current state of a point
    async fn read(&self, point_id: &str) -> Result<PointReading>;

    /// Issue a command on the host's service bus
    async fn invoke(&self, call: &ServiceCall) -> Result<()>;

    /// Registry name for logging
    fn name(&self) -> &str;
}

/// A command on the host's service bus: `domain.service` with a JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Value,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>, data: Value) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data,
        }
    }

    /// Write a numeric set-point (`number.set_value` and friends)
    pub fn set_value(point_id: &str, value: f64) -> Self {
        Self::new(
            point_domain(point_id),
            "set_value",
            json!({ "entity_id": point_id, "value": value }),
        )
    }

    /// Switch a point on; buttons are pressed instead
    pub fn turn_on(point_id: &str) -> Self {
        let domain = point_domain(point_id);
        let service = if is_button(point_id) {
            "press"
        } else {
            "turn_on"
        };
        Self::new(domain, service, json!({ "entity_id": point_id }))
    }

    pub fn turn_off(point_id: &str) -> Self {
        Self::new(
            point_domain(point_id),
            "turn_off",
            json!({ "entity_id": point_id }),
        )
    }

    /// Point targeted by this call, if any
    pub fn point_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(Value::as_str)
    }
}

impl fmt::Display for ServiceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.service)
    }
}

/// Domain prefix of a point id (`number.battery_power` -> `number`)
pub fn point_domain(point_id: &str) -> &str {
    point_id
        .split_once('.')
        .map_or("homeassistant", |(domain, _)| domain)
}

/// Buttons are stateless: they can be pressed but not switched off or verified
pub fn is_button(point_id: &str) -> bool {
    matches!(point_domain(point_id), "button" | "input_button")
}
