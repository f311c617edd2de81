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

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::time_window::TimeWindow;
use crate::validation::ValidationResult;

// ============= Engine Configuration =============

/// Typed engine configuration, assembled once per (re)load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Registry point identifiers
    pub points: PointsConfig,

    #[serde(default)]
    pub discharge: DischargeConfig,

    #[serde(default)]
    pub charge: ChargeConfig,

    #[serde(default)]
    pub planning: PlanningConfig,

    #[serde(default)]
    pub safety: SafetyConfig,
}

/// Point identifiers in the host registry.
/// Aliases accept the key names used by the HA add-on options form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Switch that enables forced discharge
    #[serde(alias = "discharge_button")]
    pub discharge_enable: String,

    /// Discharge power set-point (kW)
    pub discharge_power: String,

    /// Discharge cutoff SOC set-point (%)
    pub discharge_cutoff_soc: String,

    /// Battery state of charge (%)
    pub current_soc: String,

    /// PV energy produced today (kWh)
    pub pv_energy_today: String,

    /// Energy exported to the grid today (kWh)
    pub grid_feed_today: String,

    /// Forecast PV production for today (kWh)
    #[serde(alias = "solcast_total_today")]
    pub forecast_total_today: String,

    /// Forecast PV production so far today (kWh)
    #[serde(default, alias = "solcast_forecast_so_far")]
    pub forecast_so_far: Option<String>,

    /// Forecast PV production for tomorrow (kWh)
    #[serde(default, alias = "solcast_tomorrow")]
    pub forecast_tomorrow: Option<String>,

    /// Reserve SOC floor reported by the inverter (%)
    #[serde(default, alias = "reserve_soc_sensor")]
    pub reserve_soc: Option<String>,

    /// Carbon-intensity forecast feed
    #[serde(default, alias = "ci_forecast_sensor")]
    pub carbon_intensity: Option<String>,

    /// Optional forced-discharge duration set-point (minutes)
    #[serde(default)]
    pub discharge_duration: Option<String>,

    /// Charge control points, required only for charge commands
    #[serde(default)]
    pub charge: Option<ChargePointsConfig>,
}

/// Points used to run a grid charge session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointsConfig {
    /// Switch (or button) that starts forced charging
    #[serde(alias = "charge_button")]
    pub enable: String,

    /// Charge power set-point (kW)
    #[serde(default, alias = "charge_power_entity")]
    pub power: Option<String>,

    /// Charge duration set-point (minutes)
    #[serde(default, alias = "charge_duration")]
    pub duration: Option<String>,

    /// Charge cutoff SOC set-point (%)
    #[serde(default, alias = "charge_cutoff_soc")]
    pub cutoff_soc: Option<String>,
}

/// What to recommend when no fixed export power is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroTargetPolicy {
    /// Spread the whole headroom over one hour
    #[default]
    HeadroomOverHour,
    /// Do not discharge at all
    NoDischarge,
}

/// Discharge policy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeConfig {
    /// Fixed export power during forced discharge (W), 0 = not set
    #[serde(default, alias = "target_export")]
    pub target_export_w: f64,

    /// Never start discharging at or below this SOC (%)
    #[serde(default = "default_min_soc")]
    pub min_soc: f64,

    /// Added on top of the export allowance (kWh)
    #[serde(default = "default_safety_margin", alias = "safety_margin")]
    pub safety_margin_kwh: f64,

    /// Fraction added to discharge durations for unmodelled house load
    #[serde(default = "default_background_load_buffer")]
    pub background_load_buffer: f64,

    #[serde(default)]
    pub zero_target_policy: ZeroTargetPolicy,

    /// Start discharge automatically at planned windows
    #[serde(default)]
    pub enable_auto_discharge: bool,

    /// Stop discharge when SOC drops below the inverter reserve
    #[serde(default)]
    pub observe_reserve_soc: bool,

    /// Local time-of-day window in which exports may be planned
    #[serde(default = "default_export_window")]
    pub export_window: TimeWindow,
}

impl Default for DischargeConfig {
    fn default() -> Self {
        Self {
            target_export_w: 0.0,
            min_soc: default_min_soc(),
            safety_margin_kwh: default_safety_margin(),
            background_load_buffer: default_background_load_buffer(),
            zero_target_policy: ZeroTargetPolicy::default(),
            export_window: default_export_window(),
            enable_auto_discharge: false,
            observe_reserve_soc: false,
        }
    }
}

/// Grid charge planning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeConfig {
    #[serde(default)]
    pub enable_charge_planning: bool,

    #[serde(default)]
    pub enable_auto_charge: bool,

    /// Charge power used for planning (kW)
    #[serde(default = "default_charge_power_kw")]
    pub charge_power_kw: f64,

    /// Usable battery capacity (kWh)
    #[serde(default = "default_battery_capacity_kwh")]
    pub battery_capacity_kwh: f64,

    /// Local time-of-day window for grid charging
    #[serde(default = "default_charge_window")]
    pub window: TimeWindow,
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            enable_charge_planning: false,
            enable_auto_charge: false,
            window: default_charge_window(),
            charge_power_kw: default_charge_power_kw(),
            battery_capacity_kwh: default_battery_capacity_kwh(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Plan discharge windows against the carbon-intensity forecast
    #[serde(default)]
    pub enable_ci_planning: bool,
}

/// Actuation safety parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Consecutive failures before the circuit breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before a trial attempt is allowed (seconds)
    #[serde(default = "default_breaker_timeout_secs")]
    pub breaker_timeout_secs: u64,

    /// Data older than this vetoes new discharge starts (seconds)
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Hard timeout for one service call (seconds)
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: f64,

    /// How long to wait for a set-point to read back (seconds)
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: f64,

    /// Read-back poll interval (milliseconds)
    #[serde(default = "default_verify_poll_interval_ms")]
    pub verify_poll_interval_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            breaker_timeout_secs: default_breaker_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            service_timeout_secs: default_service_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
            verify_poll_interval_ms: default_verify_poll_interval_ms(),
        }
    }
}

impl SafetyConfig {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.service_timeout_secs.max(0.0))
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.verify_timeout_secs.max(0.0))
    }

    pub fn verify_poll_interval(&self) -> Duration {
        Duration::from_millis(self.verify_poll_interval_ms)
    }
}

fn default_min_soc() -> f64 {
    20.0 // %
}

fn default_safety_margin() -> f64 {
    0.5 // kWh
}

fn default_background_load_buffer() -> f64 {
    0.10
}

fn default_export_window() -> TimeWindow {
    TimeWindow::new(NaiveTime::MIN, hm(23, 59))
}

fn default_charge_window() -> TimeWindow {
    TimeWindow::new(hm(23, 30), hm(5, 30))
}

fn default_charge_power_kw() -> f64 {
    3.68 // single-phase 16 A
}

fn default_battery_capacity_kwh() -> f64 {
    10.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

fn default_stale_after_secs() -> u64 {
    30
}

fn default_service_timeout_secs() -> f64 {
    5.0
}

fn default_verify_timeout_secs() -> f64 {
    5.0
}

fn default_verify_poll_interval_ms() -> u64 {
    250
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl EngineConfig {
    /// Validate with field-level errors and warnings
    pub fn validate_detailed(&self) -> ValidationResult {
        let mut result = ValidationResult::success();
        let points = &self.points;

        let required = [
            ("points.discharge_enable", &points.discharge_enable),
            ("points.discharge_power", &points.discharge_power),
            ("points.discharge_cutoff_soc", &points.discharge_cutoff_soc),
            ("points.current_soc", &points.current_soc),
            ("points.pv_energy_today", &points.pv_energy_today),
            ("points.grid_feed_today", &points.grid_feed_today),
            ("points.forecast_total_today", &points.forecast_total_today),
        ];
        for (field, point) in required {
            check_point_id(&mut result, field, point);
        }

        let optional = [
            ("points.forecast_so_far", &points.forecast_so_far),
            ("points.forecast_tomorrow", &points.forecast_tomorrow),
            ("points.reserve_soc", &points.reserve_soc),
            ("points.carbon_intensity", &points.carbon_intensity),
            ("points.discharge_duration", &points.discharge_duration),
        ];
        for (field, point) in optional {
            if let Some(point) = point {
                check_point_id(&mut result, field, point);
            }
        }

        if let Some(charge) = &points.charge {
            check_point_id(&mut result, "points.charge.enable", &charge.enable);
            for (field, point) in [
                ("points.charge.power", &charge.power),
                ("points.charge.duration", &charge.duration),
                ("points.charge.cutoff_soc", &charge.cutoff_soc),
            ] {
                if let Some(point) = point {
                    check_point_id(&mut result, field, point);
                }
            }
        }

        // Discharge policy
        let discharge = &self.discharge;
        if !(0.0..=100.0).contains(&discharge.min_soc) {
            result.add_error("discharge.min_soc", "Must be between 0 and 100");
        }
        if discharge.target_export_w < 0.0 {
            result.add_error("discharge.target_export_w", "Must be non-negative");
        }
        if discharge.safety_margin_kwh < 0.0 {
            result.add_error("discharge.safety_margin_kwh", "Must be non-negative");
        }
        if !(0.0..=1.0).contains(&discharge.background_load_buffer) {
            result.add_error(
                "discharge.background_load_buffer",
                "Must be between 0.0 and 1.0",
            );
        }
        if discharge.target_export_w == 0.0
            && discharge.zero_target_policy == ZeroTargetPolicy::NoDischarge
        {
            result.add_warning(
                "discharge.target_export_w",
                "No target export power set and zero_target_policy = no_discharge: discharge will never be recommended",
            );
        }
        if discharge.observe_reserve_soc && points.reserve_soc.is_none() {
            result.add_warning(
                "discharge.observe_reserve_soc",
                "Reserve SOC observation enabled but points.reserve_soc is not set",
            );
        }

        // Charge planning
        let charge = &self.charge;
        if charge.charge_power_kw <= 0.0 {
            result.add_error("charge.charge_power_kw", "Must be positive");
        }
        if charge.battery_capacity_kwh <= 0.0 {
            result.add_error("charge.battery_capacity_kwh", "Must be positive");
        }
        if charge.enable_auto_charge {
            if points.charge.is_none() {
                result.add_error(
                    "charge.enable_auto_charge",
                    "Auto charge requires points.charge to be configured",
                );
            }
            if !charge.enable_charge_planning {
                result.add_warning(
                    "charge.enable_auto_charge",
                    "Auto charge has no effect while charge planning is disabled",
                );
            }
        }
        if charge.enable_charge_planning && points.carbon_intensity.is_none() {
            result.add_warning(
                "charge.enable_charge_planning",
                "Charge planning needs points.carbon_intensity",
            );
        }

        if self.planning.enable_ci_planning && points.carbon_intensity.is_none() {
            result.add_warning(
                "planning.enable_ci_planning",
                "Carbon-intensity planning enabled but points.carbon_intensity is not set",
            );
        }

        // Safety
        let safety = &self.safety;
        if safety.failure_threshold == 0 {
            result.add_error("safety.failure_threshold", "Must be at least 1");
        }
        if safety.service_timeout_secs <= 0.0 {
            result.add_error("safety.service_timeout_secs", "Must be positive");
        }
        if safety.verify_timeout_secs < 0.0 {
            result.add_error("safety.verify_timeout_secs", "Must be non-negative");
        }
        if safety.verify_poll_interval_ms == 0 {
            result.add_error("safety.verify_poll_interval_ms", "Must be positive");
        }
        if safety.stale_after_secs < 10 {
            result.add_warning(
                "safety.stale_after_secs",
                format!(
                    "Very short staleness threshold ({}s) will veto most discharge starts",
                    safety.stale_after_secs
                ),
            );
        }

        result
    }

    /// Validate and fail on the first error
    pub fn validate(&self) -> anyhow::Result<()> {
        let result = self.validate_detailed();
        match result.first_error() {
            Some(error) => anyhow::bail!("Invalid configuration: {error}"),
            None => Ok(()),
        }
    }
}

fn check_point_id(result: &mut ValidationResult, field: &str, point: &str) {
    if point.trim().is_empty() {
        result.add_error(field, "Point identifier cannot be empty");
    } else if !point.contains('.') {
        result.add_error(
            field,
            format!("'{point}' is not a valid point identifier (expected domain.object_id)"),
        );
    }
}
