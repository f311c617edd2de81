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


use anyhow::{Context, Result};
use chrono_tz::Tz;
use headroom_core::types::{
    ChargeConfig, DischargeConfig, EngineConfig, PlanningConfig, PointsConfig, SafetyConfig,
    ValidationResult,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const ADDON_OPTIONS_PATH: &str = "/data/options.json";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
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

    /// Process-level settings, not passed to the engine
    #[serde(default)]
    pub system: SystemConfig,
}

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Home Assistant base URL (optional, defaults to supervisor)
    #[serde(default)]
    pub ha_base_url: Option<String>,

    /// Home Assistant token (optional, uses SUPERVISOR_TOKEN if not set)
    #[serde(default)]
    pub ha_token: Option<String>,

    /// Control loop interval (seconds)
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Port of the command/health HTTP surface
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// IANA timezone for time-of-day windows; fetched from HA when unset
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            ha_base_url: None,
            ha_token: None,
            update_interval_secs: default_update_interval_secs(),
            web_port: default_web_port(),
            timezone: None,
        }
    }
}

impl SystemConfig {
    /// Checks for the process-level settings
    pub fn validate_detailed(&self) -> ValidationResult {
        let mut result = ValidationResult::success();

        if self.update_interval_secs == 0 {
            result.add_error(
                "system.update_interval_secs",
                "Update interval must be at least 1 second",
            );
        } else if self.update_interval_secs > 300 {
            result.add_warning(
                "system.update_interval_secs",
                format!(
                    "Update interval of {}s is slow for auto-stop decisions",
                    self.update_interval_secs
                ),
            );
        }

        if self.web_port == 0 {
            result.add_error("system.web_port", "Web port cannot be 0");
        }

        if let Some(url) = &self.ha_base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                result.add_error(
                    "system.ha_base_url",
                    format!("'{url}' must start with http:// or https://"),
                );
            }
        }

        if let Some(timezone) = &self.timezone {
            if timezone.parse::<Tz>().is_err() {
                result.add_error(
                    "system.timezone",
                    format!("'{timezone}' is not a known IANA timezone"),
                );
            }
        }

        result
    }
}

fn default_update_interval_secs() -> u64 {
    10
}

fn default_web_port() -> u16 {
    8099
}

impl AppConfig {
    /// Load configuration: explicit path, HA addon options, config.toml, config.json,
    /// then defaults with environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            info!("✅ Loaded configuration from {}", path.display());
            config.validate()?;
            return Ok(config);
        }

        for candidate in [ADDON_OPTIONS_PATH, "config.toml", "config.json"] {
            let path = Path::new(candidate);
            if path.exists() {
                let config = Self::from_file(path)?;
                info!("✅ Loaded configuration from {candidate}");
                config.validate()?;
                return Ok(config);
            }
        }

        warn!("No configuration file found, using defaults with environment overrides");
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))
        }
    }

    /// Defaults with environment overrides (development/testing)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("HA_BASE_URL") {
            self.system.ha_base_url = Some(url);
        }
        if let Some(token) = lookup("HA_TOKEN") {
            self.system.ha_token = Some(token);
        }
        if let Some(secs) = lookup("UPDATE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.system.update_interval_secs = secs;
        }
        if let Some(port) = lookup("WEB_PORT").and_then(|v| v.parse().ok()) {
            self.system.web_port = port;
        }
        if let Some(timezone) = lookup("TIMEZONE") {
            self.system.timezone = Some(timezone);
        }
    }

    /// Engine validation plus system section checks
    pub fn validate_detailed(&self) -> ValidationResult {
        let mut result = self.engine_config().validate_detailed();
        result.merge(self.system.validate_detailed());
        result
    }

    /// Validate and fail on the first error; warnings are logged
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_detailed();
        for warning in &result.warnings {
            warn!("⚠️ Config: {}: {}", warning.field, warning.message);
        }
        match result.first_error() {
            Some(error) => anyhow::bail!("Invalid configuration: {error}"),
            None => Ok(()),
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.system.update_interval_secs)
    }

    /// Configured timezone, if it parses
    pub fn timezone(&self) -> Option<Tz> {
        self.system
            .timezone
            .as_deref()
            .and_then(|tz| tz.parse::<Tz>().ok())
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::from(self.clone())
    }
}

impl From<AppConfig> for EngineConfig {
    fn from(app_config: AppConfig) -> Self {
        Self {
            points: app_config.points,
            discharge: app_config.discharge,
            charge: app_config.charge,
            planning: app_config.planning,
            safety: app_config.safety,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const ADDON_OPTIONS: &str = r#"{
        "points": {
            "discharge_button": "switch.force_discharge",
            "discharge_power": "number.discharge_power",
            "discharge_cutoff_soc": "number.discharge_cutoff",
            "current_soc": "sensor.battery_soc",
            "pv_energy_today": "sensor.pv_today",
            "grid_feed_today": "sensor.feed_today",
            "solcast_total_today": "sensor.solcast_today"
        },
        "discharge": { "target_export": 3000, "min_soc": 25 },
        "system": { "update_interval_secs": 15 }
    }"#;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_system_config() {
        let config = AppConfig::default();
        assert_eq!(config.system.update_interval_secs, 10);
        assert_eq!(config.system.web_port, 8099);
        assert!(config.system.timezone.is_none());
        assert_eq!(config.update_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_default_config_is_invalid_without_points() {
        let result = AppConfig::default().validate_detailed();
        assert!(!result.valid);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.field == "points.discharge_enable")
        );
    }

    #[test]
    fn test_load_json_from_explicit_path() {
        let file = write_temp(".json", ADDON_OPTIONS);
        let config = AppConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.points.discharge_enable, "switch.force_discharge");
        assert_eq!(config.discharge.target_export_w, 3000.0);
        assert_eq!(config.discharge.min_soc, 25.0);
        assert_eq!(config.system.update_interval_secs, 15);
        assert_eq!(config.system.web_port, 8099);
    }

    #[test]
    fn test_load_toml_from_explicit_path() {
        let toml_config = r#"
[points]
discharge_enable = "switch.force_discharge"
discharge_power = "number.discharge_power"
discharge_cutoff_soc = "number.discharge_cutoff"
current_soc = "sensor.battery_soc"
pv_energy_today = "sensor.pv_today"
grid_feed_today = "sensor.feed_today"
forecast_total_today = "sensor.solcast_today"
carbon_intensity = "sensor.carbon_intensity"

[planning]
enable_ci_planning = true

[discharge.export_window]
start = "16:00"
end = "19:00"

[system]
web_port = 9000
timezone = "Europe/London"
"#;
        let file = write_temp(".toml", toml_config);
        let config = AppConfig::load(Some(file.path())).unwrap();

        assert!(config.planning.enable_ci_planning);
        assert_eq!(config.discharge.export_window.to_string(), "16:00-19:00");
        assert_eq!(config.system.web_port, 9000);
        assert_eq!(config.timezone(), Some(chrono_tz::Europe::London));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let file = write_temp(".json", "{ not json");
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let mut config: AppConfig = serde_json::from_str(ADDON_OPTIONS).unwrap();
        config.system.timezone = Some("Mars/Olympus_Mons".to_owned());

        let result = config.validate_detailed();
        assert!(result.errors.iter().any(|e| e.field == "system.timezone"));
        assert!(config.validate().is_err());
        assert!(config.timezone().is_none());
    }

    #[test]
    fn test_zero_update_interval_rejected() {
        let mut config: AppConfig = serde_json::from_str(ADDON_OPTIONS).unwrap();
        config.system.update_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_and_system_issues_are_reported_together() {
        let mut config: AppConfig = serde_json::from_str(ADDON_OPTIONS).unwrap();
        config.discharge.min_soc = 150.0;
        config.system.web_port = 0;

        let result = config.validate_detailed();
        assert!(!result.valid);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["discharge.min_soc", "system.web_port"]);
    }

    #[test]
    fn test_slow_update_interval_is_warning() {
        let mut config: AppConfig = serde_json::from_str(ADDON_OPTIONS).unwrap();
        config.system.update_interval_secs = 600;

        let result = config.validate_detailed();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut config: AppConfig = serde_json::from_str(ADDON_OPTIONS).unwrap();
        config.system.ha_base_url = Some("homeassistant.local:8123".to_owned());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HA_BASE_URL", "http://ha.local:8123"),
            ("HA_TOKEN", "secret"),
            ("UPDATE_INTERVAL_SECS", "30"),
            ("WEB_PORT", "not-a-port"),
            ("TIMEZONE", "Europe/Prague"),
        ]);

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| (*v).to_owned()));

        assert_eq!(
            config.system.ha_base_url.as_deref(),
            Some("http://ha.local:8123")
        );
        assert_eq!(config.system.ha_token.as_deref(), Some("secret"));
        assert_eq!(config.system.update_interval_secs, 30);
        assert_eq!(config.system.web_port, 8099);
        assert_eq!(config.timezone(), Some(chrono_tz::Europe::Prague));
    }

    #[test]
    fn test_into_engine_config() {
        let config: AppConfig = serde_json::from_str(ADDON_OPTIONS).unwrap();
        let engine = EngineConfig::from(config);
        assert_eq!(engine.points.current_soc, "sensor.battery_soc");
        assert_eq!(engine.discharge.min_soc, 25.0);
        assert!(engine.validate().is_ok());
    }
}
