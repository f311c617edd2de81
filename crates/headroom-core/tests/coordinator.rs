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

//! Drives the coordinator and control loop against an in-memory registry.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use headroom_core::types::{
    ChargeConfig, ChargePointsConfig, ControlKind, DischargeConfig, EngineConfig, PlanningConfig,
    PointReading, PointsConfig, SafetyConfig, StopReason,
};
use headroom_core::{
    ActuationStep, ControlCommand, ControlLoop, Coordinator, EngineError, PointRegistry,
    ServiceCall, StartOrigin, TickEvent,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Registry backed by a map; commands update the map like a real inverter would
#[derive(Default)]
struct FakeRegistry {
    states: Mutex<HashMap<String, (String, Value)>>,
    calls: Mutex<Vec<ServiceCall>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeRegistry {
    fn set(&self, point: &str, value: &str) {
        self.states
            .lock()
            .insert(point.to_owned(), (value.to_owned(), Value::Null));
    }

    fn set_with_attributes(&self, point: &str, value: &str, attributes: Value) {
        self.states
            .lock()
            .insert(point.to_owned(), (value.to_owned(), attributes));
    }

    fn fail(&self, point: &str) {
        self.failing.lock().insert(point.to_owned());
    }

    fn recover(&self, point: &str) {
        self.failing.lock().remove(point);
    }

    fn value(&self, point: &str) -> Option<String> {
        self.states.lock().get(point).map(|(value, _)| value.clone())
    }

    fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    fn calls_to(&self, service: &str) -> Vec<ServiceCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.to_string() == service)
            .collect()
    }

    fn notification_ids(&self, service: &str) -> Vec<String> {
        self.calls_to(service)
            .iter()
            .filter_map(|call| call.data["notification_id"].as_str().map(ToOwned::to_owned))
            .collect()
    }
}

#[async_trait]
impl PointRegistry for FakeRegistry {
    async fn read(&self, point_id: &str) -> Result<PointReading> {
        match self.states.lock().get(point_id) {
            Some((value, attributes)) => {
                Ok(PointReading::new(point_id, value.clone()).with_attributes(attributes.clone()))
            }
            None => bail!("Entity not found: {point_id}"),
        }
    }

    async fn invoke(&self, call: &ServiceCall) -> Result<()> {
        self.calls.lock().push(call.clone());

        let Some(point) = call.point_id().map(ToOwned::to_owned) else {
            return Ok(());
        };
        if self.failing.lock().contains(&point) {
            bail!("Service call failed for {point}");
        }

        match call.service.as_str() {
            "set_value" => {
                let value = call.data["value"].as_f64().unwrap_or_default();
                self.set(&point, &value.to_string());
            }
            "turn_on" => self.set(&point, "on"),
            "turn_off" => self.set(&point, "off"),
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn points() -> PointsConfig {
    PointsConfig {
        discharge_enable: "switch.force_discharge".to_owned(),
        discharge_power: "number.discharge_power".to_owned(),
        discharge_cutoff_soc: "number.discharge_cutoff_soc".to_owned(),
        current_soc: "sensor.battery_soc".to_owned(),
        pv_energy_today: "sensor.pv_energy_today".to_owned(),
        grid_feed_today: "sensor.grid_feed_today".to_owned(),
        forecast_total_today: "sensor.forecast_today".to_owned(),
        carbon_intensity: Some("sensor.carbon_intensity".to_owned()),
        charge: Some(ChargePointsConfig {
            enable: "switch.force_charge".to_owned(),
            power: Some("number.charge_power".to_owned()),
            duration: None,
            cutoff_soc: Some("number.charge_cutoff_soc".to_owned()),
        }),
        ..PointsConfig::default()
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        points: points(),
        discharge: DischargeConfig {
            target_export_w: 3000.0,
            ..DischargeConfig::default()
        },
        charge: ChargeConfig::default(),
        planning: PlanningConfig::default(),
        safety: SafetyConfig {
            service_timeout_secs: 0.5,
            verify_timeout_secs: 0.3,
            verify_poll_interval_ms: 10,
            ..SafetyConfig::default()
        },
    }
}

/// SOC 80 %, PV 5 kWh, exported 4 kWh, forecast 6 kWh: cap 6.5, headroom 2.5
fn registry() -> Arc<FakeRegistry> {
    let registry = Arc::new(FakeRegistry::default());
    registry.set("sensor.battery_soc", "80");
    registry.set("sensor.pv_energy_today", "5.0");
    registry.set("sensor.grid_feed_today", "4.0");
    registry.set("sensor.forecast_today", "6.0");
    registry.set("switch.force_discharge", "off");
    registry.set("number.discharge_power", "0");
    registry.set("number.discharge_cutoff_soc", "10");
    registry.set("switch.force_charge", "off");
    registry.set("number.charge_power", "0");
    registry.set("number.charge_cutoff_soc", "90");
    registry
}

fn coordinator(registry: &Arc<FakeRegistry>, config: EngineConfig) -> Coordinator {
    Coordinator::new(registry.clone(), config, chrono_tz::UTC)
}

fn afternoon_forecast() -> Value {
    json!({
        "shortname": "Test Region",
        "data": [
            {"from": "2025-06-10T14:00Z", "to": "2025-06-10T14:30Z", "intensity": {"forecast": 41, "index": "moderate"}},
            {"from": "2025-06-10T14:30Z", "to": "2025-06-10T15:00Z", "intensity": {"forecast": 25, "index": "low"}},
            {"from": "2025-06-10T15:00Z", "to": "2025-06-10T15:30Z", "intensity": {"forecast": 39, "index": "moderate"}}
        ]
    })
}

#[tokio::test]
async fn test_tick_publishes_snapshot() {
    let registry = registry();
    let mut coordinator = coordinator(&registry, config());
    let now = utc("2025-06-10T12:00:00Z");

    let outcome = coordinator.tick(now).await.unwrap();
    let snapshot = &outcome.snapshot;

    assert!((snapshot.export_cap_kwh - 6.5).abs() < 1e-9);
    assert!((snapshot.export_headroom_kwh - 2.5).abs() < 1e-9);
    assert!(snapshot.export_allowed);
    assert!(snapshot.discharge_needed);
    assert_eq!(snapshot.recommended_discharge_w, 3000.0);
    assert_eq!(snapshot.discharge_duration_minutes, 55.0);
    assert!(snapshot.discharge_plan_today.is_empty());
    assert!(snapshot.health.last_update_success);
    assert!(!snapshot.health.stale);
    assert!(outcome.events.is_empty());

    let attributes = snapshot.to_attributes();
    assert_eq!(attributes["export_headroom_kwh"], json!(2.5));
    assert_eq!(attributes["last_update_success"], json!(true));
}

#[tokio::test]
async fn test_failed_tick_keeps_previous_snapshot() {
    let registry = registry();
    let mut coordinator = coordinator(&registry, config());
    let t0 = utc("2025-06-10T12:00:00Z");
    coordinator.tick(t0).await.unwrap();

    registry.set("sensor.pv_energy_today", "unavailable");
    let err = coordinator
        .tick(t0 + TimeDelta::seconds(10))
        .await
        .unwrap_err();
    assert!(err.is_data_error());

    assert_eq!(coordinator.snapshot().unwrap().computed_at, t0);
    let health = coordinator.health(t0 + TimeDelta::seconds(10));
    assert!(!health.last_update_success);
    assert_eq!(health.last_update, Some(t0));

    registry.set("sensor.pv_energy_today", "5000");
    let err = coordinator
        .tick(t0 + TimeDelta::seconds(20))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OutOfRange { .. }));
}

#[tokio::test]
async fn test_zero_headroom_never_starts() {
    let registry = registry();
    registry.set("sensor.grid_feed_today", "6.5");
    registry.set_with_attributes("sensor.carbon_intensity", "41", afternoon_forecast());

    let mut config = config();
    config.planning.enable_ci_planning = true;
    config.discharge.enable_auto_discharge = true;
    let mut coordinator = coordinator(&registry, config);
    let now = utc("2025-06-10T14:01:00Z");

    let outcome = coordinator.tick(now).await.unwrap();
    assert_eq!(outcome.snapshot.export_headroom_kwh, 0.0);
    assert!(!outcome.snapshot.discharge_needed);
    assert_eq!(outcome.snapshot.discharge_duration_minutes, 0.0);
    assert!(outcome.snapshot.discharge_plan_today.is_empty());
    assert!(outcome.events.is_empty());

    let err = coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Refused { .. }));
    assert!(registry.calls_to("switch.turn_on").is_empty());
}

#[tokio::test]
async fn test_manual_start_and_stop() {
    let registry = registry();
    let mut coordinator = coordinator(&registry, config());
    let now = utc("2025-06-10T12:00:00Z");
    coordinator.tick(now).await.unwrap();

    coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap();

    let session = coordinator.discharge_state().session().unwrap().clone();
    assert_eq!(session.start_reference, 4.0);
    assert!((session.target_energy_kwh - 2.5).abs() < 1e-9);
    assert_eq!(registry.value("number.discharge_power").as_deref(), Some("3"));
    assert_eq!(registry.value("number.discharge_cutoff_soc").as_deref(), Some("20"));
    assert_eq!(registry.value("switch.force_discharge").as_deref(), Some("on"));
    assert!(coordinator.snapshot().unwrap().discharge_active);

    let err = coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Refused { .. }));

    coordinator
        .stop_discharge(now, StopReason::External)
        .await
        .unwrap();
    assert!(!coordinator.discharge_state().is_active());
    assert_eq!(registry.value("switch.force_discharge").as_deref(), Some("off"));
    assert!(registry.notification_ids("persistent_notification.create").is_empty());
}

#[tokio::test]
async fn test_target_reached_requests_stop() {
    let registry = registry();
    registry.set_with_attributes("sensor.carbon_intensity", "41", afternoon_forecast());
    let mut config = config();
    config.planning.enable_ci_planning = true;
    config.discharge.enable_auto_discharge = true;

    let mut control = ControlLoop::new(coordinator(&registry, config), Duration::from_secs(10));
    let shared = control.shared_state();

    // The 41 window (clipped to 14:02) is due and starts automatically
    let now = utc("2025-06-10T14:02:00Z");
    control.run_tick(now).await.unwrap();

    let session = control
        .coordinator()
        .discharge_state()
        .session()
        .cloned()
        .unwrap();
    assert_eq!(session.start_reference, 4.0);
    assert!((session.target_energy_kwh - 1.4).abs() < 1e-6);
    assert_eq!(registry.value("switch.force_discharge").as_deref(), Some("on"));
    assert!(shared.read().snapshot.as_ref().unwrap().discharge_active);

    // Same window does not fire again
    let later = now + TimeDelta::minutes(1);
    registry.set("sensor.grid_feed_today", "4.5");
    control.run_tick(later).await.unwrap();
    assert_eq!(registry.calls_to("switch.turn_on").len(), 1);
    assert!(control.coordinator().discharge_state().is_active());

    // 1.5 kWh exported since the start: stop on the next tick
    registry.set("sensor.grid_feed_today", "5.5");
    control.run_tick(later + TimeDelta::minutes(1)).await.unwrap();
    assert!(!control.coordinator().discharge_state().is_active());
    assert_eq!(registry.value("switch.force_discharge").as_deref(), Some("off"));
    assert!(!shared.read().snapshot.as_ref().unwrap().discharge_active);
}

#[tokio::test]
async fn test_exhausted_headroom_is_reported_as_safety_stop() {
    let registry = registry();
    let mut coordinator = coordinator(&registry, config());
    let now = utc("2025-06-10T12:00:00Z");
    coordinator.tick(now).await.unwrap();
    coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap();

    registry.set("sensor.grid_feed_today", "6.6");
    let outcome = coordinator.tick(now + TimeDelta::seconds(10)).await.unwrap();
    assert_eq!(
        outcome.events,
        vec![TickEvent::StopRequested {
            kind: ControlKind::Discharge,
            reason: StopReason::HeadroomExhausted,
        }]
    );

    coordinator
        .stop_discharge(now, StopReason::HeadroomExhausted)
        .await
        .unwrap();
    assert_eq!(
        registry.notification_ids("persistent_notification.create"),
        vec!["headroom_auto_stop_headroom".to_owned()]
    );
}

#[tokio::test]
async fn test_enable_failure_rolls_back() {
    let registry = registry();
    registry.fail("switch.force_discharge");
    let mut coordinator = coordinator(&registry, config());
    let now = utc("2025-06-10T12:00:00Z");
    coordinator.tick(now).await.unwrap();

    let err = coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Actuation {
            control: ControlKind::Discharge,
            step: ActuationStep::EnableCommand,
        }
    ));
    assert!(!coordinator.discharge_state().is_active());
    assert_eq!(coordinator.error_state(), Some("discharge_start_failed"));
    assert_eq!(
        registry.notification_ids("persistent_notification.create"),
        vec!["headroom_discharge_start_failed".to_owned()]
    );
    assert_eq!(coordinator.health(now).discharge_breaker.failure_count, 1);

    // Recovery clears the error state and the notification
    registry.recover("switch.force_discharge");
    coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap();
    assert!(coordinator.discharge_state().is_active());
    assert_eq!(coordinator.error_state(), None);
    assert_eq!(
        registry.notification_ids("persistent_notification.dismiss"),
        vec!["headroom_discharge_start_failed".to_owned()]
    );
    assert_eq!(coordinator.health(now).discharge_breaker.failure_count, 0);
}

#[tokio::test]
async fn test_stale_data_vetoes_start() {
    let registry = registry();
    let mut coordinator = coordinator(&registry, config());
    let now = utc("2025-06-10T12:00:00Z");

    let err = coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleData { .. }));

    coordinator.tick(now).await.unwrap();
    let err = coordinator
        .start_discharge(now + TimeDelta::seconds(31), StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleData { .. }));

    assert_eq!(
        registry.notification_ids("persistent_notification.create"),
        vec!["headroom_stale_data".to_owned()]
    );
    assert!(registry.calls_to("number.set_value").is_empty());
}

#[tokio::test]
async fn test_low_soc_and_soc_failure_refuse_start() {
    let registry = registry();
    let mut coordinator = coordinator(&registry, config());
    let now = utc("2025-06-10T12:00:00Z");
    coordinator.tick(now).await.unwrap();

    registry.set("sensor.battery_soc", "20");
    let err = coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Refused { .. }));

    registry.set("sensor.battery_soc", "unknown");
    let err = coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(err.is_data_error());
    assert_eq!(coordinator.error_state(), Some("soc_read_failed"));
}

#[tokio::test]
async fn test_breaker_opens_after_repeated_failures() {
    let registry = registry();
    registry.fail("number.discharge_power");
    let mut coordinator = coordinator(&registry, config());
    let t0 = utc("2025-06-10T12:00:00Z");
    coordinator.tick(t0).await.unwrap();

    for _ in 0..5 {
        let err = coordinator
            .start_discharge(t0, StartOrigin::Manual)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Actuation {
                step: ActuationStep::PowerSetpoint,
                ..
            }
        ));
    }
    assert!(coordinator.health(t0).discharge_breaker.open);

    let err = coordinator
        .start_discharge(t0, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CircuitOpen(ControlKind::Discharge)));
    assert_eq!(registry.calls_to("number.set_value").len(), 5);
    // Deduplicated
    assert_eq!(
        registry.notification_ids("persistent_notification.create"),
        vec!["headroom_discharge_power_failed".to_owned()]
    );

    // One trial after the cooldown, which fails and reopens the breaker
    let later = t0 + TimeDelta::seconds(61);
    coordinator.tick(later).await.unwrap();
    let err = coordinator
        .start_discharge(later, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Actuation { .. }));
    let err = coordinator
        .start_discharge(later, StartOrigin::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CircuitOpen(_)));
}

#[tokio::test]
async fn test_charge_session_plan_and_start() {
    let registry = registry();
    registry.set_with_attributes(
        "sensor.carbon_intensity",
        "20",
        json!({"data": [
            {"from": "2025-06-10T23:30Z", "to": "2025-06-11T00:00Z", "intensity": {"forecast": 20, "index": "low"}},
            {"from": "2025-06-11T00:00Z", "to": "2025-06-11T00:30Z", "intensity": {"forecast": 10, "index": "very low"}},
            {"from": "2025-06-11T00:30Z", "to": "2025-06-11T01:00Z", "intensity": {"forecast": 30, "index": "low"}}
        ]}),
    );
    let mut config = config();
    config.charge.enable_charge_planning = true;
    let mut coordinator = coordinator(&registry, config);
    let now = utc("2025-06-10T23:00:00Z");

    let outcome = coordinator.tick(now).await.unwrap();
    let session = &outcome.snapshot.next_charge_session;
    assert!((outcome.snapshot.charge_energy_needed_kwh - 2.0).abs() < 1e-9);
    assert_eq!(session.len(), 2);
    assert_eq!(session[0].intensity_value, 10.0);
    let planned: f64 = session.iter().map(|w| w.energy_kwh).sum();
    assert!((planned - 2.0).abs() < 1e-6);

    coordinator
        .start_charge(now, StartOrigin::Manual)
        .await
        .unwrap();
    let charge = coordinator.charge_state().session().unwrap().clone();
    assert_eq!(charge.start_reference, 80.0);
    assert_eq!(registry.value("switch.force_charge").as_deref(), Some("on"));
    assert_eq!(registry.value("number.charge_cutoff_soc").as_deref(), Some("100"));
    let power: f64 = registry.value("number.charge_power").unwrap().parse().unwrap();
    assert!((power - 3.68).abs() < 0.05);

    // 2 kWh on a 10 kWh battery is 20 %
    registry.set("sensor.battery_soc", "100");
    let outcome = coordinator.tick(now + TimeDelta::minutes(40)).await.unwrap();
    assert_eq!(
        outcome.events,
        vec![TickEvent::StopRequested {
            kind: ControlKind::Charge,
            reason: StopReason::TargetReached,
        }]
    );

    coordinator
        .stop_charge(now, StopReason::TargetReached)
        .await
        .unwrap();
    assert_eq!(registry.value("switch.force_charge").as_deref(), Some("off"));
}

#[tokio::test]
async fn test_charge_without_points_is_rejected() {
    let registry = registry();
    let mut config = config();
    config.points.charge = None;
    let mut control = ControlLoop::new(coordinator(&registry, config), Duration::from_secs(10));

    let reply = control
        .handle_command(ControlCommand::StartCharge, utc("2025-06-10T12:00:00Z"))
        .await;
    assert!(!reply.success);
    assert!(reply.message.contains("points.charge"));

    let reply = control
        .handle_command(ControlCommand::CalculateDischarge, utc("2025-06-10T12:00:00Z"))
        .await;
    assert!(reply.success);
    assert!(reply.message.contains("3000 W"));
}

#[tokio::test]
async fn test_failed_auto_start_rolls_back_and_does_not_refire() {
    let registry = registry();
    registry.set_with_attributes("sensor.carbon_intensity", "41", afternoon_forecast());
    registry.fail("switch.force_discharge");
    let mut config = config();
    config.planning.enable_ci_planning = true;
    config.discharge.enable_auto_discharge = true;
    let mut coordinator = coordinator(&registry, config);

    let now = utc("2025-06-10T14:01:00Z");
    let outcome = coordinator.tick(now).await.unwrap();
    let [TickEvent::StartRequested { kind, window }] = outcome.events.as_slice() else {
        panic!("expected one start event, got {:?}", outcome.events);
    };
    assert_eq!(*kind, ControlKind::Discharge);
    assert_eq!(window.intensity_value, 41.0);
    assert_eq!(window.start, now);

    let err = coordinator
        .start_discharge(now, StartOrigin::Window(window.clone()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Actuation {
            step: ActuationStep::EnableCommand,
            ..
        }
    ));
    assert!(!coordinator.discharge_state().is_active());
    assert!(!coordinator.snapshot().unwrap().discharge_active);

    // The window was consumed when it fired
    let outcome = coordinator.tick(now + TimeDelta::minutes(1)).await.unwrap();
    assert!(outcome.events.is_empty());
    assert_eq!(registry.calls_to("switch.turn_on").len(), 1);
}

#[tokio::test]
async fn test_reserve_breach_requests_safety_stop() {
    let registry = registry();
    registry.set("sensor.reserve_soc", "30");
    let mut config = config();
    config.points.reserve_soc = Some("sensor.reserve_soc".to_owned());
    config.discharge.observe_reserve_soc = true;
    let mut coordinator = coordinator(&registry, config);

    let now = utc("2025-06-10T12:00:00Z");
    coordinator.tick(now).await.unwrap();
    coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap();

    registry.set("sensor.battery_soc", "25");
    let later = now + TimeDelta::seconds(10);
    let outcome = coordinator.tick(later).await.unwrap();
    assert!(outcome.snapshot.reserve.reserve_limit_reached);
    assert_eq!(
        outcome.events,
        vec![TickEvent::StopRequested {
            kind: ControlKind::Discharge,
            reason: StopReason::ReserveBreached,
        }]
    );

    coordinator
        .stop_discharge(later, StopReason::ReserveBreached)
        .await
        .unwrap();
    assert!(!coordinator.discharge_state().is_active());
    assert_eq!(registry.value("switch.force_discharge").as_deref(), Some("off"));
    assert_eq!(
        registry.notification_ids("persistent_notification.create"),
        vec!["headroom_auto_stop_reserve".to_owned()]
    );
}

#[tokio::test]
async fn test_button_discharge_stops_by_zeroing_power() {
    let registry = registry();
    let mut config = config();
    config.points.discharge_enable = "button.force_discharge".to_owned();
    let mut coordinator = coordinator(&registry, config);
    let now = utc("2025-06-10T12:00:00Z");
    coordinator.tick(now).await.unwrap();
    coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(registry.calls_to("button.press").len(), 1);
    assert_eq!(registry.value("number.discharge_power").as_deref(), Some("3"));

    coordinator
        .stop_discharge(now, StopReason::HeadroomExhausted)
        .await
        .unwrap();
    assert!(!coordinator.discharge_state().is_active());
    assert_eq!(registry.value("number.discharge_power").as_deref(), Some("0"));

    // A power write that does not land leaves the session running
    coordinator
        .start_discharge(now, StartOrigin::Manual)
        .await
        .unwrap();
    registry.fail("number.discharge_power");
    let err = coordinator
        .stop_discharge(now, StopReason::HeadroomExhausted)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Actuation {
            step: ActuationStep::DisableCommand,
            ..
        }
    ));
    assert!(coordinator.discharge_state().is_active());
    assert_eq!(coordinator.error_state(), Some("discharge_stop_failed"));
}

#[tokio::test]
async fn test_button_charge_without_power_point_cannot_stop() {
    let registry = registry();
    registry.set_with_attributes(
        "sensor.carbon_intensity",
        "20",
        json!({"data": [
            {"from": "2025-06-10T23:30Z", "to": "2025-06-11T00:00Z", "intensity": {"forecast": 20, "index": "low"}}
        ]}),
    );
    let mut config = config();
    config.charge.enable_charge_planning = true;
    config.points.charge = Some(ChargePointsConfig {
        enable: "button.force_charge".to_owned(),
        power: None,
        duration: None,
        cutoff_soc: None,
    });
    let mut coordinator = coordinator(&registry, config);
    let now = utc("2025-06-10T23:00:00Z");
    coordinator.tick(now).await.unwrap();
    coordinator
        .start_charge(now, StartOrigin::Manual)
        .await
        .unwrap();

    let err = coordinator
        .stop_charge(now, StopReason::External)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Actuation {
            control: ControlKind::Charge,
            step: ActuationStep::DisableCommand,
        }
    ));
    assert!(coordinator.charge_state().is_active());
    assert_eq!(
        registry.notification_ids("persistent_notification.create"),
        vec!["headroom_charge_stop_failed".to_owned()]
    );
}
