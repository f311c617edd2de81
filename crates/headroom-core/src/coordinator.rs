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

//! Single owner of the control state.
//!
//! The coordinator reads the registry once per tick, derives the export
//! allowance, the discharge recommendation and the plans, and reports start
//! and stop events. Starting and stopping sessions goes through the verified
//! actuation sequences below; the control loop decides when to call them.

use crate::duration::{compute_duration_minutes, recommended_power_w};
use crate::errors::{ActuationStep, EngineError, EngineResult};
use crate::forecast::{current_intensity, parse_forecast};
use crate::headroom::{HeadroomResult, compute_headroom};
use crate::notifications::{NotificationKind, Notifier};
use crate::planner::{PlanRequest, charge_energy_needed, plan};
use crate::readings::{read_optional, read_raw, read_value};
use crate::safety::{
    ActuationPolicy, CircuitBreaker, ExpectedValue, StaleDataDetector, Verification, safe_invoke,
};
use crate::traits::{PointRegistry, ServiceCall, is_button};
use crate::trigger::{DischargeObservation, charge_stop_reason, discharge_stop_reason, due_window};
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use headroom_types::schedule::{total_duration_minutes, total_energy_kwh};
use headroom_types::{
    ControlKind, ControlState, EngineConfig, HealthReport, ParsedForecast, ReadingKind,
    ReserveStatus, ScheduleWindow, Session, Snapshot, StopReason,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Charge sessions always target a full battery
const CHARGE_CUTOFF_SOC: f64 = 100.0;

/// Something the control loop should act on after a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickEvent {
    StopRequested {
        kind: ControlKind,
        reason: StopReason,
    },
    StartRequested {
        kind: ControlKind,
        window: ScheduleWindow,
    },
}

/// Result of one successful tick
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: Snapshot,
    pub events: Vec<TickEvent>,
}

/// What asked for a session to start
#[derive(Debug, Clone, PartialEq)]
pub enum StartOrigin {
    /// Operator command
    Manual,
    /// Planned window reached
    Window(ScheduleWindow),
}

/// Required readings of one tick
#[derive(Debug, Clone, Copy)]
struct TickInputs {
    soc: f64,
    pv_energy_today: f64,
    grid_feed_today: f64,
    forecast_total_today: f64,
}

pub struct Coordinator {
    registry: Arc<dyn PointRegistry>,
    config: EngineConfig,
    tz: Tz,
    policy: ActuationPolicy,
    discharge: ControlState,
    charge: ControlState,
    discharge_breaker: CircuitBreaker,
    charge_breaker: CircuitBreaker,
    stale: StaleDataDetector,
    notifier: Notifier,
    snapshot: Option<Snapshot>,
    last_update_success: bool,
    error_state: Option<String>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("registry", &self.registry.name())
            .field("tz", &self.tz)
            .field("discharge", &self.discharge)
            .field("charge", &self.charge)
            .field("last_update_success", &self.last_update_success)
            .field("error_state", &self.error_state)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(registry: Arc<dyn PointRegistry>, config: EngineConfig, tz: Tz) -> Self {
        let safety = &config.safety;
        let cooldown = seconds(safety.breaker_timeout_secs);
        let stale_after = seconds(safety.stale_after_secs);

        Self {
            policy: ActuationPolicy::from(safety),
            discharge_breaker: CircuitBreaker::new("discharge", safety.failure_threshold, cooldown),
            charge_breaker: CircuitBreaker::new("charge", safety.failure_threshold, cooldown),
            stale: StaleDataDetector::new(stale_after),
            registry,
            config,
            tz,
            discharge: ControlState::default(),
            charge: ControlState::default(),
            notifier: Notifier::new(),
            snapshot: None,
            last_update_success: false,
            error_state: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Snapshot of the last successful tick
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn discharge_state(&self) -> &ControlState {
        &self.discharge
    }

    pub fn charge_state(&self) -> &ControlState {
        &self.charge
    }

    pub fn error_state(&self) -> Option<&str> {
        self.error_state.as_deref()
    }

    pub fn health(&self, now: DateTime<Utc>) -> HealthReport {
        HealthReport {
            last_update: self.stale.last_update(),
            data_age_seconds: self.stale.age_seconds(now),
            stale: self.stale.is_stale(now),
            stale_after_seconds: self.config.safety.stale_after_secs,
            last_update_success: self.last_update_success,
            error_state: self.error_state.clone(),
            discharge_breaker: self.discharge_breaker.status(),
            charge_breaker: self.charge_breaker.status(),
        }
    }

    // ============= Tick =============

    /// Run one control-loop iteration.
    ///
    /// A missing or invalid required reading aborts the tick before any
    /// state changes; the previous snapshot stays published.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> EngineResult<TickOutcome> {
        let inputs = match self.read_inputs().await {
            Ok(inputs) => inputs,
            Err(e) => {
                self.last_update_success = false;
                warn!("🔄 [TICK] Update failed, keeping previous snapshot: {}", e);
                return Err(e);
            }
        };

        let today = now.with_timezone(&self.tz).date_naive();
        self.discharge.roll_over(today);
        self.charge.roll_over(today);

        let discharge_cfg = &self.config.discharge;
        let headroom = compute_headroom(
            inputs.pv_energy_today,
            inputs.forecast_total_today,
            inputs.grid_feed_today,
            discharge_cfg.safety_margin_kwh,
        );

        let (recommended_w, duration_minutes) =
            if inputs.soc > discharge_cfg.min_soc && headroom.headroom_kwh > 0.0 {
                let power_w = recommended_power_w(
                    discharge_cfg.target_export_w,
                    headroom.headroom_kwh,
                    discharge_cfg.zero_target_policy,
                );
                let minutes = compute_duration_minutes(
                    headroom.headroom_kwh,
                    power_w,
                    discharge_cfg.background_load_buffer,
                );
                (power_w, minutes)
            } else {
                (0.0, 0.0)
            };

        let registry = self.registry.as_ref();
        let forecast_so_far =
            read_optional(registry, self.config.points.forecast_so_far.as_deref(), ReadingKind::Energy).await;
        let forecast_tomorrow =
            read_optional(registry, self.config.points.forecast_tomorrow.as_deref(), ReadingKind::Energy).await;

        let reserve = self.evaluate_reserve(inputs.soc).await;
        let forecast = self.read_forecast().await;

        let (plan_today, plan_tomorrow) =
            self.discharge_plans(forecast.as_ref(), &headroom, forecast_tomorrow, now);
        let charge_energy_kwh =
            charge_energy_needed(inputs.soc, self.config.charge.battery_capacity_kwh);
        let next_charge = self.charge_plan(forecast.as_ref(), charge_energy_kwh, now);

        let mut events = Vec::new();
        self.collect_stop_events(&inputs, &headroom, &reserve, &mut events);
        self.collect_start_events(&plan_today, &next_charge, now, &mut events);

        self.stale.record_update(now);
        self.last_update_success = true;

        let current = forecast
            .as_ref()
            .and_then(|f| current_intensity(&f.periods, now));

        let snapshot = Snapshot {
            computed_at: now,
            export_cap_kwh: headroom.export_cap_kwh,
            export_headroom_kwh: headroom.headroom_kwh,
            exported_today_kwh: inputs.grid_feed_today,
            export_allowed: headroom.export_allowed(),
            discharge_needed: recommended_w > 0.0,
            recommended_discharge_w: recommended_w,
            discharge_duration_minutes: duration_minutes,
            current_pv_kwh: inputs.pv_energy_today,
            forecast_pv_kwh: inputs.forecast_total_today,
            forecast_so_far_kwh: forecast_so_far,
            forecast_tomorrow_kwh: forecast_tomorrow,
            discharge_plan_today: plan_today,
            discharge_plan_tomorrow: plan_tomorrow,
            next_charge_session: next_charge,
            charge_energy_needed_kwh: charge_energy_kwh,
            current_intensity: current.map(|p| p.intensity_value),
            current_intensity_label: current.map(|p| p.intensity_label.clone()),
            forecast_region: forecast
                .as_ref()
                .map(|f| f.region.clone())
                .filter(|region| !region.is_empty()),
            current_soc: inputs.soc,
            min_soc: self.config.discharge.min_soc,
            reserve,
            discharge_active: self.discharge.is_active(),
            charge_active: self.charge.is_active(),
            health: self.health(now),
        };

        info!(
            "🔄 [TICK] Headroom {:.3} kWh (cap {:.3}, exported {:.3}), recommend {:.0} W for {:.1} min, {} event(s)",
            snapshot.export_headroom_kwh,
            snapshot.export_cap_kwh,
            snapshot.exported_today_kwh,
            snapshot.recommended_discharge_w,
            snapshot.discharge_duration_minutes,
            events.len()
        );

        self.snapshot = Some(snapshot.clone());
        Ok(TickOutcome { snapshot, events })
    }

    async fn read_inputs(&self) -> EngineResult<TickInputs> {
        let registry = self.registry.as_ref();
        let points = &self.config.points;
        Ok(TickInputs {
            soc: read_value(registry, &points.current_soc, ReadingKind::Soc).await?,
            pv_energy_today: read_value(registry, &points.pv_energy_today, ReadingKind::Energy).await?,
            grid_feed_today: read_value(registry, &points.grid_feed_today, ReadingKind::Energy).await?,
            forecast_total_today: read_value(registry, &points.forecast_total_today, ReadingKind::Energy)
                .await?,
        })
    }

    async fn evaluate_reserve(&self, soc: f64) -> ReserveStatus {
        let observe = self.config.discharge.observe_reserve_soc;
        if !observe {
            return ReserveStatus::default();
        }

        let target = read_optional(
            self.registry.as_ref(),
            self.config.points.reserve_soc.as_deref(),
            ReadingKind::Soc,
        )
        .await;
        let reached = target.is_some_and(|reserve| soc < reserve);
        if let (true, Some(reserve)) = (reached, target) {
            warn!(
                "🛡️ [SAFETY] Reserve SOC limit reached: {:.1}% < {:.1}%",
                soc, reserve
            );
        }

        ReserveStatus {
            observe_reserve_soc: observe,
            reserve_soc_target: target,
            reserve_limit_reached: reached,
        }
    }

    /// Carbon-intensity forecast, only read when some plan needs it
    async fn read_forecast(&self) -> Option<ParsedForecast> {
        let point = self.config.points.carbon_intensity.as_deref()?;
        if !self.config.planning.enable_ci_planning && !self.config.charge.enable_charge_planning {
            return None;
        }

        let reading = match read_raw(self.registry.as_ref(), point).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("⚠️ [PLANNER] Carbon-intensity feed unavailable: {}", e);
                return None;
            }
        };
        let raw = reading.is_available().then_some(reading.value.as_str());
        let parsed = parse_forecast(raw, &reading.attributes);
        if parsed.is_none() {
            debug!("📈 [PLANNER] No forecast periods in {}", point);
        }
        parsed
    }

    fn discharge_plans(
        &self,
        forecast: Option<&ParsedForecast>,
        headroom: &HeadroomResult,
        forecast_tomorrow: Option<f64>,
        now: DateTime<Utc>,
    ) -> (Vec<ScheduleWindow>, Vec<ScheduleWindow>) {
        let Some(forecast) = forecast.filter(|_| self.config.planning.enable_ci_planning) else {
            return (Vec::new(), Vec::new());
        };
        let cfg = &self.config.discharge;
        let window = cfg.export_window;

        let today_power_kw =
            recommended_power_w(cfg.target_export_w, headroom.headroom_kwh, cfg.zero_target_policy) / 1000.0;
        let today = plan(
            &forecast.periods,
            &PlanRequest::today_discharge(headroom.headroom_kwh, today_power_kw, window, now),
            self.tz,
        );

        let tomorrow = match forecast_tomorrow {
            Some(budget) if budget > 0.0 => {
                let power_kw =
                    recommended_power_w(cfg.target_export_w, budget, cfg.zero_target_policy) / 1000.0;
                plan(
                    &forecast.periods,
                    &PlanRequest::tomorrow_discharge(budget, power_kw, window, now),
                    self.tz,
                )
            }
            _ => Vec::new(),
        };

        debug!(
            "📈 [PLANNER] Discharge plan: today {} window(s) {:.3} kWh, tomorrow {} window(s) {:.3} kWh",
            today.len(),
            total_energy_kwh(&today),
            tomorrow.len(),
            total_energy_kwh(&tomorrow)
        );
        (today, tomorrow)
    }

    fn charge_plan(
        &self,
        forecast: Option<&ParsedForecast>,
        energy_needed_kwh: f64,
        now: DateTime<Utc>,
    ) -> Vec<ScheduleWindow> {
        let cfg = &self.config.charge;
        let Some(forecast) = forecast.filter(|_| cfg.enable_charge_planning) else {
            return Vec::new();
        };

        let session = plan(
            &forecast.periods,
            &PlanRequest::next_charge(energy_needed_kwh, cfg.charge_power_kw, cfg.window, now),
            self.tz,
        );
        debug!(
            "📈 [PLANNER] Next charge session: {} window(s), {:.3} kWh",
            session.len(),
            total_energy_kwh(&session)
        );
        session
    }

    fn collect_stop_events(
        &self,
        inputs: &TickInputs,
        headroom: &HeadroomResult,
        reserve: &ReserveStatus,
        events: &mut Vec<TickEvent>,
    ) {
        if let Some(session) = self.discharge.session() {
            let observed = DischargeObservation {
                headroom_kwh: headroom.headroom_kwh,
                exported_today_kwh: inputs.grid_feed_today,
                current_soc: inputs.soc,
                reserve_soc: reserve
                    .reserve_soc_target
                    .filter(|_| reserve.observe_reserve_soc),
            };
            if let Some(reason) = discharge_stop_reason(session, &observed) {
                warn!("⚡ [DISCHARGE] Auto-stop requested: {}", reason);
                events.push(TickEvent::StopRequested {
                    kind: ControlKind::Discharge,
                    reason,
                });
            }
        }

        let capacity = self.config.charge.battery_capacity_kwh;
        let charge_stop = self
            .charge
            .session()
            .and_then(|session| charge_stop_reason(session, inputs.soc, capacity));
        if let Some(reason) = charge_stop {
            info!("🔌 [CHARGE] Auto-stop requested: {}", reason);
            events.push(TickEvent::StopRequested {
                kind: ControlKind::Charge,
                reason,
            });
        }
    }

    fn collect_start_events(
        &mut self,
        plan_today: &[ScheduleWindow],
        next_charge: &[ScheduleWindow],
        now: DateTime<Utc>,
        events: &mut Vec<TickEvent>,
    ) {
        let discharge_due = self
            .config
            .discharge
            .enable_auto_discharge
            .then(|| due_window(&self.discharge, plan_today, now, self.tz))
            .flatten()
            .map(|(key, window)| (key, window.clone()));
        if let Some((key, window)) = discharge_due {
            info!(
                "⚡ [DISCHARGE] Auto-discharge window {} due ({:.3} kWh)",
                key, window.energy_kwh
            );
            self.discharge.record_trigger(key);
            events.push(TickEvent::StartRequested {
                kind: ControlKind::Discharge,
                window,
            });
        }

        let charge_due = self
            .config
            .charge
            .enable_auto_charge
            .then(|| due_window(&self.charge, next_charge, now, self.tz))
            .flatten()
            .map(|(key, window)| (key, window.clone()));
        if let Some((key, window)) = charge_due {
            info!(
                "🔌 [CHARGE] Auto-charge window {} due ({:.3} kWh)",
                key, window.energy_kwh
            );
            self.charge.record_trigger(key);
            events.push(TickEvent::StartRequested {
                kind: ControlKind::Charge,
                window,
            });
        }
    }

    // ============= Discharge =============

    /// Start a forced discharge session.
    ///
    /// Every precondition is checked before the first command is sent. Any
    /// failed required step aborts the sequence and leaves the loop idle.
    pub async fn start_discharge(&mut self, now: DateTime<Utc>, origin: StartOrigin) -> EngineResult<()> {
        const KIND: ControlKind = ControlKind::Discharge;

        if self.discharge.is_active() {
            return Err(EngineError::refused(KIND, "discharge is already active"));
        }

        let points = self.config.points.clone();
        let cfg = self.config.discharge.clone();

        let soc = match read_value(self.registry.as_ref(), &points.current_soc, ReadingKind::Soc).await {
            Ok(soc) => soc,
            Err(e) => {
                error!("❌ [DISCHARGE] Cannot start: unable to read SOC: {}", e);
                let detail = format!("Unable to read a valid battery SOC from {}.", points.current_soc);
                self.raise(NotificationKind::SocReadFailed, &detail).await;
                return Err(e);
            }
        };

        if soc <= cfg.min_soc {
            return Err(EngineError::refused(
                KIND,
                format!("SOC {soc:.1}% is at or below the minimum {:.1}%", cfg.min_soc),
            ));
        }

        if self.stale.is_stale(now) {
            let age = self.stale.describe_age(now);
            error!("❌ [DISCHARGE] Cannot start: data is stale (last update {})", age);
            let detail = format!("Last successful update was {age}; discharge will not start on outdated data.");
            self.raise(NotificationKind::StaleData, &detail).await;
            return Err(EngineError::StaleData { age });
        }

        let headroom_kwh = self
            .snapshot
            .as_ref()
            .map(|s| s.export_headroom_kwh)
            .ok_or_else(|| EngineError::refused(KIND, "no snapshot available yet"))?;
        if headroom_kwh <= 0.0 {
            return Err(EngineError::refused(
                KIND,
                format!("no export headroom available ({headroom_kwh:.3} kWh)"),
            ));
        }

        let power_w = recommended_power_w(cfg.target_export_w, headroom_kwh, cfg.zero_target_policy);
        if power_w <= 0.0 {
            return Err(EngineError::refused(
                KIND,
                "no target export power configured",
            ));
        }
        let power_kw = power_w / 1000.0;

        let (duration_minutes, target_energy_kwh) = match &origin {
            StartOrigin::Window(window) => (window.duration_minutes, window.energy_kwh),
            StartOrigin::Manual => (
                compute_duration_minutes(headroom_kwh, power_w, cfg.background_load_buffer),
                headroom_kwh,
            ),
        };

        if !self.discharge_breaker.can_attempt(now) {
            return Err(EngineError::CircuitOpen(KIND));
        }

        info!(
            "⚡ [DISCHARGE] Starting: {:.3} kW for {:.1} min, cutoff {:.0}%, target {:.3} kWh",
            power_kw, duration_minutes, cfg.min_soc, target_energy_kwh
        );

        self.required_step(
            KIND,
            ActuationStep::PowerSetpoint,
            &points.discharge_power,
            power_kw,
            now,
        )
        .await?;
        self.required_step(
            KIND,
            ActuationStep::CutoffSetpoint,
            &points.discharge_cutoff_soc,
            cfg.min_soc,
            now,
        )
        .await?;
        if let Some(point) = points.discharge_duration.as_deref() {
            self.optional_step(point, duration_minutes).await;
        }
        self.enable_step(KIND, &points.discharge_enable, now).await?;

        let start_export = match read_value(
            self.registry.as_ref(),
            &points.grid_feed_today,
            ReadingKind::Energy,
        )
        .await
        {
            Ok(value) => value,
            Err(e) => {
                let fallback = self.snapshot.as_ref().map_or(0.0, |s| s.exported_today_kwh);
                warn!(
                    "⚠️ [DISCHARGE] Grid feed unavailable at start, using last tick value {:.3}: {}",
                    fallback, e
                );
                fallback
            }
        };

        self.discharge.set_session(Some(Session {
            start_reference: start_export,
            target_energy_kwh,
            start_time: now,
        }));
        self.discharge_breaker.record_success();
        self.error_state = None;
        self.notifier
            .dismiss_where(self.registry.as_ref(), |kind| match kind {
                NotificationKind::SocReadFailed
                | NotificationKind::StaleData
                | NotificationKind::AutoStop(_) => true,
                NotificationKind::ActuationFailed { control, step } => {
                    *control == KIND && *step != ActuationStep::DisableCommand
                }
            })
            .await;
        self.sync_snapshot(now);

        info!(
            "✅ [DISCHARGE] Started: initial export {:.3} kWh, target {:.3} kWh",
            start_export, target_energy_kwh
        );
        Ok(())
    }

    /// Stop forced discharge. Never gated by the breaker.
    pub async fn stop_discharge(&mut self, now: DateTime<Utc>, reason: StopReason) -> EngineResult<()> {
        const KIND: ControlKind = ControlKind::Discharge;
        let enable = self.config.points.discharge_enable.clone();
        let power = self.config.points.discharge_power.clone();

        self.disable_step(KIND, &enable, Some(&power), now).await?;
        self.discharge.set_session(None);
        self.sync_snapshot(now);

        if reason.is_safety_critical() {
            let detail = match reason {
                StopReason::ReserveBreached => "Battery SOC fell below the inverter reserve.".to_owned(),
                _ => "Today's export allowance has been used up.".to_owned(),
            };
            self.raise(NotificationKind::AutoStop(reason), &detail).await;
        }

        info!("⚡ [DISCHARGE] Stopped ({})", reason);
        Ok(())
    }

    // ============= Charge =============

    /// Start grid charging for the planned next charge session
    pub async fn start_charge(&mut self, now: DateTime<Utc>, origin: StartOrigin) -> EngineResult<()> {
        const KIND: ControlKind = ControlKind::Charge;

        let charge_points = self
            .config
            .points
            .charge
            .clone()
            .ok_or_else(|| EngineError::MissingConfiguration("points.charge".to_owned()))?;

        if self.charge.is_active() {
            return Err(EngineError::refused(KIND, "charge is already active"));
        }

        let session = self
            .snapshot
            .as_ref()
            .map(|s| s.next_charge_session.clone())
            .ok_or_else(|| EngineError::refused(KIND, "no snapshot available yet"))?;
        let energy_kwh = total_energy_kwh(&session);
        if session.is_empty() || energy_kwh <= 0.0 {
            return Err(EngineError::refused(KIND, "no charge session planned"));
        }

        let duration_minutes = total_duration_minutes(&session);
        let power_kw = if duration_minutes > 0.0 {
            energy_kwh / (duration_minutes / 60.0)
        } else {
            self.config.charge.charge_power_kw
        };

        let soc_point = self.config.points.current_soc.clone();
        let soc = match read_value(self.registry.as_ref(), &soc_point, ReadingKind::Soc).await {
            Ok(soc) => soc,
            Err(e) => {
                let detail = format!("Unable to read a valid battery SOC from {soc_point}.");
                self.raise(NotificationKind::SocReadFailed, &detail).await;
                return Err(e);
            }
        };

        if !self.charge_breaker.can_attempt(now) {
            return Err(EngineError::CircuitOpen(KIND));
        }

        if let StartOrigin::Window(window) = &origin {
            info!(
                "🔌 [CHARGE] Window {} reached",
                window.start.with_timezone(&self.tz).format("%H:%M")
            );
        }
        info!(
            "🔌 [CHARGE] Starting: {:.2} kW for {:.1} min, target 100% SOC ({:.3} kWh)",
            power_kw, duration_minutes, energy_kwh
        );

        if let Some(point) = charge_points.power.as_deref() {
            self.required_step(KIND, ActuationStep::PowerSetpoint, point, power_kw, now)
                .await?;
        }
        if let Some(point) = charge_points.duration.as_deref() {
            self.optional_step(point, duration_minutes).await;
        }
        if let Some(point) = charge_points.cutoff_soc.as_deref() {
            self.required_step(KIND, ActuationStep::CutoffSetpoint, point, CHARGE_CUTOFF_SOC, now)
                .await?;
        }
        self.enable_step(KIND, &charge_points.enable, now).await?;

        self.charge.set_session(Some(Session {
            start_reference: soc,
            target_energy_kwh: energy_kwh,
            start_time: now,
        }));
        self.charge_breaker.record_success();
        self.error_state = None;
        self.notifier
            .dismiss_where(self.registry.as_ref(), |kind| match kind {
                NotificationKind::SocReadFailed => true,
                NotificationKind::ActuationFailed { control, step } => {
                    *control == KIND && *step != ActuationStep::DisableCommand
                }
                _ => false,
            })
            .await;
        self.sync_snapshot(now);

        info!("✅ [CHARGE] Started at {:.1}% SOC", soc);
        Ok(())
    }

    pub async fn stop_charge(&mut self, now: DateTime<Utc>, reason: StopReason) -> EngineResult<()> {
        const KIND: ControlKind = ControlKind::Charge;

        let points = self
            .config
            .points
            .charge
            .clone()
            .ok_or_else(|| EngineError::MissingConfiguration("points.charge".to_owned()))?;

        self.disable_step(KIND, &points.enable, points.power.as_deref(), now)
            .await?;
        self.charge.set_session(None);
        self.sync_snapshot(now);

        info!("🔌 [CHARGE] Stopped ({})", reason);
        Ok(())
    }

    // ============= Actuation steps =============

    /// Verified numeric set-point; failure aborts the sequence
    async fn required_step(
        &mut self,
        kind: ControlKind,
        step: ActuationStep,
        point: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let call = ServiceCall::set_value(point, value);
        let verification = Verification::new(point, ExpectedValue::Number(value));
        if safe_invoke(self.registry.as_ref(), &call, Some(&verification), &self.policy).await {
            return Ok(());
        }
        let detail = format!("Failed to set {point} to {value:.2}.");
        Err(self.actuation_failed(kind, step, &detail, now).await)
    }

    /// Best-effort numeric set-point
    async fn optional_step(&self, point: &str, value: f64) {
        let call = ServiceCall::set_value(point, value);
        let verification = Verification::new(point, ExpectedValue::Number(value));
        if !safe_invoke(self.registry.as_ref(), &call, Some(&verification), &self.policy).await {
            warn!("⚠️ [SAFETY] Failed to set {} to {:.1}, continuing anyway", point, value);
        }
    }

    async fn enable_step(&mut self, kind: ControlKind, point: &str, now: DateTime<Utc>) -> EngineResult<()> {
        let call = ServiceCall::turn_on(point);
        // Buttons have no state to read back
        let verification = (!is_button(point)).then(|| Verification::new(point, ExpectedValue::on()));
        if safe_invoke(self.registry.as_ref(), &call, verification.as_ref(), &self.policy).await {
            return Ok(());
        }
        let detail = format!("Failed to enable {kind} on {point}; it has not started.");
        Err(self
            .actuation_failed(kind, ActuationStep::EnableCommand, &detail, now)
            .await)
    }

    /// Switch `point` off. A button cannot be switched off, so the session is
    /// ended by writing 0 to `power_point` instead; without one the stop fails.
    async fn disable_step(
        &mut self,
        kind: ControlKind,
        point: &str,
        power_point: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let command = if is_button(point) {
            power_point.map(|power| {
                warn!(
                    "⚠️ [SAFETY] {} cannot be switched off, stopping {} by setting {} to 0",
                    point, kind, power
                );
                (
                    ServiceCall::set_value(power, 0.0),
                    Verification::new(power, ExpectedValue::Number(0.0)),
                )
            })
        } else {
            Some((
                ServiceCall::turn_off(point),
                Verification::new(point, ExpectedValue::off()),
            ))
        };

        let stopped = match &command {
            Some((call, verification)) => {
                safe_invoke(self.registry.as_ref(), call, Some(verification), &self.policy).await
            }
            None => false,
        };

        if stopped {
            self.breaker_mut(kind).record_success();
            if self.error_state.as_deref().is_some_and(|s| s.starts_with(kind.as_str())) {
                self.error_state = None;
            }
            self.notifier
                .dismiss(
                    self.registry.as_ref(),
                    NotificationKind::ActuationFailed {
                        control: kind,
                        step: ActuationStep::DisableCommand,
                    },
                )
                .await;
            return Ok(());
        }

        let detail = if command.is_some() {
            format!("Failed to disable {kind} on {point}.")
        } else {
            format!("{point} cannot be switched off and no {kind} power set-point is configured.")
        };
        Err(self
            .actuation_failed(kind, ActuationStep::DisableCommand, &detail, now)
            .await)
    }

    async fn actuation_failed(
        &mut self,
        control: ControlKind,
        step: ActuationStep,
        detail: &str,
        now: DateTime<Utc>,
    ) -> EngineError {
        error!("❌ [SAFETY] {} {} failed: {}", control, step, detail);
        self.breaker_mut(control).record_failure(now);
        self.raise(NotificationKind::ActuationFailed { control, step }, detail)
            .await;
        EngineError::Actuation { control, step }
    }

    async fn raise(&mut self, kind: NotificationKind, detail: &str) {
        self.error_state = Some(kind.id());
        self.notifier.raise(self.registry.as_ref(), kind, detail).await;
    }

    fn breaker_mut(&mut self, kind: ControlKind) -> &mut CircuitBreaker {
        match kind {
            ControlKind::Discharge => &mut self.discharge_breaker,
            ControlKind::Charge => &mut self.charge_breaker,
        }
    }

    /// Reflect session and health changes made outside a tick
    fn sync_snapshot(&mut self, now: DateTime<Utc>) {
        let health = self.health(now);
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.discharge_active = self.discharge.is_active();
            snapshot.charge_active = self.charge.is_active();
            snapshot.health = health;
        }
    }
}

fn seconds(secs: u64) -> TimeDelta {
    // Capped at one year
    TimeDelta::seconds(i64::try_from(secs.min(31_536_000)).unwrap_or(31_536_000))
}
