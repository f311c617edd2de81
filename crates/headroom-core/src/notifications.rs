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

//! Critical notifications surfaced on the host's notification service.

use crate::errors::ActuationStep;
use crate::traits::{PointRegistry, ServiceCall};
use headroom_types::{ControlKind, StopReason};
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, warn};

const ID_PREFIX: &str = "headroom_";
const TITLE_PREFIX: &str = "⚠️ Headroom: ";

/// Conditions an operator must hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    SocReadFailed,
    StaleData,
    ActuationFailed {
        control: ControlKind,
        step: ActuationStep,
    },
    AutoStop(StopReason),
}

impl NotificationKind {
    /// Stable id, also used as the controller's error state
    pub fn id(&self) -> String {
        match self {
            Self::SocReadFailed => "soc_read_failed".to_owned(),
            Self::StaleData => "stale_data".to_owned(),
            Self::ActuationFailed { control, step } => format!("{}_{}_failed", control, step.id()),
            Self::AutoStop(StopReason::HeadroomExhausted) => "auto_stop_headroom".to_owned(),
            Self::AutoStop(StopReason::ReserveBreached) => "auto_stop_reserve".to_owned(),
            Self::AutoStop(reason) => format!("auto_stop_{reason}"),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::SocReadFailed => "SOC Read Failed".to_owned(),
            Self::StaleData => "Stale Data".to_owned(),
            Self::ActuationFailed { control, step } => {
                let control = match control {
                    ControlKind::Discharge => "Discharge",
                    ControlKind::Charge => "Charge",
                };
                let step = match step {
                    ActuationStep::PowerSetpoint => "Power Setting",
                    ActuationStep::CutoffSetpoint => "Cutoff SOC Setting",
                    ActuationStep::EnableCommand => "Start",
                    ActuationStep::DisableCommand => "Stop",
                };
                format!("{control} {step} Failed")
            }
            Self::AutoStop(StopReason::HeadroomExhausted) => "Export Limit Reached".to_owned(),
            Self::AutoStop(StopReason::ReserveBreached) => "Reserve SOC Reached".to_owned(),
            Self::AutoStop(_) => "Discharge Stopped".to_owned(),
        }
    }

    /// What the operator should do about it
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::SocReadFailed => "Check the battery SOC sensor is available.",
            Self::StaleData => "Check the connection to Home Assistant and the source sensors.",
            Self::ActuationFailed {
                step: ActuationStep::DisableCommand,
                ..
            } => "The battery may still be running! Check it immediately and stop it manually if needed.",
            Self::ActuationFailed { .. } => "Check the inverter integration and entity configuration.",
            Self::AutoStop(_) => "Discharge was stopped automatically. No action is required.",
        }
    }

    fn notification_id(&self) -> String {
        format!("{ID_PREFIX}{}", self.id())
    }
}

/// Sends persistent notifications, at most once per id until dismissed
#[derive(Debug, Default)]
pub struct Notifier {
    raised: HashSet<NotificationKind>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self, kind: &NotificationKind) -> bool {
        self.raised.contains(kind)
    }

    /// Raise a notification; a no-op while the same id is still showing
    pub async fn raise(&mut self, registry: &dyn PointRegistry, kind: NotificationKind, detail: &str) {
        if self.raised.contains(&kind) {
            return;
        }

        let call = ServiceCall::new(
            "persistent_notification",
            "create",
            json!({
                "title": format!("{TITLE_PREFIX}{}", kind.title()),
                "message": format!("{detail} {}", kind.remediation()),
                "notification_id": kind.notification_id(),
            }),
        );

        match registry.invoke(&call).await {
            Ok(()) => {
                warn!("⚠️ [NOTIFY] Raised {}: {}", kind.id(), detail);
                self.raised.insert(kind);
            }
            Err(e) => warn!("⚠️ [NOTIFY] Failed to raise {}: {:#}", kind.id(), e),
        }
    }

    /// Dismiss one raised notification
    pub async fn dismiss(&mut self, registry: &dyn PointRegistry, kind: NotificationKind) {
        if !self.raised.contains(&kind) {
            return;
        }
        if send_dismiss(registry, &kind).await {
            self.raised.remove(&kind);
        }
    }

    /// Dismiss every raised notification matching `filter`
    pub async fn dismiss_where(
        &mut self,
        registry: &dyn PointRegistry,
        filter: impl Fn(&NotificationKind) -> bool,
    ) {
        let kinds: Vec<NotificationKind> =
            self.raised.iter().filter(|kind| filter(kind)).copied().collect();
        for kind in kinds {
            self.dismiss(registry, kind).await;
        }
    }
}

async fn send_dismiss(registry: &dyn PointRegistry, kind: &NotificationKind) -> bool {
    let call = ServiceCall::new(
        "persistent_notification",
        "dismiss",
        json!({ "notification_id": kind.notification_id() }),
    );
    match registry.invoke(&call).await {
        Ok(()) => {
            info!("✅ [NOTIFY] Dismissed {}", kind.id());
            true
        }
        Err(e) => {
            warn!("⚠️ [NOTIFY] Failed to dismiss {}: {:#}", kind.id(), e);
            false
        }
    }
}
