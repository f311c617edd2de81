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

use crate::coordinator::{Coordinator, StartOrigin, TickEvent};
use crate::errors::EngineResult;
use chrono::{DateTime, Utc};
use headroom_types::{ControlKind, HealthReport, Snapshot, StopReason};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Zero-argument commands accepted by the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    StartDischarge,
    StopDischarge,
    CalculateDischarge,
    StartCharge,
    StopCharge,
}

impl ControlCommand {
    pub fn all() -> [Self; 5] {
        [
            Self::StartDischarge,
            Self::StopDischarge,
            Self::CalculateDischarge,
            Self::StartCharge,
            Self::StopCharge,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartDischarge => "start_discharge",
            Self::StopDischarge => "stop_discharge",
            Self::CalculateDischarge => "calculate_discharge",
            Self::StartCharge => "start_charge",
            Self::StopCharge => "stop_charge",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| ControlError::UnknownCommand(s.to_owned()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Control loop is not running")]
    ChannelClosed,

    #[error("Control loop dropped the request")]
    ResponseDropped,
}

/// Outcome of one command as reported back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub command: ControlCommand,
    pub success: bool,
    pub message: String,
}

impl CommandReply {
    fn from_result(command: ControlCommand, result: EngineResult<String>) -> Self {
        match result {
            Ok(message) => Self {
                command,
                success: true,
                message,
            },
            Err(e) => Self {
                command,
                success: false,
                message: e.to_string(),
            },
        }
    }
}

/// Command from the control surface with its reply slot
#[derive(Debug)]
pub struct ControlRequest {
    pub command: ControlCommand,
    pub respond_to: oneshot::Sender<CommandReply>,
}

/// Receiving end, owned by the control loop
#[derive(Debug)]
pub struct ControlChannel {
    receiver: mpsc::UnboundedReceiver<ControlRequest>,
}

impl ControlChannel {
    /// Next queued command, `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ControlRequest> {
        self.receiver.recv().await
    }
}

/// Clonable sender for control commands
#[derive(Clone)]
pub struct ControlSender {
    sender: mpsc::UnboundedSender<ControlRequest>,
}

impl fmt::Debug for ControlSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSender").finish_non_exhaustive()
    }
}

impl ControlSender {
    /// Create a new sender/receiver pair
    pub fn new() -> (Self, ControlChannel) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, ControlChannel { receiver })
    }

    /// Queue a command and wait for the control loop to handle it
    pub async fn send(&self, command: ControlCommand) -> Result<CommandReply, ControlError> {
        let (respond_to, response) = oneshot::channel();

        self.sender
            .send(ControlRequest {
                command,
                respond_to,
            })
            .map_err(|_| ControlError::ChannelClosed)?;

        response.await.map_err(|_| ControlError::ResponseDropped)
    }
}

/// What readers of the control loop see
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishedState {
    /// Last successful snapshot, kept across failed ticks
    pub snapshot: Option<Snapshot>,
    pub health: HealthReport,
}

pub type SharedState = Arc<RwLock<PublishedState>>;

/// Drives the coordinator: periodic ticks plus commands, one at a time
#[derive(Debug)]
pub struct ControlLoop {
    coordinator: Coordinator,
    interval: Duration,
    shared: SharedState,
}

impl ControlLoop {
    pub fn new(coordinator: Coordinator, interval: Duration) -> Self {
        Self {
            coordinator,
            interval: interval.max(Duration::from_secs(1)),
            shared: Arc::new(RwLock::new(PublishedState::default())),
        }
    }

    pub fn shared_state(&self) -> SharedState {
        Arc::clone(&self.shared)
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Run until the task is dropped
    pub async fn run(mut self, mut channel: ControlChannel) {
        info!(
            "🔄 [TICK] Control loop started, interval {:?}",
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are already logged and reflected in health
                    let _ = self.run_tick(Utc::now()).await;
                }
                request = channel.recv(), if commands_open => match request {
                    Some(request) => {
                        let reply = self.handle_command(request.command, Utc::now()).await;
                        if request.respond_to.send(reply).is_err() {
                            debug!("Command caller went away before the reply");
                        }
                    }
                    None => {
                        warn!("⚠️ Command channel closed, continuing with ticks only");
                        commands_open = false;
                    }
                },
            }
        }
    }

    /// One tick followed by whatever stops and starts it requested
    pub async fn run_tick(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        let result = self.coordinator.tick(now).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.publish(now);
                return Err(e);
            }
        };

        for event in outcome.events {
            self.apply_event(event, now).await;
        }
        self.publish(now);
        Ok(())
    }

    async fn apply_event(&mut self, event: TickEvent, now: DateTime<Utc>) {
        let result = match event {
            TickEvent::StopRequested {
                kind: ControlKind::Discharge,
                reason,
            } => self.coordinator.stop_discharge(now, reason).await,
            TickEvent::StopRequested {
                kind: ControlKind::Charge,
                reason,
            } => self.coordinator.stop_charge(now, reason).await,
            TickEvent::StartRequested {
                kind: ControlKind::Discharge,
                window,
            } => {
                self.coordinator
                    .start_discharge(now, StartOrigin::Window(window))
                    .await
            }
            TickEvent::StartRequested {
                kind: ControlKind::Charge,
                window,
            } => {
                self.coordinator
                    .start_charge(now, StartOrigin::Window(window))
                    .await
            }
        };

        if let Err(e) = result {
            error!("❌ Automatic action failed: {}", e);
        }
    }

    /// Execute one command and publish the resulting state
    pub async fn handle_command(&mut self, command: ControlCommand, now: DateTime<Utc>) -> CommandReply {
        info!("📥 Command received: {}", command);

        let result = match command {
            ControlCommand::StartDischarge => self
                .coordinator
                .start_discharge(now, StartOrigin::Manual)
                .await
                .map(|()| "Discharge started".to_owned()),
            ControlCommand::StopDischarge => self
                .coordinator
                .stop_discharge(now, StopReason::External)
                .await
                .map(|()| "Discharge stopped".to_owned()),
            ControlCommand::CalculateDischarge => self.run_tick(now).await.map(|()| {
                self.coordinator.snapshot().map_or_else(
                    || "Calculation complete".to_owned(),
                    |s| {
                        format!(
                            "Discharge needed: {:.0} W for {:.1} min (headroom {:.3} kWh)",
                            s.recommended_discharge_w,
                            s.discharge_duration_minutes,
                            s.export_headroom_kwh
                        )
                    },
                )
            }),
            ControlCommand::StartCharge => self
                .coordinator
                .start_charge(now, StartOrigin::Manual)
                .await
                .map(|()| "Charge started".to_owned()),
            ControlCommand::StopCharge => self
                .coordinator
                .stop_charge(now, StopReason::External)
                .await
                .map(|()| "Charge stopped".to_owned()),
        };

        if let Err(e) = &result {
            warn!("⚠️ Command {} failed: {}", command, e);
        }
        self.publish(now);
        CommandReply::from_result(command, result)
    }

    fn publish(&self, now: DateTime<Utc>) {
        let state = PublishedState {
            snapshot: self.coordinator.snapshot().cloned(),
            health: self.coordinator.health(now),
        };
        *self.shared.write() = state;
    }
}
