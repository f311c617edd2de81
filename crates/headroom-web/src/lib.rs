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


//! HTTP control surface: commands in, snapshot and health out.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use headroom_core::{CommandReply, ControlCommand, ControlError, ControlSender, SharedState};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Application state for web handlers
#[derive(Clone, Debug)]
pub struct AppState {
    pub control: ControlSender,
    pub shared: SharedState,
}

/// Routes served by the add-on
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/commands", get(commands_handler))
        .route("/api/commands/{command}", post(command_handler))
        .layer(CorsLayer::permissive()) // Allow HA Ingress
        .with_state(state)
}

/// Serve the control surface until the listener fails
///
/// # Errors
/// Returns error if server fails to bind or serve
pub async fn start_web_server(
    control: ControlSender,
    shared: SharedState,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(AppState { control, shared });

    let addr = format!("0.0.0.0:{port}");
    info!("🌐 Starting web server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Healthy while the last tick succeeded and data is fresh at request time
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.shared.read().health.clone().as_of(Utc::now());
    let status = if health.last_update_success && !health.stale {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// Latest snapshot as a flat attribute map
async fn snapshot_handler(State(state): State<AppState>) -> Response {
    let attributes = state
        .shared
        .read()
        .snapshot
        .as_ref()
        .map(headroom_core::types::Snapshot::to_attributes);

    match attributes {
        Some(attributes) => Json(attributes).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "No snapshot available yet" })),
        )
            .into_response(),
    }
}

async fn commands_handler() -> impl IntoResponse {
    Json(ControlCommand::all().map(|command| command.as_str()))
}

async fn command_handler(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> Response {
    let command = match command.parse::<ControlCommand>() {
        Ok(command) => command,
        Err(e) => {
            debug!("Rejected command '{}'", command);
            return (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    debug!("Forwarding command {} at {}", command, Utc::now());
    match state.control.send(command).await {
        Ok(reply) => reply_response(reply),
        Err(e @ (ControlError::ChannelClosed | ControlError::ResponseDropped)) => {
            warn!("⚠️ Command {} not handled: {}", command, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

fn reply_response(reply: CommandReply) -> Response {
    let status = if reply.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(reply)).into_response()
}
