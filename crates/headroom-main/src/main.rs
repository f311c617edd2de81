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


mod config;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use config::AppConfig;
use headroom_core::types::EngineConfig;
use headroom_core::{ControlLoop, ControlSender, Coordinator, PointRegistry};
use headroom_ha::{HomeAssistantClient, HomeAssistantRegistry};

/// Headroom - export headroom planning and battery discharge control
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML or JSON); skips the default search order
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = AppConfig::load(cli.config.as_deref())?;
    log_summary(&config);

    let ha_client = HomeAssistantClient::from_config(
        config.system.ha_base_url.clone(),
        config.system.ha_token.clone(),
    )
    .context("Failed to initialize Home Assistant client")?;
    info!("🏠 Home Assistant client targeting {}", ha_client.base_url());

    if !ha_client.ping().await {
        warn!("⚠️ Home Assistant is not reachable yet, ticks will fail until it is");
    }

    let tz = resolve_timezone(&config, &ha_client).await;

    let registry: Arc<dyn PointRegistry> = Arc::new(HomeAssistantRegistry::new(ha_client));
    info!("🔌 Point registry: {}", registry.name());

    let interval = config.update_interval();
    let web_port = config.system.web_port;
    let coordinator = Coordinator::new(registry, EngineConfig::from(config), tz);

    let control_loop = ControlLoop::new(coordinator, interval);
    let shared = control_loop.shared_state();
    let (control, channel) = ControlSender::new();

    info!("🌐 Starting web server on port {web_port}...");
    tokio::spawn(async move {
        if let Err(e) = headroom_web::start_web_server(control, shared, web_port).await {
            error!("❌ Web server failed: {}", e);
        }
    });

    let loop_task = tokio::spawn(control_loop.run(channel));
    info!("✅ Starting main loop...");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("👋 Shutdown requested");
        }
        result = loop_task => {
            if let Err(e) = result {
                error!("❌ Control loop task failed: {}", e);
            }
        }
    }

    Ok(())
}

fn log_summary(config: &AppConfig) {
    info!("🚀 Starting Headroom");
    info!("📋 Configuration Summary:");
    info!("   Discharge enable: {}", config.points.discharge_enable);
    info!("   SOC: {}", config.points.current_soc);
    info!(
        "   Target export: {} W, min SOC {}%, margin {} kWh",
        config.discharge.target_export_w,
        config.discharge.min_soc,
        config.discharge.safety_margin_kwh
    );
    info!(
        "   Auto discharge: {} in {}",
        config.discharge.enable_auto_discharge, config.discharge.export_window
    );
    info!(
        "   CI planning: {}, charge planning: {}",
        config.planning.enable_ci_planning, config.charge.enable_charge_planning
    );
    info!(
        "   Update interval: {}s",
        config.system.update_interval_secs
    );
}

/// Configured timezone, else Home Assistant's, else UTC
async fn resolve_timezone(config: &AppConfig, client: &HomeAssistantClient) -> Tz {
    if let Some(tz) = config.timezone() {
        info!("🌍 Using configured timezone: {}", tz);
        return tz;
    }

    match client.get_timezone().await {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => {
                info!("🌍 Using Home Assistant timezone: {}", tz);
                tz
            }
            Err(_) => {
                warn!("⚠️ Unknown Home Assistant timezone '{name}', using UTC");
                Tz::UTC
            }
        },
        Err(e) => {
            warn!("⚠️ Failed to fetch timezone from HA, using UTC: {}", e);
            Tz::UTC
        }
    }
}
