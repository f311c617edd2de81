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

use crate::client::HomeAssistantClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use headroom_core::types::PointReading;
use headroom_core::{PointRegistry, ServiceCall};

/// Home Assistant entities as engine points
#[derive(Debug, Clone)]
pub struct HomeAssistantRegistry {
    client: HomeAssistantClient,
}

impl HomeAssistantRegistry {
    pub fn new(client: HomeAssistantClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HomeAssistantClient {
        &self.client
    }
}

#[async_trait]
impl PointRegistry for HomeAssistantRegistry {
    async fn read(&self, point_id: &str) -> Result<PointReading> {
        let state = self
            .client
            .get_state(point_id)
            .await
            .with_context(|| format!("Failed to read {point_id}"))?;
        Ok(state.into())
    }

    async fn invoke(&self, call: &ServiceCall) -> Result<()> {
        self.client
            .call_service(&call.to_string(), &call.data)
            .await
            .with_context(|| format!("Service {call} failed"))
    }

    fn name(&self) -> &str {
        "home_assistant"
    }
}
