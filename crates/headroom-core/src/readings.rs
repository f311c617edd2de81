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

use crate::errors::{EngineError, EngineResult};
use crate::traits::PointRegistry;
use headroom_types::{PointReading, ReadingKind};
use tracing::{debug, warn};

/// Read a required numeric point and check it against its plausible range
pub async fn read_value(
    registry: &dyn PointRegistry,
    point_id: &str,
    kind: ReadingKind,
) -> EngineResult<f64> {
    let reading = read_raw(registry, point_id).await?;
    let value = numeric(&reading)?;

    if !kind.accepts(value) {
        let (min, max) = kind.range();
        return Err(EngineError::OutOfRange {
            point: point_id.to_owned(),
            value,
            unit: kind.unit(),
            min,
            max,
        });
    }

    debug!("🔍 [HA QUERY] {} = {}{}", point_id, value, kind.unit());
    Ok(value)
}

/// Read an optional numeric point; any problem is logged and yields `None`
pub async fn read_optional(
    registry: &dyn PointRegistry,
    point_id: Option<&str>,
    kind: ReadingKind,
) -> Option<f64> {
    let point_id = point_id?;
    match read_value(registry, point_id, kind).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("⚠️ [HA QUERY] Optional point ignored: {}", e);
            None
        }
    }
}

/// Read a point without interpreting it (feeds with JSON attributes)
pub async fn read_raw(registry: &dyn PointRegistry, point_id: &str) -> EngineResult<PointReading> {
    registry
        .read(point_id)
        .await
        .map_err(|e| EngineError::DataUnavailable {
            point: point_id.to_owned(),
            reason: format!("{e:#}"),
        })
}

fn numeric(reading: &PointReading) -> EngineResult<f64> {
    if !reading.is_available() {
        return Err(EngineError::DataUnavailable {
            point: reading.point_id.clone(),
            reason: format!("state is '{}'", reading.value),
        });
    }
    reading.as_f64().ok_or_else(|| EngineError::DataUnavailable {
        point: reading.point_id.clone(),
        reason: format!("'{}' is not a number", reading.value),
    })
}
