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

//! Carbon-intensity forecast normalisation.
//!
//! Providers disagree on nesting. Accepted shapes, checked in order:
//! - the point state itself holds a JSON document
//! - attribute `data` is a list of periods
//! - attribute `data` is `{"data": [...]}` (optionally with `shortname`)
//!
//! A document may also be `{"data": {"data": [...]}}`.

use chrono::{DateTime, NaiveDateTime, Utc};
use headroom_types::{ForecastPeriod, ParsedForecast};
use serde_json::Value;
use tracing::{debug, trace};

const UNKNOWN_LABEL: &str = "unknown";

/// Normalise a forecast feed into periods.
///
/// Returns `None` when no strategy yields at least one valid period; callers
/// skip planning for that tick.
pub fn parse_forecast(raw_payload: Option<&str>, fallback_attributes: &Value) -> Option<ParsedForecast> {
    let attribute_region = region_of(fallback_attributes);

    if let Some(raw) = raw_payload
        && let Ok(document) = serde_json::from_str::<Value>(raw)
        && let Some(forecast) = from_document(&document, attribute_region.as_deref())
    {
        debug!(
            "📈 [FORECAST] Parsed {} periods from point state",
            forecast.periods.len()
        );
        return Some(forecast);
    }

    let data = fallback_attributes.get("data")?;
    let forecast = match data {
        Value::Array(items) => {
            let periods = parse_periods(items);
            (!periods.is_empty()).then(|| ParsedForecast {
                periods,
                region: attribute_region.clone().unwrap_or_default(),
            })
        }
        Value::Object(_) => from_document(data, attribute_region.as_deref()),
        _ => None,
    };

    match &forecast {
        Some(f) => debug!(
            "📈 [FORECAST] Parsed {} periods from attributes (region '{}')",
            f.periods.len(),
            f.region
        ),
        None => debug!("📈 [FORECAST] No usable forecast periods found"),
    }
    forecast
}

/// The period covering `now`, if any
pub fn current_intensity(periods: &[ForecastPeriod], now: DateTime<Utc>) -> Option<&ForecastPeriod> {
    periods.iter().find(|p| p.contains(now))
}

fn from_document(document: &Value, fallback_region: Option<&str>) -> Option<ParsedForecast> {
    let region = region_of(document).or_else(|| fallback_region.map(ToOwned::to_owned));

    let items = match document {
        Value::Array(items) => items,
        Value::Object(_) => match document.get("data")? {
            Value::Array(items) => items,
            nested @ Value::Object(_) => {
                return from_document(nested, region.as_deref());
            }
            _ => return None,
        },
        _ => return None,
    };

    let periods = parse_periods(items);
    (!periods.is_empty()).then(|| ParsedForecast {
        periods,
        region: region.unwrap_or_default(),
    })
}

fn region_of(value: &Value) -> Option<String> {
    value
        .get("shortname")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

fn parse_periods(items: &[Value]) -> Vec<ForecastPeriod> {
    items.iter().filter_map(parse_period).collect()
}

fn parse_period(item: &Value) -> Option<ForecastPeriod> {
    let start = item.get("from").and_then(Value::as_str).and_then(parse_timestamp);
    let end = item.get("to").and_then(Value::as_str).and_then(parse_timestamp);
    let (Some(start), Some(end)) = (start, end) else {
        trace!("Skipping forecast period with bad timestamps: {}", item);
        return None;
    };
    if start >= end {
        trace!("Skipping empty forecast period {} -> {}", start, end);
        return None;
    }

    let intensity = item.get("intensity");
    let intensity_value = intensity
        .and_then(|i| i.get("forecast"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let intensity_label = intensity
        .and_then(|i| i.get("index"))
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_LABEL)
        .to_owned();

    Some(ForecastPeriod {
        start,
        end,
        intensity_value,
        intensity_label,
    })
}

/// RFC 3339, or the minute-precision `2025-06-10T12:30Z` form
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|dt| dt.and_utc())
}
