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

//! Greedy allocation of an energy budget across forecast periods.
//!
//! Periods are clipped to the requested day and time-of-day window, sorted
//! by intensity and filled in order until the budget runs out. This is a
//! heuristic: with very uneven period lengths it does not guarantee the
//! optimal weighted intensity.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use headroom_types::time_window::start_of_day;
use headroom_types::{ForecastPeriod, ScheduleWindow, TimeWindow};
use tracing::debug;

/// Budget left below this is treated as spent (kWh)
const ENERGY_EPSILON: f64 = 1e-6;

/// Order in which periods are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Cleanest periods first (charging)
    LowestFirst,
    /// Dirtiest periods first (discharging)
    HighestFirst,
}

/// Calendar bound applied before the time-of-day window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayFilter {
    /// From `now` until local midnight
    Today { now: DateTime<Utc> },
    /// The whole local day after the one containing `now`
    Tomorrow { now: DateTime<Utc> },
    /// The nearest occurrence of the window that has not ended, starting no
    /// earlier than `now`
    NextOccurrence { now: DateTime<Utc> },
}

/// Inputs for one plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub budget_kwh: f64,
    pub power_kw: f64,
    pub selection: Selection,
    pub window: TimeWindow,
    pub filter: DayFilter,
}

impl PlanRequest {
    /// Discharge for the rest of today, budget = current headroom
    pub fn today_discharge(
        headroom_kwh: f64,
        power_kw: f64,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            budget_kwh: headroom_kwh,
            power_kw,
            selection: Selection::HighestFirst,
            window,
            filter: DayFilter::Today { now },
        }
    }

    /// Discharge across tomorrow, budget = tomorrow's forecast production
    pub fn tomorrow_discharge(
        forecast_tomorrow_kwh: f64,
        power_kw: f64,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            budget_kwh: forecast_tomorrow_kwh,
            power_kw,
            selection: Selection::HighestFirst,
            window,
            filter: DayFilter::Tomorrow { now },
        }
    }

    /// Next grid charge session, budget = energy to reach 100 % SOC
    pub fn next_charge(
        energy_needed_kwh: f64,
        charge_power_kw: f64,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            budget_kwh: energy_needed_kwh,
            power_kw: charge_power_kw,
            selection: Selection::LowestFirst,
            window,
            filter: DayFilter::NextOccurrence { now },
        }
    }
}

/// Energy (kWh) needed to bring the battery from `soc` to 100 %
pub fn charge_energy_needed(soc: f64, battery_capacity_kwh: f64) -> f64 {
    ((100.0 - soc) / 100.0 * battery_capacity_kwh).max(0.0)
}

/// Allocate `request.budget_kwh` across `periods`.
///
/// Windows come out in selection order. Empty input, a non-positive budget
/// or a non-positive power give an empty plan.
pub fn plan(periods: &[ForecastPeriod], request: &PlanRequest, tz: Tz) -> Vec<ScheduleWindow> {
    if periods.is_empty() || request.budget_kwh <= 0.0 || request.power_kw <= 0.0 {
        return Vec::new();
    }

    let allowed = allowed_intervals(&request.window, request.filter, tz);
    let mut candidates: Vec<Candidate> = periods
        .iter()
        .flat_map(|period| {
            allowed
                .iter()
                .filter_map(move |&(from, to)| clip(period, from, to))
        })
        .collect();

    // Stable sort: equal intensities keep input order
    match request.selection {
        Selection::HighestFirst => {
            candidates.sort_by(|a, b| {
                b.clipped
                    .intensity_value
                    .total_cmp(&a.clipped.intensity_value)
            });
        }
        Selection::LowestFirst => {
            candidates.sort_by(|a, b| {
                a.clipped
                    .intensity_value
                    .total_cmp(&b.clipped.intensity_value)
            });
        }
    }

    let mut remaining = request.budget_kwh;
    let mut windows = Vec::new();
    for Candidate {
        period_start,
        clipped: candidate,
    } in candidates
    {
        if remaining <= ENERGY_EPSILON {
            break;
        }

        let capacity = request.power_kw * candidate.duration_minutes() / 60.0;
        let allocated = capacity.min(remaining);
        let duration_minutes = allocated / request.power_kw * 60.0;
        let end = if allocated >= capacity {
            candidate.end
        } else {
            candidate.start + TimeDelta::milliseconds((duration_minutes * 60_000.0).round() as i64)
        };

        windows.push(ScheduleWindow {
            start: candidate.start,
            end,
            duration_minutes,
            energy_kwh: allocated,
            intensity_value: candidate.intensity_value,
            intensity_label: candidate.intensity_label,
            period_start,
        });
        remaining -= allocated;
    }

    debug!(
        "📈 [PLANNER] {:?} plan: {} windows, {:.3}/{:.3} kWh at {:.2} kW",
        request.selection,
        windows.len(),
        request.budget_kwh - remaining.max(0.0),
        request.budget_kwh,
        request.power_kw
    );
    windows
}

/// UTC intervals in which windows may be placed
fn allowed_intervals(
    window: &TimeWindow,
    filter: DayFilter,
    tz: Tz,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    match filter {
        DayFilter::Today { now } => {
            let today = now.with_timezone(&tz).date_naive();
            let midnight = start_of_day(next_day(today), tz);
            occurrences_within(window, today, tz, now, midnight)
        }
        DayFilter::Tomorrow { now } => {
            let tomorrow = next_day(now.with_timezone(&tz).date_naive());
            let from = start_of_day(tomorrow, tz);
            let to = start_of_day(next_day(tomorrow), tz);
            occurrences_within(window, tomorrow, tz, from, to)
        }
        DayFilter::NextOccurrence { now } => {
            let (start, end) = window.next_occurrence(now, tz);
            let start = start.max(now);
            if start < end {
                vec![(start, end)]
            } else {
                Vec::new()
            }
        }
    }
}

/// Parts of the window's occurrences that fall inside `[lower, upper)`.
/// The previous day's occurrence matters for windows that wrap midnight.
fn occurrences_within(
    window: &TimeWindow,
    date: NaiveDate,
    tz: Tz,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    [date.pred_opt(), Some(date)]
        .into_iter()
        .flatten()
        .map(|day| window.occurrence_on(day, tz))
        .filter_map(|(start, end)| {
            let start = start.max(lower);
            let end = end.min(upper);
            (start < end).then_some((start, end))
        })
        .collect()
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// A forecast period cut down to an allowed interval
struct Candidate {
    period_start: DateTime<Utc>,
    clipped: ForecastPeriod,
}

fn clip(period: &ForecastPeriod, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Candidate> {
    let start = period.start.max(from);
    let end = period.end.min(to);
    (start < end).then(|| Candidate {
        period_start: period.start,
        clipped: ForecastPeriod {
            start,
            end,
            intensity_value: period.intensity_value,
            intensity_label: period.intensity_label.clone(),
        },
    })
}
