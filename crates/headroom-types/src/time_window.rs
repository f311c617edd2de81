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

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Daily time-of-day window in local time, e.g. `23:30-05:30`.
///
/// A window whose start is later than its end wraps past midnight. A window
/// whose start equals its end covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse a window from two `HH:MM` (or `HH:MM:SS`) strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
        })
    }

    /// Whole-day window (00:00-00:00)
    pub fn all_day() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }

    /// Whether a clock time falls inside the window (both bounds inclusive)
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.is_overnight() {
            time >= self.start || time <= self.end
        } else {
            time >= self.start && time <= self.end
        }
    }

    /// The occurrence that starts on `date` (local), as a UTC interval.
    /// Overnight and whole-day occurrences end on the following day. Both
    /// bounds are resolved as local wall-clock times, so an occurrence
    /// spanning a DST change is an hour shorter or longer.
    pub fn occurrence_on(&self, date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        let end_date = if self.start < self.end {
            date
        } else {
            date.succ_opt().unwrap_or(date)
        };
        (
            local_to_utc(tz, date, self.start),
            local_to_utc(tz, end_date, self.end),
        )
    }

    /// The single nearest occurrence that has not yet ended at `now`.
    ///
    /// If `now` lies inside an occurrence (including one that started
    /// yesterday and wraps past midnight) that occurrence is returned
    /// unchanged; callers clip its start to `now` themselves.
    pub fn next_occurrence(&self, now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.with_timezone(&tz).date_naive();
        let candidates = [today.pred_opt(), Some(today), today.succ_opt()];

        candidates
            .into_iter()
            .flatten()
            .map(|date| self.occurrence_on(date, tz))
            .find(|(_, end)| *end > now)
            .unwrap_or_else(|| self.occurrence_on(today + Days::new(1), tz))
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::all_day()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .with_context(|| format!("Invalid time of day '{raw}', expected HH:MM"))
}

/// Midnight at the start of `date` in `tz`, as UTC
pub fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    local_to_utc(tz, date, NaiveTime::MIN)
}

/// Resolve a local wall-clock time to UTC.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant; times in a
/// DST gap are shifted forward by one hour.
pub fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive + TimeDelta::hours(1)))
                .earliest()
        })
        .map_or_else(|| naive.and_utc(), |dt| dt.with_timezone(&Utc))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_contains_daytime_window() {
        let window = TimeWindow::new(hm(10, 0), hm(16, 0));
        assert!(window.contains(hm(10, 0)));
        assert!(window.contains(hm(13, 30)));
        assert!(window.contains(hm(16, 0)));
        assert!(!window.contains(hm(9, 59)));
        assert!(!window.contains(hm(16, 1)));
    }

    #[test]
    fn test_contains_overnight_window() {
        let window = TimeWindow::new(hm(23, 0), hm(6, 0));
        assert!(window.is_overnight());
        assert!(window.contains(hm(23, 30)));
        assert!(window.contains(hm(2, 0)));
        assert!(window.contains(hm(6, 0)));
        assert!(!window.contains(hm(12, 0)));
    }

    #[test]
    fn test_occurrence_bounds() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();

        let (start, end) = TimeWindow::new(hm(10, 0), hm(16, 30)).occurrence_on(date, Tz::UTC);
        assert_eq!(start, utc("2025-06-10T10:00:00Z"));
        assert_eq!(end, utc("2025-06-10T16:30:00Z"));

        let (start, end) = TimeWindow::all_day().occurrence_on(date, Tz::UTC);
        assert_eq!(start, utc("2025-06-10T00:00:00Z"));
        assert_eq!(end, utc("2025-06-11T00:00:00Z"));
    }

    #[test]
    fn test_overnight_occurrence_when_clocks_go_back() {
        // 2025-10-26 01:00 UTC: BST ends, 23:00-06:00 local lasts 8 hours
        let window = TimeWindow::new(hm(23, 0), hm(6, 0));
        let date = NaiveDate::from_ymd_opt(2025, 10, 25).unwrap();
        let (start, end) = window.occurrence_on(date, chrono_tz::Europe::London);
        assert_eq!(start, utc("2025-10-25T22:00:00Z"));
        assert_eq!(end, utc("2025-10-26T06:00:00Z"));
    }

    #[test]
    fn test_overnight_occurrence_when_clocks_go_forward() {
        // 2025-03-30 01:00 UTC: BST starts, 23:00-06:00 local lasts 6 hours
        let window = TimeWindow::new(hm(23, 0), hm(6, 0));
        let date = NaiveDate::from_ymd_opt(2025, 3, 29).unwrap();
        let (start, end) = window.occurrence_on(date, chrono_tz::Europe::London);
        assert_eq!(start, utc("2025-03-29T23:00:00Z"));
        assert_eq!(end, utc("2025-03-30T05:00:00Z"));
    }

    #[test]
    fn test_next_occurrence_inside_overnight_window_after_midnight() {
        let window = TimeWindow::new(hm(23, 0), hm(6, 0));
        let (start, end) = window.next_occurrence(utc("2025-06-11T02:00:00Z"), Tz::UTC);
        assert_eq!(start, utc("2025-06-10T23:00:00Z"));
        assert_eq!(end, utc("2025-06-11T06:00:00Z"));
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let window = TimeWindow::new(hm(23, 0), hm(6, 0));
        let (start, end) = window.next_occurrence(utc("2025-06-11T12:00:00Z"), Tz::UTC);
        assert_eq!(start, utc("2025-06-11T23:00:00Z"));
        assert_eq!(end, utc("2025-06-12T06:00:00Z"));
    }

    #[test]
    fn test_next_occurrence_tomorrow_when_today_passed() {
        let window = TimeWindow::new(hm(1, 0), hm(5, 0));
        let (start, _) = window.next_occurrence(utc("2025-06-11T08:00:00Z"), Tz::UTC);
        assert_eq!(start, utc("2025-06-12T01:00:00Z"));
    }

    #[test]
    fn test_occurrence_respects_timezone() {
        let window = TimeWindow::new(hm(23, 0), hm(6, 0));
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let (start, end) = window.occurrence_on(date, chrono_tz::Europe::London);
        // BST is UTC+1
        assert_eq!(start.hour(), 22);
        assert_eq!(end, utc("2025-06-11T05:00:00Z"));
    }

    #[test]
    fn test_parse_accepts_seconds_and_rejects_garbage() {
        let window = TimeWindow::parse("23:30", "05:30:00").unwrap();
        assert_eq!(window.to_string(), "23:30-05:30");
        assert!(TimeWindow::parse("25:00", "05:00").is_err());
        assert!(parse_time_of_day("noon").is_err());
    }

    #[test]
    fn test_serde_uses_hh_mm_strings() {
        let window: TimeWindow =
            serde_json::from_str(r#"{"start": "22:00", "end": "06:15"}"#).unwrap();
        assert_eq!(window, TimeWindow::new(hm(22, 0), hm(6, 15)));
        let json = serde_json::to_value(window).unwrap();
        assert_eq!(json["end"], "06:15");
    }
}
