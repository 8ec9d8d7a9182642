//! Canonical day keys and the rolling cache window.
//!
//! A `DateKey` is the `yyyy-MM-dd` form of a local calendar date. It is the
//! join key shared by the in-memory cache, the JSON local store and the
//! remote path scheme.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::Calendar;
use crate::error::SyncError;

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Key for the local day an instant falls on.
    pub fn from_instant(instant: DateTime<Utc>, calendar: &Calendar) -> Self {
        Self(calendar.date_of(instant))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Start of this day as an instant, in the given calendar.
    pub fn to_instant(&self, calendar: &Calendar) -> DateTime<Utc> {
        calendar.start_of_day(self.0)
    }

    pub fn parse(s: &str) -> Result<Self, SyncError> {
        // Strict: exactly yyyy-MM-dd, no trailing time component
        if s.len() != 10 {
            return Err(SyncError::InvalidFormat(format!("date key '{}'", s)));
        }
        NaiveDate::parse_from_str(s, DATE_KEY_FORMAT)
            .map(Self)
            .map_err(|e| SyncError::InvalidFormat(format!("date key '{}': {}", s, e)))
    }

    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    /// Every key from `start` through `end`, inclusive.
    pub fn range_inclusive(start: DateKey, end: DateKey) -> impl Iterator<Item = DateKey> {
        start
            .0
            .iter_days()
            .take_while(move |d| *d <= end.0)
            .map(DateKey)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_KEY_FORMAT))
    }
}

impl FromStr for DateKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The rolling `[today - past, today + future]` range of cacheable days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheWindow {
    pub past_months: u32,
    pub future_months: u32,
}

impl CacheWindow {
    pub fn new(past_months: u32, future_months: u32) -> Self {
        Self {
            past_months,
            future_months,
        }
    }

    /// Inclusive bounds of the window relative to `today`.
    pub fn bounds(&self, today: NaiveDate) -> (DateKey, DateKey) {
        let start = today
            .checked_sub_months(Months::new(self.past_months))
            .unwrap_or(NaiveDate::MIN);
        let end = today
            .checked_add_months(Months::new(self.future_months))
            .unwrap_or(NaiveDate::MAX);
        (DateKey(start), DateKey(end))
    }

    pub fn contains(&self, key: DateKey, today: NaiveDate) -> bool {
        let (start, end) = self.bounds(today);
        key >= start && key <= end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_format_and_parse() {
        let key = DateKey::from_date(date(2026, 2, 7));
        assert_eq!(key.to_string(), "2026-02-07");
        assert_eq!(DateKey::parse("2026-02-07").unwrap(), key);
        assert!(DateKey::parse("2026-2-7").is_err());
        assert!(DateKey::parse("2026-02-07T00:00:00").is_err());
        assert!(DateKey::parse("not a date").is_err());
    }

    #[test]
    fn test_date_key_is_idempotent() {
        let calendars = [
            Calendar::utc(),
            Calendar::from_offset_minutes(330),
            Calendar::from_offset_minutes(-480),
        ];
        let instants = [
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 6, 30, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap(),
        ];
        for cal in &calendars {
            for instant in instants {
                let once = DateKey::from_instant(instant, cal);
                let twice = DateKey::from_instant(once.to_instant(cal), cal);
                assert_eq!(once, twice);
                assert_eq!(
                    once.to_instant(cal),
                    DateKey::from_instant(twice.to_instant(cal), cal).to_instant(cal)
                );
            }
        }
    }

    #[test]
    fn test_serde_uses_string_form() {
        let key = DateKey::from_date(date(2026, 10, 19));
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"2026-10-19\"");
        let back: DateKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_range_inclusive() {
        let start = DateKey::from_date(date(2026, 2, 27));
        let end = DateKey::from_date(date(2026, 3, 2));
        let keys: Vec<String> = DateKey::range_inclusive(start, end)
            .map(|k| k.to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["2026-02-27", "2026-02-28", "2026-03-01", "2026-03-02"]
        );
    }

    #[test]
    fn test_cache_window_bounds() {
        let window = CacheWindow::new(12, 3);
        let today = date(2026, 10, 19);
        let (start, end) = window.bounds(today);
        assert_eq!(start.to_string(), "2025-10-19");
        assert_eq!(end.to_string(), "2027-01-19");

        assert!(window.contains(start, today));
        assert!(window.contains(end, today));
        assert!(!window.contains(start.add_days(-1), today));
        assert!(!window.contains(end.add_days(1), today));
        assert!(!window.contains(DateKey::from_date(date(2025, 9, 19)), today));
    }
}
