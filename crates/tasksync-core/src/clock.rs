//! Time sources and the fixed calendar used for date normalization.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// Source of "now". Injected wherever the data layer needs today's date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-offset calendar shared by the cache, the local store and the
/// remote codecs. Every dateKey in the system is computed through one of
/// these, so all three agree on where a day starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Build a calendar from an offset in minutes east of UTC.
    /// Out-of-range offsets fall back to UTC.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The local calendar date an instant falls on.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// The instant at which a local date begins.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::default());
        // A fixed offset has no gaps, so the naive local time always maps.
        (local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }

    /// Normalize an instant to the start of its local day.
    pub fn normalize(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_day(self.date_of(instant))
    }

    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.date_of(clock.now())
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_of_respects_offset() {
        let instant = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(
            Calendar::utc().date_of(instant),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
        );
        // UTC+2 is already on the next day
        assert_eq!(
            Calendar::from_offset_minutes(120).date_of(instant),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }

    #[test]
    fn test_start_of_day_round_trips() {
        let cal = Calendar::from_offset_minutes(-300);
        let date = NaiveDate::from_ymd_opt(2026, 7, 4).unwrap();
        let start = cal.start_of_day(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 4, 5, 0, 0).unwrap());
        assert_eq!(cal.date_of(start), date);
        assert_eq!(cal.normalize(start + Duration::hours(20)), start);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::days(2));
        assert_eq!(clock.now(), start + Duration::days(2));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_invalid_offset_falls_back_to_utc() {
        assert_eq!(Calendar::from_offset_minutes(100_000), Calendar::utc());
    }
}
