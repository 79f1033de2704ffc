use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Source of the current time. Quota days and reservation age are both
/// derived from it, so tests can move across midnight without sleeping.
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

/// Manually driven clock for tests and benchmarks.
#[derive(Debug, Clone)]
pub struct FixedClock {
    state: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(at)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Calendar-day partition key (`YYYY-MM-DD`, UTC).
pub fn date_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Fixed-width RFC 3339 rendering. Stored timestamps compare correctly as
/// plain strings only because every writer goes through this function.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_key_uses_utc_calendar_day() {
        let late = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(date_key(late), "2024-03-09");
        assert_eq!(date_key(late + Duration::seconds(1)), "2024-03-10");
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::hours(12));
        assert_eq!(date_key(clock.now()), "2024-02-01");
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let fractional = whole + Duration::microseconds(1500);
        assert_eq!(format_timestamp(whole).len(), format_timestamp(fractional).len());
        assert!(format_timestamp(whole) < format_timestamp(fractional));
    }
}
