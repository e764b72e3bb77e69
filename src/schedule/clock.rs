//! Wall-clock source for the scheduler
//!
//! Every schedule computation runs on local wall-clock time. The clock is
//! injected so the ticker and tests share one notion of "now".

use std::sync::Mutex;

use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};

/// Source of the current local wall-clock time
pub trait Clock: Send + Sync {
    /// Current local time, truncated to whole seconds
    fn now(&self) -> NaiveDateTime;
}

/// Clock backed by the system's local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    #[must_use]
    pub const fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    /// Jump the clock to an absolute instant
    pub fn set(&self, to: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_manual_clock_advances() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let clock = ManualClock::new(start);

        clock.advance(TimeDelta::minutes(5));
        assert_eq!(clock.now(), start + TimeDelta::minutes(5));
    }

    #[test]
    fn test_system_clock_has_no_subseconds() {
        assert_eq!(SystemClock.now().nanosecond(), 0);
    }
}
