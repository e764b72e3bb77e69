//! Recurrence arithmetic
//!
//! Pure functions that compute the next fire instant of a recurrence rule.
//! Nothing here touches a clock or performs I/O: every function is
//! deterministic given `(rule, base, now)`.
//!
//! The `base` instant carries the rule's time of day and, for month-based
//! rules, the anchor date.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};

/// How far ahead a skip-aware search looks before giving up
const SKIP_HORIZON_DAYS: i64 = 731;

/// Recurrence specification for alarms and reminders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Single shot: fires at `base`, or at its time of day if `base` has passed
    #[default]
    None,
    /// Every day
    Daily,
    /// Monday through Friday
    Weekdays,
    /// Saturday and Sunday
    Weekends,
    /// Explicit set of weekdays
    Weekly { days: Vec<Weekday> },
    /// Same day of month, clamped to the last day of short months
    Monthly { day: u32 },
    /// Every `months` months counted from the base date
    IntervalMonths { months: u32 },
}

impl RecurrenceRule {
    /// Whether the rule produces more than one occurrence
    #[must_use]
    pub const fn is_recurring(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Short human description, used in spoken replies
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::None => "once".to_string(),
            Self::Daily => "every day".to_string(),
            Self::Weekdays => "on weekdays".to_string(),
            Self::Weekends => "on weekends".to_string(),
            Self::Weekly { days } => {
                let names: Vec<String> = days.iter().map(|d| weekday_name(*d).to_string()).collect();
                format!("every {}", names.join(" and "))
            }
            Self::Monthly { day } => format!("monthly on day {day}"),
            Self::IntervalMonths { months: 1 } => "every month".to_string(),
            Self::IntervalMonths { months } => format!("every {months} months"),
        }
    }
}

/// Dates and weekdays on which alarms must not ring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipPolicy {
    /// Specific calendar dates
    pub dates: BTreeSet<NaiveDate>,
    /// Every occurrence of these weekdays
    pub weekdays: Vec<Weekday>,
}

impl SkipPolicy {
    /// Whether `date` is suppressed
    #[must_use]
    pub fn skips(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date) || self.weekdays.contains(&date.weekday())
    }

    /// Union of this policy with additional dates
    #[must_use]
    pub fn with_dates<'a>(&self, extra: impl IntoIterator<Item = &'a NaiveDate>) -> Self {
        let mut merged = self.clone();
        merged.dates.extend(extra);
        merged
    }
}

/// Time used when a phrase names no time at all
#[must_use]
pub fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Resolve a word-of-day to its default time
#[must_use]
pub fn word_of_day(word: &str) -> Option<NaiveTime> {
    let hour = match word.trim().to_lowercase().as_str() {
        "morning" => 8,
        "afternoon" => 13,
        "evening" => 17,
        "night" | "tonight" => 20,
        "noon" | "midday" => 12,
        "midnight" => 0,
        _ => return None,
    };
    NaiveTime::from_hms_opt(hour, 0, 0)
}

/// Compute the earliest occurrence of `rule` that is at or after `now`
#[must_use]
pub fn next_fire(rule: &RecurrenceRule, base: NaiveDateTime, now: NaiveDateTime) -> NaiveDateTime {
    let time = base.time();
    match rule {
        RecurrenceRule::None => {
            if base >= now {
                base
            } else {
                next_matching_day(now, time, |_| true)
            }
        }
        RecurrenceRule::Daily => next_matching_day(now, time, |_| true),
        RecurrenceRule::Weekdays => next_matching_day(now, time, is_weekday),
        RecurrenceRule::Weekends => next_matching_day(now, time, |d| !is_weekday(d)),
        RecurrenceRule::Weekly { days } => {
            if days.is_empty() {
                let anchor = base.weekday();
                next_matching_day(now, time, |d| d == anchor)
            } else {
                next_matching_day(now, time, |d| days.contains(&d))
            }
        }
        RecurrenceRule::Monthly { day } => next_monthly(now, (*day).clamp(1, 31), time),
        RecurrenceRule::IntervalMonths { months } => next_interval(base, (*months).max(1), now),
    }
}

/// Like [`next_fire`], but advances past skipped dates to the rule's next occurrence
///
/// Returns `None` when every occurrence within the search horizon is skipped,
/// or when a single-shot absolute instant lands on a skipped date.
#[must_use]
pub fn next_fire_skipping(
    rule: &RecurrenceRule,
    base: NaiveDateTime,
    now: NaiveDateTime,
    skip: &SkipPolicy,
) -> Option<NaiveDateTime> {
    let horizon = now.date() + TimeDelta::days(SKIP_HORIZON_DAYS);
    let mut cursor = now;

    loop {
        let candidate = next_fire(rule, base, cursor);
        if candidate.date() > horizon {
            return None;
        }
        if !skip.skips(candidate.date()) {
            return Some(candidate);
        }
        tracing::trace!(date = %candidate.date(), "occurrence skipped");
        cursor = candidate.date().succ_opt()?.and_time(NaiveTime::MIN);
    }
}

/// Next occurrence of a bare time of day at or after `now`
#[must_use]
pub fn next_time_of_day(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    next_matching_day(now, time, |_| true)
}

/// Add whole months to `date`, pinning to `day` and clamping to the month's last day
#[must_use]
pub fn add_months_clamped(date: NaiveDate, months: u32, day: u32) -> NaiveDate {
    let total = date.year() * 12 + i32::try_from(date.month0()).unwrap_or(0) + i32::try_from(months).unwrap_or(0);
    let year = total.div_euclid(12);
    let month0 = u32::try_from(total.rem_euclid(12)).unwrap_or(0);
    let last = days_in_month(year, month0 + 1);
    NaiveDate::from_ymd_opt(year, month0 + 1, day.clamp(1, last)).unwrap_or(date)
}

/// Number of days in `month` (1-based) of `year`
#[must_use]
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

/// English weekday name
#[must_use]
pub const fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

const fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

fn next_matching_day(
    now: NaiveDateTime,
    time: NaiveTime,
    matches: impl Fn(Weekday) -> bool,
) -> NaiveDateTime {
    // Eight days covers "later today" plus a full week
    for offset in 0..=7 {
        let date = now.date() + TimeDelta::days(offset);
        if !matches(date.weekday()) {
            continue;
        }
        let candidate = date.and_time(time);
        if candidate >= now {
            return candidate;
        }
    }
    now.date().and_time(time) + TimeDelta::weeks(1)
}

fn next_monthly(now: NaiveDateTime, day: u32, time: NaiveTime) -> NaiveDateTime {
    let month_start = now.date().with_day(1).unwrap_or(now.date());
    for k in 0..=12 {
        let candidate = add_months_clamped(month_start, k, day).and_time(time);
        if candidate >= now {
            return candidate;
        }
    }
    add_months_clamped(month_start, 13, day).and_time(time)
}

fn next_interval(base: NaiveDateTime, every: u32, now: NaiveDateTime) -> NaiveDateTime {
    if base >= now {
        return base;
    }

    let elapsed = (now.year() - base.year()) * 12
        + i32::try_from(now.month0()).unwrap_or(0)
        - i32::try_from(base.month0()).unwrap_or(0);
    let first_k = u32::try_from(elapsed.max(0)).unwrap_or(0) / every;

    let mut k = first_k;
    loop {
        let candidate = add_months_clamped(base.date(), k * every, base.day()).and_time(base.time());
        if candidate >= now {
            return candidate;
        }
        k += 1;
    }
}
