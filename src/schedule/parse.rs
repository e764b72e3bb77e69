//! Time vocabulary shared by inbound commands and voice shortcuts
//!
//! Turns phrases like "7:30pm", "tomorrow morning", "an hour and a half" or
//! "mon, wed" into typed values. Anything that cannot be read is a
//! [`Error::Validation`].

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use regex::Regex;

use super::rules::{RecurrenceRule, default_time, next_time_of_day, word_of_day};
use crate::{Error, Result};

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:[:. ](\d{2}))?(?::(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)?$")
    .expect("valid regex")
});

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b(\s+and\s+a\s+half)?",
    )
    .expect("valid regex")
});

static ARTICLE_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:an?|one)\s+(hour|minute|second)\b(\s+and\s+a\s+half)?")
    .expect("valid regex")
});

static COMPACT_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])(\d)").expect("valid regex"));

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?p(?:(\d+)d)?(?:t(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?)?$")
    .expect("valid regex")
});

const UNITS: &[(&str, u32)] = &[
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
];

const TENS: &[(&str, u32)] = &[
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
];

/// Replace spelled-out numbers with digits ("twenty five minutes" -> "25 minutes")
#[must_use]
pub fn normalize_numbers(text: &str) -> String {
    let lowered = text.to_lowercase().replace('-', " ");
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        if let Some(tens) = lookup(TENS, token) {
            let unit = tokens
                .get(i + 1)
                .and_then(|next| lookup(UNITS, next))
                .filter(|u| (1..=9).contains(u));
            if let Some(unit) = unit {
                out.push((tens + unit).to_string());
                i += 2;
                continue;
            }
            out.push(tens.to_string());
        } else if let Some(unit) = lookup(UNITS, token) {
            out.push(unit.to_string());
        } else {
            out.push(token.to_string());
        }
        i += 1;
    }

    out.join(" ")
}

fn lookup(table: &[(&str, u32)], word: &str) -> Option<u32> {
    table.iter().find(|(w, _)| *w == word).map(|(_, n)| *n)
}

/// Parse a time of day: `7`, `7:30`, `7.30pm`, `19:00`, `noon`, `morning`
///
/// # Errors
///
/// Returns a validation error if the phrase is not a time of day
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    let text = normalize_numbers(input);
    let text = text
        .trim()
        .trim_start_matches("at ")
        .replace("o'clock", "")
        .replace("oclock", "");
    let text = text.trim();

    if let Some(time) = word_of_day(text) {
        return Ok(time);
    }

    let caps = CLOCK_TIME
        .captures(text)
        .ok_or_else(|| Error::Validation(format!("unrecognized time: {input}")))?;

    let mut hour: u32 = caps[1]
        .parse()
        .map_err(|_| Error::Validation(format!("bad hour in {input}")))?;
    let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| {
        Error::Validation(format!("bad minute in {input}"))
    })?;
    let second: u32 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse()).map_err(|_| {
        Error::Validation(format!("bad second in {input}"))
    })?;

    if let Some(meridiem) = caps.get(4) {
        if hour == 0 || hour > 12 {
            return Err(Error::Validation(format!("hour out of range: {input}")));
        }
        let pm = meridiem.as_str().starts_with('p');
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    }

    NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| Error::Validation(format!("time out of range: {input}")))
}

/// Parse a duration: `300`, `90s`, `5m`, `1h30m`, `PT5M`, `5 minutes`, `half an hour`
///
/// # Errors
///
/// Returns a validation error if nothing parses or the total is not positive
pub fn parse_duration(input: &str) -> Result<TimeDelta> {
    if let Ok(secs) = input.trim().parse::<i64>() {
        return positive(seconds_span(secs)?, input);
    }

    let text = normalize_numbers(input);
    let text = text.trim();

    if let Some(caps) = ISO_DURATION.captures(text) {
        if caps.iter().skip(1).any(|c| c.is_some()) {
            let field = |i: usize| -> i64 {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0)
            };
            let total = [
                TimeDelta::try_days(field(1)),
                TimeDelta::try_hours(field(2)),
                TimeDelta::try_minutes(field(3)),
                TimeDelta::try_seconds(field(4)),
            ]
            .into_iter()
            .try_fold(TimeDelta::zero(), |acc, part| acc.checked_add(&part?))
            .ok_or_else(|| Error::Validation(format!("duration out of range: {input}")))?;
            return positive(total, input);
        }
    }

    let text = text
        .replace("half an hour", "30 minutes")
        .replace("half hour", "30 minutes");
    let split = COMPACT_SPLIT.replace_all(&text, "$1 $2");
    let text: &str = &split;

    let mut total_secs = 0.0_f64;
    let mut matched = false;

    for caps in ARTICLE_UNIT.captures_iter(text) {
        let unit = unit_seconds(&caps[1]);
        let half = caps.get(2).map_or(0.0, |_| unit / 2.0);
        total_secs += unit + half;
        matched = true;
    }

    for caps in DURATION_PART.captures_iter(text) {
        let amount: f64 = caps[1].parse().unwrap_or(0.0);
        let unit = unit_seconds(&caps[2]);
        let half = caps.get(3).map_or(0.0, |_| unit / 2.0);
        total_secs += amount.mul_add(unit, half);
        matched = true;
    }

    if !matched {
        return Err(Error::Validation(format!("unrecognized duration: {input}")));
    }

    // Float casts saturate, so an absurd total lands on i64::MAX and is rejected below
    #[allow(clippy::cast_possible_truncation)]
    positive(seconds_span(total_secs.round() as i64)?, input)
}

/// `seconds` as a span
///
/// # Errors
///
/// Returns a validation error when the amount is too large to represent
pub fn seconds_span(seconds: i64) -> Result<TimeDelta> {
    TimeDelta::try_seconds(seconds)
        .ok_or_else(|| Error::Validation(format!("{seconds} seconds is out of range")))
}

/// `at` moved by `span`
///
/// # Errors
///
/// Returns a validation error when the result falls outside the calendar
pub fn shift(at: NaiveDateTime, span: TimeDelta) -> Result<NaiveDateTime> {
    at.checked_add_signed(span)
        .ok_or_else(|| Error::Validation(format!("{at} moved by {span} is out of range")))
}

/// `minutes` as a span
///
/// # Errors
///
/// Returns a validation error when the amount is too large to represent
pub fn minutes_span(minutes: i64) -> Result<TimeDelta> {
    TimeDelta::try_minutes(minutes)
        .ok_or_else(|| Error::Validation(format!("{minutes} minutes is out of range")))
}

fn unit_seconds(unit: &str) -> f64 {
    match unit.chars().next() {
        Some('h') => 3600.0,
        Some('m') => 60.0,
        _ => 1.0,
    }
}

fn positive(duration: TimeDelta, input: &str) -> Result<TimeDelta> {
    if duration <= TimeDelta::zero() {
        return Err(Error::Validation(format!("duration must be positive: {input}")));
    }
    Ok(duration)
}

/// Parse a weekday name, abbreviation or plural ("mon", "tues", "fridays")
#[must_use]
pub fn parse_weekday(input: &str) -> Option<Weekday> {
    let word = input.trim().trim_end_matches(',').to_lowercase();
    let word = word.trim_end_matches('s');
    match word {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tu" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "weds" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse an alarm recurrence: `once`, `daily`, `weekdays`, `weekends`, `mon,wed,fri`
///
/// # Errors
///
/// Returns a validation error for unknown words
pub fn parse_recurrence(input: &str) -> Result<RecurrenceRule> {
    let text = input.trim().to_lowercase();
    match text.as_str() {
        "" | "none" | "once" | "never" => return Ok(RecurrenceRule::None),
        "daily" | "every day" | "everyday" => return Ok(RecurrenceRule::Daily),
        "weekdays" | "every weekday" | "workdays" => return Ok(RecurrenceRule::Weekdays),
        "weekends" | "every weekend" => return Ok(RecurrenceRule::Weekends),
        _ => {}
    }

    let mut days = Vec::new();
    for word in text
        .trim_start_matches("every ")
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty() && *w != "and")
    {
        let day = parse_weekday(word)
            .ok_or_else(|| Error::Validation(format!("unrecognized recurrence: {input}")))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }

    if days.is_empty() {
        return Err(Error::Validation(format!("unrecognized recurrence: {input}")));
    }
    days.sort_by_key(Weekday::num_days_from_monday);
    Ok(RecurrenceRule::Weekly { days })
}

/// Parse an absolute instant relative to `now`
///
/// Accepts ISO-8601/RFC-3339 timestamps, `YYYY-MM-DD HH:MM`, a bare date,
/// `today`/`tomorrow` with an optional time, `in <duration>`, and a bare
/// time of day (next occurrence).
///
/// # Errors
///
/// Returns a validation error if the phrase is not a point in time
pub fn parse_when(input: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let text = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(default_time()));
    }

    let lowered = text.to_lowercase();
    if let Some(rest) = lowered.strip_prefix("in ") {
        return shift(now, parse_duration(rest)?);
    }

    for (prefix, offset) in [("tomorrow", 1), ("today", 0), ("tonight", 0)] {
        if let Some(rest) = lowered.strip_prefix(prefix) {
            let rest = rest.trim().trim_start_matches("at ").trim();
            let date = now.date() + TimeDelta::days(offset);
            let time = if rest.is_empty() {
                if prefix == "tonight" {
                    word_of_day("night").unwrap_or_else(default_time)
                } else {
                    default_time()
                }
            } else {
                parse_time_of_day(rest)?
            };
            return Ok(date.and_time(time));
        }
    }

    let time = parse_time_of_day(&lowered)?;
    Ok(next_time_of_day(time, now))
}

/// Parse a calendar date (`2026-03-14`)
///
/// # Errors
///
/// Returns a validation error if the text is not an ISO date
pub fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("unrecognized date: {input}")))
}

/// Speakable rendering of a duration ("1 hour and 5 minutes")
#[must_use]
pub fn describe_duration(duration: TimeDelta) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(plural(seconds, "second"));
    }
    parts.join(" and ")
}

/// Speakable rendering of a time of day ("7:30 AM")
#[must_use]
pub fn describe_time(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_clock_times() {
        assert_eq!(parse_time_of_day("7").unwrap(), t(7, 0));
        assert_eq!(parse_time_of_day("7:30").unwrap(), t(7, 30));
        assert_eq!(parse_time_of_day("7.30pm").unwrap(), t(19, 30));
        assert_eq!(parse_time_of_day("12 am").unwrap(), t(0, 0));
        assert_eq!(parse_time_of_day("12 p.m.").unwrap(), t(12, 0));
        assert_eq!(parse_time_of_day("19:05").unwrap(), t(19, 5));
        assert_eq!(parse_time_of_day("07:30:00").unwrap(), t(7, 30));
        assert_eq!(parse_time_of_day("at six thirty am").unwrap(), t(6, 30));
        assert_eq!(parse_time_of_day("7 o'clock").unwrap(), t(7, 0));
    }

    #[test]
    fn test_parse_word_times() {
        assert_eq!(parse_time_of_day("noon").unwrap(), t(12, 0));
        assert_eq!(parse_time_of_day("morning").unwrap(), t(8, 0));
        assert_eq!(parse_time_of_day("midnight").unwrap(), t(0, 0));
    }

    #[test]
    fn test_reject_bad_times() {
        assert!(matches!(parse_time_of_day("25:00"), Err(Error::Validation(_))));
        assert!(matches!(parse_time_of_day("13pm"), Err(Error::Validation(_))));
        assert!(matches!(parse_time_of_day("soon"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(parse_duration("300").unwrap(), TimeDelta::seconds(300));
        assert_eq!(parse_duration("90s").unwrap(), TimeDelta::seconds(90));
        assert_eq!(parse_duration("1h30m").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("PT5M").unwrap(), TimeDelta::minutes(5));
        assert_eq!(parse_duration("5 minutes").unwrap(), TimeDelta::minutes(5));
        assert_eq!(parse_duration("twenty five minutes").unwrap(), TimeDelta::minutes(25));
        assert_eq!(parse_duration("half an hour").unwrap(), TimeDelta::minutes(30));
        assert_eq!(parse_duration("an hour and a half").unwrap(), TimeDelta::minutes(90));
        assert_eq!(
            parse_duration("1 hour and 15 minutes").unwrap(),
            TimeDelta::minutes(75)
        );
    }

    #[test]
    fn test_reject_non_positive_durations() {
        assert!(matches!(parse_duration("0"), Err(Error::Validation(_))));
        assert!(matches!(parse_duration("-5"), Err(Error::Validation(_))));
        assert!(matches!(parse_duration("a while"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_reject_oversized_durations() {
        assert!(matches!(parse_duration("9223372036854775807"), Err(Error::Validation(_))));
        assert!(matches!(parse_duration("P99999999999999D"), Err(Error::Validation(_))));
        assert!(matches!(parse_duration("999999999999999 hours"), Err(Error::Validation(_))));
        assert!(matches!(
            parse_when("in 9000000000000 minutes", now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_recurrence() {
        assert_eq!(parse_recurrence("daily").unwrap(), RecurrenceRule::Daily);
        assert_eq!(parse_recurrence("").unwrap(), RecurrenceRule::None);
        assert_eq!(
            parse_recurrence("fri, mon and wednesday").unwrap(),
            RecurrenceRule::Weekly {
                days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]
            }
        );
        assert!(parse_recurrence("fortnightly").is_err());
    }

    #[test]
    fn test_parse_when_forms() {
        assert_eq!(
            parse_when("2026-03-05T09:15", now()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 5).unwrap().and_time(t(9, 15))
        );
        assert_eq!(
            parse_when("tomorrow at 9am", now()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 3).unwrap().and_time(t(9, 0))
        );
        assert_eq!(
            parse_when("tomorrow", now()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 3).unwrap().and_time(t(8, 0))
        );
        assert_eq!(parse_when("in 20 minutes", now()).unwrap(), now() + TimeDelta::minutes(20));
        // Earlier than now rolls to tomorrow
        assert_eq!(
            parse_when("9:00", now()).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 3).unwrap().and_time(t(9, 0))
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe_duration(TimeDelta::seconds(3900)), "1 hour and 5 minutes");
        assert_eq!(describe_duration(TimeDelta::seconds(45)), "45 seconds");
        assert_eq!(describe_time(t(19, 30)), "7:30 PM");
    }

    #[test]
    fn test_normalize_numbers() {
        assert_eq!(normalize_numbers("Set a Twenty-Five minute timer"), "set a 25 minute timer");
        assert_eq!(normalize_numbers("forty minutes"), "40 minutes");
    }
}
