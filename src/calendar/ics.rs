//! Minimal ICS (RFC 5545) decoder
//!
//! Reads `VEVENT` blocks with their `VALARM` triggers. `RRULE` is not
//! expanded; only the concrete instance in the feed is used. `TZID`
//! parameters are treated as device-local time.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::schedule::CalendarEvent;
use crate::{Error, Result};

/// Decoding options that depend on who owns the device
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Lowercase addresses identifying the owner
    pub owner_emails: Vec<String>,
    /// Lowercase summary marker for out-of-office events
    pub out_of_office_marker: String,
}

/// One content line: `NAME;PARAM=V:VALUE`
#[derive(Debug, PartialEq, Eq)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct EventDraft {
    uid: Option<String>,
    summary: Option<String>,
    start: Option<(NaiveDateTime, bool)>,
    end: Option<NaiveDateTime>,
    duration: Option<TimeDelta>,
    cancelled: bool,
    busy_oof: bool,
    organizer_is_owner: bool,
    owner_attending: bool,
    owner_declined: bool,
    has_attendees: bool,
    triggers: Vec<TriggerDraft>,
}

#[derive(Debug)]
enum TriggerDraft {
    FromStart(TimeDelta),
    FromEnd(TimeDelta),
    Absolute(NaiveDateTime),
}

/// Decode every usable event in an ICS document
///
/// Events without `DTSTART` or marked `STATUS:CANCELLED` are skipped.
///
/// # Errors
///
/// Returns a feed sync error if the document is not a `VCALENDAR`
pub fn decode(feed: &str, body: &str, options: &DecodeOptions) -> Result<Vec<CalendarEvent>> {
    let lines = unfold(body);
    if !lines
        .iter()
        .any(|l| l.trim().eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(Error::FeedSync {
            feed: feed.to_string(),
            message: "not an ICS calendar".to_string(),
        });
    }

    let mut events = Vec::new();
    let mut draft: Option<EventDraft> = None;
    let mut in_alarm = false;

    for line in &lines {
        let Some(prop) = parse_line(line) else {
            continue;
        };

        match (prop.name.as_str(), prop.value.to_uppercase().as_str()) {
            ("BEGIN", "VEVENT") => {
                draft = Some(EventDraft::default());
                continue;
            }
            ("END", "VEVENT") => {
                if let Some(done) = draft.take() {
                    if let Some(event) = finish(feed, done, options) {
                        events.push(event);
                    }
                }
                continue;
            }
            ("BEGIN", "VALARM") => {
                in_alarm = true;
                continue;
            }
            ("END", "VALARM") => {
                in_alarm = false;
                continue;
            }
            _ => {}
        }

        let Some(event) = draft.as_mut() else {
            continue;
        };

        if in_alarm {
            if prop.name == "TRIGGER" {
                if let Some(trigger) = parse_trigger(&prop) {
                    event.triggers.push(trigger);
                }
            }
            continue;
        }

        match prop.name.as_str() {
            "UID" => event.uid = Some(prop.value.clone()),
            "SUMMARY" => event.summary = Some(unescape(&prop.value)),
            "DTSTART" => event.start = parse_datetime(&prop),
            "DTEND" => event.end = parse_datetime(&prop).map(|(dt, _)| dt),
            "DURATION" => event.duration = parse_duration(&prop.value),
            "STATUS" => event.cancelled = prop.value.eq_ignore_ascii_case("CANCELLED"),
            "X-MICROSOFT-CDO-BUSYSTATUS" => event.busy_oof = prop.value.eq_ignore_ascii_case("OOF"),
            "ORGANIZER" => event.organizer_is_owner = is_owner(&prop.value, options),
            "ATTENDEE" => {
                event.has_attendees = true;
                if is_owner(&prop.value, options) {
                    event.owner_attending = true;
                    event.owner_declined = prop
                        .param("PARTSTAT")
                        .is_some_and(|s| s.eq_ignore_ascii_case("DECLINED"));
                }
            }
            _ => {}
        }
    }

    tracing::debug!(feed, events = events.len(), "calendar decoded");
    Ok(events)
}

fn finish(feed: &str, draft: EventDraft, options: &DecodeOptions) -> Option<CalendarEvent> {
    if draft.cancelled {
        return None;
    }
    let (start, all_day) = draft.start?;
    let summary = draft.summary.unwrap_or_else(|| "Untitled event".to_string());
    let end = match (draft.end, draft.duration) {
        (Some(end), _) => Some(end),
        (None, Some(length)) => start.checked_add_signed(length),
        (None, None) if all_day => start.checked_add_signed(TimeDelta::days(1)),
        (None, None) => Some(start),
    };
    let Some(end) = end else {
        tracing::warn!(feed, %summary, "event ends outside the calendar range, skipping");
        return None;
    };

    let marker = &options.out_of_office_marker;
    let out_of_office =
        draft.busy_oof || (!marker.is_empty() && summary.to_lowercase().contains(marker.as_str()));

    let trigger_offsets = draft
        .triggers
        .iter()
        .filter_map(|t| match t {
            TriggerDraft::FromStart(offset) => Some(offset.num_seconds()),
            TriggerDraft::FromEnd(offset) => (end - start).checked_add(offset).map(|d| d.num_seconds()),
            TriggerDraft::Absolute(at) => Some((*at - start).num_seconds()),
        })
        .collect();

    Some(CalendarEvent {
        id: draft
            .uid
            .unwrap_or_else(|| format!("{}-{}", start.format("%Y%m%dT%H%M%S"), summary)),
        feed: feed.to_string(),
        summary,
        start,
        end,
        all_day,
        trigger_offsets,
        is_owner: draft.organizer_is_owner || draft.owner_attending || !draft.has_attendees,
        declined: draft.owner_declined,
        out_of_office,
    })
}

fn is_owner(value: &str, options: &DecodeOptions) -> bool {
    let address = value
        .trim()
        .trim_start_matches("mailto:")
        .trim_start_matches("MAILTO:")
        .to_lowercase();
    options.owner_emails.iter().any(|e| *e == address)
}

/// Join folded lines (CRLF followed by a space or tab)
fn unfold(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

fn parse_line(line: &str) -> Option<Property> {
    // The value starts at the first colon outside a quoted parameter
    let mut in_quotes = false;
    let mut split_at = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split_at = Some(i);
                break;
            }
            _ => {}
        }
    }
    let split_at = split_at?;
    let (head, value) = (&line[..split_at], &line[split_at + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_uppercase();
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_uppercase(), v.trim().trim_matches('"').to_string()))
        .collect();

    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// Returns the instant and whether it is a whole-day date
fn parse_datetime(prop: &Property) -> Option<(NaiveDateTime, bool)> {
    let value = prop.value.trim();
    let is_date = prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE")) || value.len() == 8;

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some((date.and_hms_opt(0, 0, 0)?, true));
    }
    parse_timestamp(value).map(|dt| (dt, false))
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
        return Some(utc.with_timezone(&Local).naive_local());
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()
}

fn parse_trigger(prop: &Property) -> Option<TriggerDraft> {
    if prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME")) {
        return parse_timestamp(prop.value.trim()).map(TriggerDraft::Absolute);
    }
    let offset = parse_duration(&prop.value)?;
    if prop.param("RELATED").is_some_and(|v| v.eq_ignore_ascii_case("END")) {
        Some(TriggerDraft::FromEnd(offset))
    } else {
        Some(TriggerDraft::FromStart(offset))
    }
}

/// Parse an RFC 5545 duration such as `-PT15M`, `P1D`, `-P1DT2H30M`, `P2W`
fn parse_duration(value: &str) -> Option<TimeDelta> {
    let value = value.trim();
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total = TimeDelta::zero();
    let mut number = String::new();
    let mut in_time = false;
    for c in rest.chars() {
        match c {
            'T' => in_time = true,
            '0'..='9' => number.push(c),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                let part = match (unit, in_time) {
                    ('W', false) => TimeDelta::try_weeks(n),
                    ('D', false) => TimeDelta::try_days(n),
                    ('H', true) => TimeDelta::try_hours(n),
                    ('M', true) => TimeDelta::try_minutes(n),
                    ('S', true) => TimeDelta::try_seconds(n),
                    _ => None,
                }?;
                total = total.checked_add(&part)?;
            }
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

fn unescape(value: &str) -> String {
    value
        .replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
BEGIN:VEVENT\r
UID:standup-1\r
SUMMARY:Team standup\\, daily\r
DTSTART:20260302T090000\r
DTEND:20260302T091500\r
ORGANIZER:mailto:boss@example.com\r
ATTENDEE;PARTSTAT=ACCEPTED;CN=\"Me: Myself\":mailto:me@example.com\r
BEGIN:VALARM\r
TRIGGER:-PT15M\r
ACTION:DISPLAY\r
END:VALARM\r
BEGIN:VALARM\r
TRIGGER;RELATED=END:PT0S\r
END:VALARM\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:offsite\r
SUMMARY:Planning offsite\r
DTSTART:20260303T100000\r
DTEND:20260303T110000\r
ATTENDEE;PARTSTAT=DECLINED:mailto:ME@example.com\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:vacation\r
SUMMARY:Out of Office - ski trip\r
DTSTART;VALUE=DATE:20260304\r
DTEND;VALUE=DATE:20260306\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:gone\r
SUMMARY:Cancelled thing\r
STATUS:CANCELLED\r
DTSTART:20260305T100000\r
END:VEVENT\r
END:VCALENDAR\r
";

    fn options() -> DecodeOptions {
        DecodeOptions {
            owner_emails: vec!["me@example.com".to_string()],
            out_of_office_marker: "out of office".to_string(),
        }
    }

    #[test]
    fn test_decodes_events_and_alarms() {
        let events = decode("work", FEED, &options()).unwrap();
        assert_eq!(events.len(), 3);

        let standup = &events[0];
        assert_eq!(standup.summary, "Team standup, daily");
        assert_eq!(standup.trigger_offsets, vec![-900, 900]);
        assert!(standup.is_owner);
        assert!(!standup.declined);
        assert!(!standup.all_day);
    }

    #[test]
    fn test_declined_and_out_of_office() {
        let events = decode("work", FEED, &options()).unwrap();
        assert!(events[1].declined);

        let vacation = &events[2];
        assert!(vacation.all_day);
        assert!(vacation.out_of_office);
        assert_eq!(vacation.end - vacation.start, TimeDelta::days(2));
    }

    #[test]
    fn test_unfolds_continuation_lines() {
        let lines = unfold("SUMMARY:Long\r\n  title\r\nUID:x\r\n");
        assert_eq!(lines, vec!["SUMMARY:Long title".to_string(), "UID:x".to_string()]);
    }

    #[test]
    fn test_rejects_non_calendar() {
        let err = decode("work", "<html></html>", &options()).unwrap_err();
        assert!(matches!(err, Error::FeedSync { .. }));
    }

    #[test]
    fn test_duration_forms() {
        assert_eq!(parse_duration("-PT15M"), Some(TimeDelta::minutes(-15)));
        assert_eq!(parse_duration("P1DT2H"), Some(TimeDelta::hours(26)));
        assert_eq!(parse_duration("P1W"), Some(TimeDelta::weeks(1)));
        assert_eq!(parse_duration("PT"), Some(TimeDelta::zero()));
        assert_eq!(parse_duration("15M"), None);
        assert_eq!(parse_duration("-P9999999999999W"), None);
        assert_eq!(parse_duration("P99999999999999999999D"), None);
    }

    #[test]
    fn test_skips_event_ending_past_calendar_range() {
        let body = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:forever\r\nSUMMARY:Forever\r\n\
                    DTSTART:20260303T100000\r\nDURATION:P99999999D\r\nEND:VEVENT\r\n\
                    BEGIN:VEVENT\r\nUID:lunch\r\nSUMMARY:Lunch\r\nDTSTART:20260303T120000\r\n\
                    DURATION:PT1H\r\nBEGIN:VALARM\r\nTRIGGER:-P9999999999999W\r\nEND:VALARM\r\n\
                    END:VEVENT\r\nEND:VCALENDAR\r\n";
        let events = decode("work", body, &options()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary, "Lunch");
        assert!(events[0].trigger_offsets.is_empty());
    }
}
