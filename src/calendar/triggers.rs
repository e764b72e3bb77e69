//! Reminder triggers derived from calendar events

use std::collections::BTreeSet;

use chrono::{NaiveDate, TimeDelta};

use crate::schedule::{CalendarEvent, CalendarTrigger};

/// Offsets closer than this are treated as the same trigger
pub const DEDUPE_TOLERANCE_SECS: i64 = 30;

/// Longest out-of-office stretch honored from a single event
const MAX_AWAY_DAYS: usize = 366;

/// How triggers are derived from a feed's events
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    /// Offsets (seconds relative to start) used when an event has no alarm
    pub default_offsets: Vec<i64>,
    /// Drop declined events from the cache instead of just muting them
    pub hide_declined: bool,
}

impl TriggerPolicy {
    /// Build from "minutes before start" values
    #[must_use]
    pub fn from_minutes_before(minutes: &[i64], hide_declined: bool) -> Self {
        Self {
            default_offsets: minutes.iter().map(|m| m.saturating_mul(-60)).collect(),
            hide_declined,
        }
    }
}

/// Events that should appear in the cache
#[must_use]
pub fn visible_events(events: Vec<CalendarEvent>, policy: &TriggerPolicy) -> Vec<CalendarEvent> {
    if policy.hide_declined {
        events.into_iter().filter(|e| !e.declined).collect()
    } else {
        events
    }
}

/// Reminder triggers for every eligible event
///
/// Declined events never fire. Explicit alarm offsets win; otherwise the
/// default offsets apply to timed events. Offsets within
/// [`DEDUPE_TOLERANCE_SECS`] of each other collapse into one trigger.
#[must_use]
pub fn derive_triggers(events: &[CalendarEvent], policy: &TriggerPolicy) -> Vec<CalendarTrigger> {
    let mut triggers = Vec::new();

    for event in events.iter().filter(|e| !e.declined) {
        let offsets: &[i64] = if !event.trigger_offsets.is_empty() {
            &event.trigger_offsets
        } else if event.all_day {
            continue;
        } else {
            &policy.default_offsets
        };

        for offset in dedupe_offsets(offsets) {
            let fire_at = TimeDelta::try_seconds(offset).and_then(|d| event.start.checked_add_signed(d));
            match fire_at {
                Some(fire_at) => triggers.push(CalendarTrigger::new(event, fire_at)),
                None => tracing::warn!(event = %event.summary, offset, "trigger outside the calendar range"),
            }
        }
    }

    triggers.sort_by(|a, b| (a.fire_at, &a.key).cmp(&(b.fire_at, &b.key)));
    triggers
}

/// Dates covered by all-day out-of-office events
#[must_use]
pub fn out_of_office_dates(events: &[CalendarEvent]) -> BTreeSet<NaiveDate> {
    let mut dates = BTreeSet::new();
    for event in events.iter().filter(|e| e.all_day && e.out_of_office && !e.declined) {
        let last = event.end.date();
        for (n, day) in event.start.date().iter_days().enumerate() {
            if n >= MAX_AWAY_DAYS || (n > 0 && day >= last) {
                break;
            }
            dates.insert(day);
        }
    }
    dates
}

fn dedupe_offsets(offsets: &[i64]) -> Vec<i64> {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();

    let mut kept: Vec<i64> = Vec::with_capacity(sorted.len());
    for offset in sorted {
        if kept
            .last()
            .is_none_or(|last| offset - last > DEDUPE_TOLERANCE_SECS)
        {
            kept.push(offset);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn event(id: &str, offsets: Vec<i64>) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            feed: "work".to_string(),
            summary: id.to_string(),
            start: at(2, 9, 0),
            end: at(2, 10, 0),
            all_day: false,
            trigger_offsets: offsets,
            is_owner: true,
            declined: false,
            out_of_office: false,
        }
    }

    #[test]
    fn test_defaults_apply_without_alarms() {
        let policy = TriggerPolicy::from_minutes_before(&[10, 0], false);
        let triggers = derive_triggers(&[event("a", Vec::new())], &policy);
        let times: Vec<_> = triggers.iter().map(|t| t.fire_at).collect();
        assert_eq!(times, vec![at(2, 8, 50), at(2, 9, 0)]);
    }

    #[test]
    fn test_close_offsets_dedupe() {
        let policy = TriggerPolicy::from_minutes_before(&[], false);
        let triggers = derive_triggers(&[event("a", vec![-600, -590, -300])], &policy);
        assert_eq!(triggers.len(), 2);
    }

    #[test]
    fn test_declined_never_fires_but_stays_visible() {
        let policy = TriggerPolicy::from_minutes_before(&[10], false);
        let mut declined = event("a", Vec::new());
        declined.declined = true;

        assert!(derive_triggers(&[declined.clone()], &policy).is_empty());
        assert_eq!(visible_events(vec![declined.clone()], &policy).len(), 1);

        let hiding = TriggerPolicy::from_minutes_before(&[10], true);
        assert!(visible_events(vec![declined], &hiding).is_empty());
    }

    #[test]
    fn test_out_of_office_span() {
        let mut ooo = event("ooo", Vec::new());
        ooo.all_day = true;
        ooo.out_of_office = true;
        ooo.start = at(4, 0, 0);
        ooo.end = at(6, 0, 0);

        let dates = out_of_office_dates(&[ooo]);
        let expected: BTreeSet<NaiveDate> = [at(4, 0, 0).date(), at(5, 0, 0).date()].into();
        assert_eq!(dates, expected);
    }
}
