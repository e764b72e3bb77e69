//! Schedule entities: alarms, timers, reminders and the calendar cache

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use super::parse::{describe_duration, describe_time};
use super::rules::RecurrenceRule;
use crate::Error;

/// Kind of schedule entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Alarm,
    Timer,
    Reminder,
}

impl EventKind {
    /// All kinds, in snapshot order
    pub const ALL: [Self; 3] = [Self::Alarm, Self::Timer, Self::Reminder];

    /// Plural form used in topic names and snapshot keys
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Alarm => "alarms",
            Self::Timer => "timers",
            Self::Reminder => "reminders",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Alarm => "alarm",
            Self::Timer => "timer",
            Self::Reminder => "reminder",
        })
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alarm" | "alarms" => Ok(Self::Alarm),
            "timer" | "timers" => Ok(Self::Timer),
            "reminder" | "reminders" => Ok(Self::Reminder),
            other => Err(Error::Validation(format!("unknown event type: {other}"))),
        }
    }
}

/// What plays when an entity rings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Playback {
    #[default]
    Beep,
    Music { source: String },
}

/// A schedule entity: the shared envelope plus kind-specific detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: NaiveDateTime,
    pub enabled: bool,
    #[serde(default)]
    pub playback: Playback,
    #[serde(default)]
    pub paused: bool,
    /// Instant the ticker will ring this entity next, including snooze/delay overrides
    pub next_fire: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ringing_since: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<NaiveDateTime>,
    #[serde(flatten)]
    pub detail: EventDetail,
}

/// Kind-specific fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventDetail {
    Alarm(AlarmDetail),
    Timer(TimerDetail),
    Reminder(ReminderDetail),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmDetail {
    pub time: NaiveTime,
    #[serde(default)]
    pub recurrence: RecurrenceRule,
    /// Per-alarm dates on which this alarm stays silent
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skip_dates: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerDetail {
    pub duration_secs: i64,
    pub started_at: NaiveDateTime,
    pub target: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDetail {
    pub message: String,
    pub schedule: ReminderSchedule,
    #[serde(default)]
    pub completed: bool,
    /// Ephemeral override set by `delay_reminder`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delayed_until: Option<NaiveDateTime>,
    /// Occurrence that rang and has not been acknowledged yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<NaiveDateTime>,
    /// Origin of derived reminders (`calendar:<feed>:<event>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// When a reminder fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReminderSchedule {
    Once { when: NaiveDateTime },
    Recurring { rule: RecurrenceRule, base: NaiveDateTime },
}

impl ScheduleEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self.detail {
            EventDetail::Alarm(_) => EventKind::Alarm,
            EventDetail::Timer(_) => EventKind::Timer,
            EventDetail::Reminder(_) => EventKind::Reminder,
        }
    }

    #[must_use]
    pub const fn is_ringing(&self) -> bool {
        self.ringing_since.is_some()
    }

    /// Whether the entity survives its own firing
    #[must_use]
    pub const fn is_recurring(&self) -> bool {
        match &self.detail {
            EventDetail::Alarm(alarm) => alarm.recurrence.is_recurring(),
            EventDetail::Timer(_) => false,
            EventDetail::Reminder(reminder) => {
                matches!(reminder.schedule, ReminderSchedule::Recurring { .. })
            }
        }
    }

    #[must_use]
    pub const fn as_alarm(&self) -> Option<&AlarmDetail> {
        match &self.detail {
            EventDetail::Alarm(alarm) => Some(alarm),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_timer(&self) -> Option<&TimerDetail> {
        match &self.detail {
            EventDetail::Timer(timer) => Some(timer),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_reminder(&self) -> Option<&ReminderDetail> {
        match &self.detail {
            EventDetail::Reminder(reminder) => Some(reminder),
            _ => None,
        }
    }

    /// Name to use when speaking about this entity
    #[must_use]
    pub fn spoken_name(&self) -> String {
        if let Some(reminder) = self.as_reminder() {
            return reminder.message.clone();
        }
        match &self.label {
            Some(label) if !label.is_empty() => format!("{label} {}", self.kind()),
            _ => self.kind().to_string(),
        }
    }

    /// One-sentence spoken summary
    #[must_use]
    pub fn describe(&self, now: NaiveDateTime) -> String {
        match &self.detail {
            EventDetail::Alarm(alarm) => {
                let state = if !self.enabled {
                    " (off)"
                } else if self.paused {
                    " (paused)"
                } else {
                    ""
                };
                format!(
                    "{} at {} {}{state}",
                    self.spoken_name(),
                    describe_time(alarm.time),
                    alarm.recurrence.describe()
                )
            }
            EventDetail::Timer(timer) => {
                if self.is_ringing() {
                    format!("{} is done", self.spoken_name())
                } else {
                    let left = (timer.target - now).max(TimeDelta::zero());
                    format!("{} with {} left", self.spoken_name(), describe_duration(left))
                }
            }
            EventDetail::Reminder(reminder) => match self.next_fire {
                Some(at) => format!(
                    "{} on {} at {}",
                    reminder.message,
                    at.format("%A"),
                    describe_time(at.time())
                ),
                None => reminder.message.clone(),
            },
        }
    }
}

/// Input for `ScheduleStore::create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewEvent {
    Alarm {
        time: NaiveTime,
        recurrence: RecurrenceRule,
        label: Option<String>,
        playback: Playback,
    },
    Timer {
        duration: TimeDelta,
        label: Option<String>,
        playback: Playback,
    },
    Reminder {
        schedule: ReminderSchedule,
        message: String,
        label: Option<String>,
    },
}

/// Partial update for `ScheduleStore::update`; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub label: Option<String>,
    pub enabled: Option<bool>,
    pub playback: Option<Playback>,
    pub time: Option<NaiveTime>,
    pub recurrence: Option<RecurrenceRule>,
    pub skip_dates: Option<BTreeSet<NaiveDate>>,
    pub message: Option<String>,
    pub when: Option<NaiveDateTime>,
}

impl EventPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Full retained serialization of the store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub alarms: Vec<ScheduleEvent>,
    pub timers: Vec<ScheduleEvent>,
    pub reminders: Vec<ScheduleEvent>,
    #[serde(default)]
    pub paused_days: Vec<NaiveDate>,
}

impl Snapshot {
    /// Every entity across all kinds
    pub fn entities(&self) -> impl Iterator<Item = &ScheduleEvent> {
        self.alarms
            .iter()
            .chain(self.timers.iter())
            .chain(self.reminders.iter())
    }
}

/// Read-only event mirrored from an external calendar feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub feed: String,
    pub summary: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub all_day: bool,
    /// Trigger offsets relative to `start`, in seconds (negative = before)
    #[serde(default)]
    pub trigger_offsets: Vec<i64>,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default)]
    pub declined: bool,
    #[serde(default)]
    pub out_of_office: bool,
}

/// A reminder instant derived from a calendar event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarTrigger {
    /// Stable identity across polls: feed, event and instant
    pub key: String,
    pub feed: String,
    pub event_id: String,
    pub summary: String,
    pub event_start: NaiveDateTime,
    pub fire_at: NaiveDateTime,
}

impl CalendarTrigger {
    #[must_use]
    pub fn new(event: &CalendarEvent, fire_at: NaiveDateTime) -> Self {
        Self {
            key: format!("{}:{}:{}", event.feed, event.id, fire_at.format("%Y%m%dT%H%M%S")),
            feed: event.feed.clone(),
            event_id: event.id.clone(),
            summary: event.summary.clone(),
            event_start: event.start,
            fire_at,
        }
    }
}
