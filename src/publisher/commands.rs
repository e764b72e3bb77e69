//! Inbound schedule commands
//!
//! Commands arrive as JSON objects `{"action": <name>, ...}` from the sync
//! contract, the HTTP API, and LLM replies. Each action has a fixed set of
//! required fields; anything missing or unreadable is rejected before the
//! store is touched.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::{Map, Value};

use crate::schedule::parse::{
    parse_date, parse_duration, parse_recurrence, parse_time_of_day, parse_when, seconds_span,
};
use crate::schedule::{
    EventKind, EventPatch, NewEvent, Playback, RecurrenceRule, ReminderSchedule, ScheduleEvent,
    ScheduleStore,
};
use crate::{Error, Result};

/// Longest accepted month interval for repeating reminders
const MAX_INTERVAL_MONTHS: u32 = 1200;

/// A validated inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateAlarm(NewEvent),
    UpdateAlarm { id: String, patch: EventPatch },
    DeleteAlarm { id: String },
    PauseAlarm { id: String },
    ResumeAlarm { id: String },
    StartTimer(NewEvent),
    AddTime { id: String, seconds: i64 },
    Stop { id: String },
    Snooze { id: String, minutes: Option<i64> },
    CancelAll { kind: EventKind },
    CreateReminder(NewEvent),
    UpdateReminder { id: String, patch: EventPatch },
    CompleteReminder { id: String },
    DelayReminder { id: String, seconds: i64 },
    DeleteReminder { id: String },
    PauseDay { date: NaiveDate },
    ResumeDay { date: NaiveDate },
    /// Republish the snapshot without changing anything
    List,
}

/// What a command did, for logs and spoken confirmations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Event(ScheduleEvent),
    Events(Vec<ScheduleEvent>),
    Count(usize),
    Day(NaiveDate),
}

impl Command {
    /// Validate a raw payload
    ///
    /// # Errors
    ///
    /// Returns a malformed-command error for invalid JSON, unknown actions, or
    /// missing required fields, and a validation error for unreadable values
    pub fn parse(raw: &str, now: NaiveDateTime) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::MalformedCommand(format!("invalid JSON: {e}")))?;
        Self::from_value(&value, now)
    }

    /// Validate an already-decoded payload
    ///
    /// # Errors
    ///
    /// Same as [`Command::parse`]
    pub fn from_value(value: &Value, now: NaiveDateTime) -> Result<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| Error::MalformedCommand("command must be a JSON object".to_string()))?;
        let action = text(fields, "action")?;
        let f = Fields { action, map: fields };

        let command = match action {
            "create_alarm" => Self::CreateAlarm(NewEvent::Alarm {
                time: parse_time_of_day(f.required("time")?)?,
                recurrence: f.recurrence()?.unwrap_or_default(),
                label: f.optional("label"),
                playback: f.playback()?.unwrap_or_default(),
            }),
            "update_alarm" => Self::UpdateAlarm {
                id: f.event_id()?,
                patch: f.alarm_patch()?,
            },
            "delete_alarm" => Self::DeleteAlarm { id: f.event_id()? },
            "pause_alarm" => Self::PauseAlarm { id: f.event_id()? },
            "resume_alarm" => Self::ResumeAlarm { id: f.event_id()? },
            "start_timer" => Self::StartTimer(NewEvent::Timer {
                duration: f.duration("duration")?,
                label: f.optional("label"),
                playback: f.playback()?.unwrap_or_default(),
            }),
            "add_time" => Self::AddTime {
                id: f.event_id()?,
                seconds: f.seconds()?.ok_or_else(|| f.missing("seconds"))?,
            },
            "stop" => Self::Stop { id: f.event_id()? },
            "snooze" => Self::Snooze {
                id: f.event_id()?,
                minutes: f.integer("minutes")?,
            },
            "cancel_all" => Self::CancelAll {
                kind: f.required("event_type")?.parse()?,
            },
            "create_reminder" => {
                let when = parse_when(f.required("when")?, now)?;
                let message = f.required("message")?.trim().to_string();
                Self::CreateReminder(NewEvent::Reminder {
                    schedule: f.reminder_schedule(when)?,
                    message,
                    label: f.optional("label"),
                })
            }
            "update_reminder" => Self::UpdateReminder {
                id: f.event_id()?,
                patch: f.reminder_patch(now)?,
            },
            "complete_reminder" => Self::CompleteReminder { id: f.event_id()? },
            "delay_reminder" => Self::DelayReminder {
                id: f.event_id()?,
                seconds: f.seconds()?.ok_or_else(|| f.missing("seconds"))?,
            },
            "delete_reminder" => Self::DeleteReminder { id: f.event_id()? },
            "pause_day" => Self::PauseDay {
                date: parse_date(f.required("date")?)?,
            },
            "resume_day" => Self::ResumeDay {
                date: parse_date(f.required("date")?)?,
            },
            "list" => Self::List,
            other => return Err(Error::MalformedCommand(format!("unknown action: {other}"))),
        };
        Ok(command)
    }

    /// Action name, for logging
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::CreateAlarm(_) => "create_alarm",
            Self::UpdateAlarm { .. } => "update_alarm",
            Self::DeleteAlarm { .. } => "delete_alarm",
            Self::PauseAlarm { .. } => "pause_alarm",
            Self::ResumeAlarm { .. } => "resume_alarm",
            Self::StartTimer(_) => "start_timer",
            Self::AddTime { .. } => "add_time",
            Self::Stop { .. } => "stop",
            Self::Snooze { .. } => "snooze",
            Self::CancelAll { .. } => "cancel_all",
            Self::CreateReminder(_) => "create_reminder",
            Self::UpdateReminder { .. } => "update_reminder",
            Self::CompleteReminder { .. } => "complete_reminder",
            Self::DelayReminder { .. } => "delay_reminder",
            Self::DeleteReminder { .. } => "delete_reminder",
            Self::PauseDay { .. } => "pause_day",
            Self::ResumeDay { .. } => "resume_day",
            Self::List => "list",
        }
    }

    /// Apply to the store
    ///
    /// # Errors
    ///
    /// Propagates store errors (unknown id, invalid input, wrong kind)
    pub fn apply(self, store: &ScheduleStore) -> Result<Applied> {
        let applied = match self {
            Self::CreateAlarm(new) | Self::StartTimer(new) | Self::CreateReminder(new) => {
                Applied::Event(store.create(new)?)
            }
            Self::UpdateAlarm { id, patch } => {
                expect_kind(store, &id, EventKind::Alarm)?;
                Applied::Event(store.update(&id, patch)?)
            }
            Self::UpdateReminder { id, patch } => {
                expect_kind(store, &id, EventKind::Reminder)?;
                Applied::Event(store.update(&id, patch)?)
            }
            Self::DeleteAlarm { id } => {
                expect_kind(store, &id, EventKind::Alarm)?;
                Applied::Event(store.delete(&id)?)
            }
            Self::DeleteReminder { id } => {
                expect_kind(store, &id, EventKind::Reminder)?;
                Applied::Event(store.delete(&id)?)
            }
            Self::PauseAlarm { id } => Applied::Event(store.pause(&id)?),
            Self::ResumeAlarm { id } => Applied::Event(store.resume(&id)?),
            Self::AddTime { id, seconds } => Applied::Event(store.add_time(&id, seconds)?),
            Self::Stop { id } => Applied::Event(store.stop(&id)?),
            Self::Snooze { id, minutes } => Applied::Event(store.snooze(&id, minutes)?),
            Self::CancelAll { kind } => Applied::Count(store.cancel_all(kind)?),
            Self::CompleteReminder { id } => Applied::Event(store.complete_reminder(&id)?),
            Self::DelayReminder { id, seconds } => {
                Applied::Event(store.delay_reminder(&id, seconds)?)
            }
            Self::PauseDay { date } => {
                store.pause_day(date)?;
                Applied::Day(date)
            }
            Self::ResumeDay { date } => {
                store.resume_day(date)?;
                Applied::Day(date)
            }
            Self::List => Applied::Events(store.snapshot().entities().cloned().collect()),
        };
        Ok(applied)
    }
}

/// Parse and apply a raw payload
///
/// # Errors
///
/// Returns the parse or store error; the store is unchanged on error
pub fn execute(store: &ScheduleStore, raw: &str) -> Result<(Command, Applied)> {
    let command = Command::parse(raw, store.now())?;
    let applied = command.clone().apply(store)?;
    Ok((command, applied))
}

fn expect_kind(store: &ScheduleStore, id: &str, kind: EventKind) -> Result<()> {
    let event = store.get(id)?;
    if event.kind() == kind {
        Ok(())
    } else {
        Err(Error::Validation(format!("{id} is a {}, not a {kind}", event.kind())))
    }
}

fn text<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::MalformedCommand(format!("missing required field: {key}")))
}

/// Field accessors bound to one payload
struct Fields<'a> {
    action: &'a str,
    map: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn missing(&self, key: &str) -> Error {
        Error::MalformedCommand(format!("{} requires {key}", self.action))
    }

    fn required(&self, key: &str) -> Result<&str> {
        match self.map.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(Value::Null) | None => Err(self.missing(key)),
            Some(Value::String(_)) => Err(self.missing(key)),
            Some(other) => Err(Error::MalformedCommand(format!("{key} must be a string, got {other}"))),
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.map
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn event_id(&self) -> Result<String> {
        self.required("event_id").map(|s| s.trim().to_string())
    }

    fn integer(&self, key: &str) -> Result<Option<i64>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::Validation(format!("{key} must be a whole number"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::Validation(format!("{key} must be a number: {s}"))),
            Some(other) => Err(Error::MalformedCommand(format!("{key} must be a number, got {other}"))),
        }
    }

    /// `seconds`, or `minutes` converted to seconds
    fn seconds(&self) -> Result<Option<i64>> {
        if let Some(seconds) = self.integer("seconds")? {
            return Ok(Some(seconds));
        }
        self.integer("minutes")?
            .map(|m| {
                m.checked_mul(60)
                    .ok_or_else(|| Error::Validation(format!("{m} minutes is out of range")))
            })
            .transpose()
    }

    /// Duration given as seconds or as a phrase ("5m", "five minutes")
    fn duration(&self, key: &str) -> Result<TimeDelta> {
        match self.map.get(key) {
            Some(Value::Number(_)) => {
                let secs = self.integer(key)?.unwrap_or(0);
                if secs <= 0 {
                    return Err(Error::Validation(format!("{key} must be positive")));
                }
                seconds_span(secs)
            }
            _ => parse_duration(self.required(key)?),
        }
    }

    /// `recurrence` as a phrase ("weekdays") or a list of day names
    fn recurrence(&self) -> Result<Option<RecurrenceRule>> {
        match self.map.get("recurrence") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => parse_recurrence(s).map(Some),
            Some(Value::Array(days)) => {
                let joined: Vec<&str> = days.iter().filter_map(Value::as_str).collect();
                if joined.len() != days.len() {
                    return Err(Error::MalformedCommand("recurrence days must be strings".to_string()));
                }
                parse_recurrence(&joined.join(",")).map(Some)
            }
            Some(other) => Err(Error::MalformedCommand(format!("recurrence must be a string or list, got {other}"))),
        }
    }

    /// `playback` as `"beep"`, a music source string, or `{"kind": ...}`
    fn playback(&self) -> Result<Option<Playback>> {
        match self.map.get("playback") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("beep") => Ok(Some(Playback::Beep)),
            Some(Value::String(s)) => Ok(Some(Playback::Music { source: s.clone() })),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::MalformedCommand(format!("invalid playback: {e}"))),
        }
    }

    fn skip_dates(&self) -> Result<Option<BTreeSet<NaiveDate>>> {
        match self.map.get("skip_dates") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| Error::MalformedCommand("skip_dates must be date strings".to_string()))
                        .and_then(parse_date)
                })
                .collect::<Result<BTreeSet<_>>>()
                .map(Some),
            Some(other) => Err(Error::MalformedCommand(format!("skip_dates must be a list, got {other}"))),
        }
    }

    fn enabled(&self) -> Result<Option<bool>> {
        match self.map.get("enabled") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(Error::MalformedCommand(format!("enabled must be a boolean, got {other}"))),
        }
    }

    fn alarm_patch(&self) -> Result<EventPatch> {
        Ok(EventPatch {
            label: self.optional("label"),
            enabled: self.enabled()?,
            playback: self.playback()?,
            time: self
                .optional("time")
                .map(|t| parse_time_of_day(&t))
                .transpose()?,
            recurrence: self.recurrence()?,
            skip_dates: self.skip_dates()?,
            ..EventPatch::default()
        })
    }

    fn reminder_patch(&self, now: NaiveDateTime) -> Result<EventPatch> {
        Ok(EventPatch {
            label: self.optional("label"),
            enabled: self.enabled()?,
            message: self.optional("message"),
            when: self
                .optional("when")
                .map(|w| parse_when(&w, now))
                .transpose()?,
            ..EventPatch::default()
        })
    }

    /// One-shot unless `repeat` asks for weekly, monthly, or every N months
    fn reminder_schedule(&self, when: NaiveDateTime) -> Result<ReminderSchedule> {
        let Some(repeat) = self.optional("repeat") else {
            return Ok(ReminderSchedule::Once { when });
        };

        let rule = match repeat.to_lowercase().as_str() {
            "once" | "none" => return Ok(ReminderSchedule::Once { when }),
            "daily" => RecurrenceRule::Daily,
            "weekly" => RecurrenceRule::Weekly {
                days: vec![when.weekday()],
            },
            "monthly" => RecurrenceRule::Monthly { day: when.day() },
            "interval_months" | "every_n_months" => {
                let months = self
                    .integer("months")?
                    .ok_or_else(|| self.missing("months"))?;
                let months = u32::try_from(months)
                    .ok()
                    .filter(|m| (1..=MAX_INTERVAL_MONTHS).contains(m))
                    .ok_or_else(|| {
                        Error::Validation(format!("months must be between 1 and {MAX_INTERVAL_MONTHS}"))
                    })?;
                RecurrenceRule::IntervalMonths { months }
            }
            other => return Err(Error::Validation(format!("unknown repeat: {other}"))),
        };
        Ok(ReminderSchedule::Recurring { rule, base: when })
    }
}
