//! Schedule store
//!
//! Owns every alarm, timer and reminder plus the calendar cache. All
//! mutation goes through one lock; notifications are queued while the lock is
//! held and broadcast after it is released, so subscribers never observe a
//! half-applied change and never run under the store lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tokio::sync::broadcast;

use super::clock::Clock;
use super::model::{
    AlarmDetail, CalendarEvent, CalendarTrigger, EventDetail, EventKind, EventPatch, NewEvent,
    Playback, ReminderDetail, ReminderSchedule, ScheduleEvent, Snapshot, TimerDetail,
};
use super::parse::{describe_time, minutes_span, seconds_span, shift};
use super::rules::{RecurrenceRule, SkipPolicy, next_fire, next_fire_skipping};
use crate::{Error, Result};

/// Tolerance for reminders requested a moment in the past
const PAST_TOLERANCE: TimeDelta = TimeDelta::seconds(60);

const EVENT_CAPACITY: usize = 256;

/// Tunables for the store
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// How long an entity may ring before it is stopped automatically
    pub ring_timeout: TimeDelta,
    /// Snooze length when none is given
    pub default_snooze: TimeDelta,
    /// Globally configured skip dates and weekdays for alarms
    pub skip: SkipPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            ring_timeout: TimeDelta::minutes(10),
            default_snooze: TimeDelta::minutes(9),
            skip: SkipPolicy::default(),
        }
    }
}

/// Notification raised by the store
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Something changed; the snapshot should be republished
    Changed,
    /// An entity started ringing
    Ringing(Box<ScheduleEvent>),
    /// No entity of this kind is ringing any more
    Cleared(EventKind),
    /// The calendar cache was replaced for a feed
    CalendarChanged,
}

/// Result of merging one calendar poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarMerge {
    /// Triggers seen for the first time and armed
    pub newly_armed: Vec<CalendarTrigger>,
    /// Triggers that were already armed and still exist
    pub retained: usize,
    /// New triggers already in the past at first sight, never armed
    pub missed: usize,
    /// Armed triggers that disappeared from the feed
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct FeedState {
    events: Vec<CalendarEvent>,
    armed: BTreeMap<String, CalendarTrigger>,
    fired: BTreeSet<String>,
    out_of_office: BTreeSet<NaiveDate>,
}

#[derive(Debug, Default)]
struct StoreInner {
    entities: BTreeMap<String, ScheduleEvent>,
    paused_days: BTreeSet<NaiveDate>,
    feeds: BTreeMap<String, FeedState>,
    pending: Vec<StoreEvent>,
    touched: bool,
}

/// Owner of all schedule entities
pub struct ScheduleStore {
    inner: Mutex<StoreInner>,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
    events: broadcast::Sender<StoreEvent>,
}

impl ScheduleStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, settings: StoreSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(StoreInner::default()),
            clock,
            settings,
            events,
        }
    }

    /// Subscribe to store notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Current time according to the store's clock
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    #[must_use]
    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Create a new entity
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-positive durations, empty reminder
    /// messages, past reminder instants, or rules that do not fit the kind
    pub fn create(&self, new: NewEvent) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, settings, now| {
            let mut event = build_event(new, now)?;
            let skip = inner.skip_for(&event, settings);
            refresh_next_fire(&mut event, &skip, now);

            tracing::info!(
                event_id = %event.id,
                kind = %event.kind(),
                next_fire = ?event.next_fire,
                "schedule entity created"
            );
            inner.entities.insert(event.id.clone(), event.clone());
            inner.touched = true;
            Ok(event)
        })
    }

    /// Partially update an entity and recompute its next fire
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or a validation error when the
    /// patch carries fields that do not apply to the entity's kind
    pub fn update(&self, id: &str, patch: EventPatch) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, settings, now| {
            let mut event = inner.get(id)?.clone();
            apply_patch(&mut event, patch, now)?;
            let skip = inner.skip_for(&event, settings);
            refresh_next_fire(&mut event, &skip, now);

            tracing::info!(event_id = %id, next_fire = ?event.next_fire, "schedule entity updated");
            inner.entities.insert(id.to_string(), event.clone());
            inner.touched = true;
            Ok(event)
        })
    }

    /// Remove an entity
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn delete(&self, id: &str) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, _, _| {
            let event = inner
                .entities
                .remove(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            tracing::info!(event_id = %id, kind = %event.kind(), "schedule entity deleted");
            inner.touched = true;
            Ok(event)
        })
    }

    /// Pause an alarm; pausing a paused alarm is a no-op
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or a validation error for non-alarms
    pub fn pause(&self, id: &str) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, _, _| {
            let event = inner.get_mut(id)?;
            require_kind(event, EventKind::Alarm, "pause")?;
            if event.paused {
                tracing::debug!(event_id = %id, "alarm already paused");
                return Ok(event.clone());
            }
            event.paused = true;
            event.snoozed_until = None;
            event.next_fire = None;
            tracing::info!(event_id = %id, "alarm paused");
            let paused = event.clone();
            inner.touched = true;
            Ok(paused)
        })
    }

    /// Resume a paused alarm, recomputing its next fire from now
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or a validation error for non-alarms
    pub fn resume(&self, id: &str) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, settings, now| {
            require_kind(inner.get(id)?, EventKind::Alarm, "resume")?;
            let event = inner.refresh_one(id, settings, now)?;
            tracing::info!(event_id = %id, next_fire = ?event.next_fire, "alarm resumed");
            Ok(event)
        })
    }

    /// Suppress every alarm on `date` without touching `enabled`
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the other mutations
    pub fn pause_day(&self, date: NaiveDate) -> Result<()> {
        self.mutate(true, |inner, settings, now| {
            if inner.paused_days.insert(date) {
                tracing::info!(%date, "alarms paused for day");
                inner.refresh_alarms(settings, now);
            }
            Ok(())
        })
    }

    /// Reverse [`Self::pause_day`]
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the other mutations
    pub fn resume_day(&self, date: NaiveDate) -> Result<()> {
        self.mutate(true, |inner, settings, now| {
            if inner.paused_days.remove(&date) {
                tracing::info!(%date, "alarms resumed for day");
                inner.refresh_alarms(settings, now);
            }
            Ok(())
        })
    }

    /// Extend a timer; a ringing timer restarts with the added time
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a validation error for non-timers and
    /// non-positive amounts
    pub fn add_time(&self, id: &str, seconds: i64) -> Result<ScheduleEvent> {
        if seconds <= 0 {
            return Err(Error::Validation("added time must be positive".to_string()));
        }
        let extra = seconds_span(seconds)?;

        self.mutate(true, |inner, _, now| {
            let event = inner.get_mut(id)?;
            require_kind(event, EventKind::Timer, "add time to")?;
            let ringing = event.is_ringing();
            if let EventDetail::Timer(timer) = &mut event.detail {
                // Compute both fields before writing so a rejected amount leaves the timer as it was
                let (started_at, duration_secs, target) = if ringing {
                    (now, seconds, shift(now, extra)?)
                } else {
                    let total = timer
                        .duration_secs
                        .checked_add(seconds)
                        .ok_or_else(|| Error::Validation("timer length is out of range".to_string()))?;
                    (timer.started_at, total, shift(timer.target, extra)?)
                };
                timer.started_at = started_at;
                timer.duration_secs = duration_secs;
                timer.target = target;
                event.next_fire = Some(target);
            }
            event.ringing_since = None;
            event.snoozed_until = None;

            tracing::info!(event_id = %id, seconds, next_fire = ?event.next_fire, "time added to timer");
            let extended = event.clone();
            inner.touched = true;
            Ok(extended)
        })
    }

    /// Acknowledge an entity
    ///
    /// Clears ringing. Single-shot entities (timers, one-shot alarms, one-shot
    /// reminders) are deleted; recurring ones stay armed for their next
    /// occurrence. Stopping an idle alarm or reminder is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn stop(&self, id: &str) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, settings, now| inner.stop_entity(id, settings, now))
    }

    /// Stop everything that is ringing
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the other mutations
    pub fn stop_all_ringing(&self) -> Result<Vec<ScheduleEvent>> {
        self.mutate(true, |inner, settings, now| {
            let ids: Vec<String> = inner
                .entities
                .values()
                .filter(|e| e.is_ringing())
                .map(|e| e.id.clone())
                .collect();
            let mut stopped = Vec::with_capacity(ids.len());
            for id in ids {
                stopped.push(inner.stop_entity(&id, settings, now)?);
            }
            Ok(stopped)
        })
    }

    /// Silence a ringing entity and re-arm it once at now + `minutes`
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a validation error when the entity is not
    /// ringing or the snooze length is not positive
    pub fn snooze(&self, id: &str, minutes: Option<i64>) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, settings, now| {
            let event = inner.get_mut(id)?;
            if !event.is_ringing() {
                return Err(Error::Validation(format!("{} is not ringing", event.kind())));
            }
            let length = minutes.map_or(Ok(settings.default_snooze), minutes_span)?;
            if length <= TimeDelta::zero() {
                return Err(Error::Validation("snooze length must be positive".to_string()));
            }
            let until = shift(now, length)?;
            event.ringing_since = None;
            event.snoozed_until = Some(until);
            event.next_fire = Some(until);

            tracing::info!(event_id = %id, until = %until, "snoozed");
            let snoozed = event.clone();
            inner.touched = true;
            Ok(snoozed)
        })
    }

    /// Delete every entity of `kind`, returning how many were removed
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the other mutations
    pub fn cancel_all(&self, kind: EventKind) -> Result<usize> {
        self.mutate(true, |inner, _, _| {
            let before = inner.entities.len();
            inner.entities.retain(|_, e| e.kind() != kind);
            let removed = before - inner.entities.len();
            tracing::info!(%kind, removed, "cancelled all");
            inner.touched |= removed > 0;
            Ok(removed)
        })
    }

    /// Mark a reminder done
    ///
    /// Recurring reminders advance to the occurrence after the one being
    /// acknowledged; one-shot reminders are deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a validation error for non-reminders
    pub fn complete_reminder(&self, id: &str) -> Result<ScheduleEvent> {
        self.mutate(true, |inner, _, now| {
            require_kind(inner.get(id)?, EventKind::Reminder, "complete")?;
            inner.complete_entity(id, now)
        })
    }

    /// Push a reminder's fire time to now + `seconds` without touching its schedule
    ///
    /// Delaying an already-delayed reminder resets the delay from now.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a validation error for non-reminders and
    /// non-positive delays
    pub fn delay_reminder(&self, id: &str, seconds: i64) -> Result<ScheduleEvent> {
        if seconds <= 0 {
            return Err(Error::Validation("delay must be positive".to_string()));
        }

        self.mutate(true, |inner, _, now| {
            let event = inner.get_mut(id)?;
            require_kind(event, EventKind::Reminder, "delay")?;
            let until = shift(now, seconds_span(seconds)?)?;
            let ringing = event.is_ringing();
            let upcoming = event.next_fire;

            if let EventDetail::Reminder(reminder) = &mut event.detail {
                // A delay on an idle recurring reminder stands in for its upcoming occurrence
                if !ringing
                    && reminder.last_fired.is_none()
                    && matches!(reminder.schedule, ReminderSchedule::Recurring { .. })
                {
                    reminder.last_fired = upcoming;
                }
                reminder.delayed_until = Some(until);
            }
            event.ringing_since = None;
            event.snoozed_until = None;
            event.next_fire = Some(until);

            tracing::info!(event_id = %id, until = %until, "reminder delayed");
            let delayed = event.clone();
            inner.touched = true;
            Ok(delayed)
        })
    }

    /// Advance the store to the clock's current time
    ///
    /// Auto-stops entities that rang past the ring timeout, flips due entities
    /// to ringing, and fires armed calendar triggers. Returns the entities
    /// that started ringing.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the other mutations
    pub fn tick(&self) -> Result<Vec<ScheduleEvent>> {
        self.mutate(false, |inner, settings, now| {
            let expired: Vec<String> = inner
                .entities
                .values()
                .filter(|e| e.ringing_since.is_some_and(|since| now - since >= settings.ring_timeout))
                .map(|e| e.id.clone())
                .collect();
            for id in expired {
                tracing::info!(event_id = %id, "ringing timed out");
                inner.stop_entity(&id, settings, now)?;
            }

            let due: Vec<String> = inner
                .entities
                .values()
                .filter(|e| {
                    !e.is_ringing() && e.enabled && !e.paused && e.next_fire.is_some_and(|at| at <= now)
                })
                .map(|e| e.id.clone())
                .collect();

            let mut rang = Vec::new();
            for id in due {
                if let Some(event) = inner.ring(&id, settings, now) {
                    rang.push(event);
                }
            }
            rang.extend(inner.fire_calendar_triggers(now));
            Ok(rang)
        })
    }

    /// Replace one feed's calendar cache and diff its reminder triggers
    ///
    /// Triggers keep their armed/fired status across polls by key. A trigger
    /// that is already in the past the first time it is seen is never armed.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match the other mutations
    pub fn apply_calendar_sync(
        &self,
        feed: &str,
        events: Vec<CalendarEvent>,
        triggers: Vec<CalendarTrigger>,
        out_of_office: BTreeSet<NaiveDate>,
    ) -> Result<CalendarMerge> {
        self.mutate(false, |inner, settings, now| {
            let state = inner.feeds.entry(feed.to_string()).or_default();
            let merge = diff_triggers(state, triggers, now);
            state.events = events;

            let ooo_changed = state.out_of_office != out_of_office;
            state.out_of_office = out_of_office;
            if ooo_changed {
                tracing::info!(feed, "out-of-office dates changed");
                inner.refresh_alarms(settings, now);
            }

            inner.pending.push(StoreEvent::CalendarChanged);
            Ok(merge)
        })
    }

    /// Rebuild the store from persisted entities and paused days
    ///
    /// Ringing is cleared and every next fire is recomputed from now.
    /// Completed entries are dropped.
    pub fn restore(&self, entities: Vec<ScheduleEvent>, paused_days: Vec<NaiveDate>) {
        let result = self.mutate(true, |inner, settings, now| {
            inner.paused_days.extend(paused_days);
            for mut event in entities {
                if event.as_reminder().is_some_and(|r| r.completed) {
                    continue;
                }
                event.ringing_since = None;
                let skip = inner.skip_for(&event, settings);
                refresh_next_fire(&mut event, &skip, now);
                inner.entities.insert(event.id.clone(), event);
            }
            tracing::info!(entities = inner.entities.len(), "schedule restored");
            inner.touched = true;
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "schedule restore failed");
        }
    }

    /// Look up one entity
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn get(&self, id: &str) -> Result<ScheduleEvent> {
        self.lock().get(id).cloned()
    }

    /// Entities of `kind`, soonest first
    #[must_use]
    pub fn list(&self, kind: EventKind) -> Vec<ScheduleEvent> {
        let mut events: Vec<ScheduleEvent> = self
            .lock()
            .entities
            .values()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            (a.next_fire.is_none(), a.next_fire, a.created_at).cmp(&(b.next_fire.is_none(), b.next_fire, b.created_at))
        });
        events
    }

    /// Entities currently ringing, longest-ringing first
    #[must_use]
    pub fn ringing(&self) -> Vec<ScheduleEvent> {
        let mut events: Vec<ScheduleEvent> = self
            .lock()
            .entities
            .values()
            .filter(|e| e.is_ringing())
            .cloned()
            .collect();
        events.sort_by_key(|e| e.ringing_since);
        events
    }

    #[must_use]
    pub fn is_ringing(&self) -> bool {
        self.lock().entities.values().any(ScheduleEvent::is_ringing)
    }

    /// Deterministic serialization of the whole store
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        let mut all: Vec<&ScheduleEvent> = inner.entities.values().collect();
        all.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let mut snapshot = Snapshot {
            paused_days: inner.paused_days.iter().copied().collect(),
            ..Snapshot::default()
        };
        for event in all {
            match event.kind() {
                EventKind::Alarm => snapshot.alarms.push(event.clone()),
                EventKind::Timer => snapshot.timers.push(event.clone()),
                EventKind::Reminder => snapshot.reminders.push(event.clone()),
            }
        }
        snapshot
    }

    /// Cached calendar events across all feeds, by start time
    #[must_use]
    pub fn calendar_events(&self) -> Vec<CalendarEvent> {
        let inner = self.lock();
        let mut events: Vec<CalendarEvent> =
            inner.feeds.values().flat_map(|f| f.events.iter().cloned()).collect();
        events.sort_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));
        events
    }

    /// Calendar triggers still waiting to fire
    #[must_use]
    pub fn armed_triggers(&self) -> Vec<CalendarTrigger> {
        let inner = self.lock();
        let mut triggers: Vec<CalendarTrigger> =
            inner.feeds.values().flat_map(|f| f.armed.values().cloned()).collect();
        triggers.sort_by_key(|t| t.fire_at);
        triggers
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the lock, then broadcast queued notifications
    fn mutate<T>(
        &self,
        always_notify: bool,
        f: impl FnOnce(&mut StoreInner, &StoreSettings, NaiveDateTime) -> Result<T>,
    ) -> Result<T> {
        let now = self.clock.now();
        let (result, pending) = {
            let mut inner = self.lock();
            let before = inner.ringing_kinds();
            let result = f(&mut inner, &self.settings, now);
            let mut pending = std::mem::take(&mut inner.pending);

            if result.is_ok() {
                let after = inner.ringing_kinds();
                pending.extend(before.difference(&after).map(|kind| StoreEvent::Cleared(*kind)));
                if always_notify || inner.touched {
                    pending.push(StoreEvent::Changed);
                }
            }
            inner.touched = false;
            (result, pending)
        };

        for event in pending {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        result
    }
}

impl StoreInner {
    fn get(&self, id: &str) -> Result<&ScheduleEvent> {
        self.entities
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut ScheduleEvent> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn ringing_kinds(&self) -> BTreeSet<EventKind> {
        self.entities
            .values()
            .filter(|e| e.is_ringing())
            .map(ScheduleEvent::kind)
            .collect()
    }

    /// Global skip policy: configured dates, paused days, out-of-office days
    fn global_skip(&self, settings: &StoreSettings) -> SkipPolicy {
        settings
            .skip
            .with_dates(self.paused_days.iter())
            .with_dates(self.feeds.values().flat_map(|f| f.out_of_office.iter()))
    }

    fn skip_for(&self, event: &ScheduleEvent, settings: &StoreSettings) -> SkipPolicy {
        let global = self.global_skip(settings);
        match event.as_alarm() {
            Some(alarm) => global.with_dates(alarm.skip_dates.iter()),
            None => global,
        }
    }

    fn refresh_one(&mut self, id: &str, settings: &StoreSettings, now: NaiveDateTime) -> Result<ScheduleEvent> {
        let skip = self.skip_for(self.get(id)?, settings);
        let event = self.get_mut(id)?;
        event.paused = false;
        refresh_next_fire(event, &skip, now);
        let refreshed = event.clone();
        self.touched = true;
        Ok(refreshed)
    }

    fn refresh_alarms(&mut self, settings: &StoreSettings, now: NaiveDateTime) {
        let global = self.global_skip(settings);
        for event in self.entities.values_mut() {
            if let Some(alarm) = event.as_alarm() {
                let skip = global.with_dates(alarm.skip_dates.iter());
                refresh_next_fire(event, &skip, now);
            }
        }
        self.touched = true;
    }

    /// Flip a due entity to ringing and arm whatever comes after it
    fn ring(&mut self, id: &str, settings: &StoreSettings, now: NaiveDateTime) -> Option<ScheduleEvent> {
        let skip = self.skip_for(self.entities.get(id)?, settings);
        let event = self.entities.get_mut(id)?;
        let fired_at = event.next_fire?;
        let from_schedule = event.snoozed_until.is_none()
            && !event.as_reminder().is_some_and(|r| r.delayed_until.is_some());

        event.ringing_since = Some(now);
        event.snoozed_until = None;
        let after = now + TimeDelta::seconds(1);
        event.next_fire = match &mut event.detail {
            EventDetail::Alarm(alarm) if alarm.recurrence.is_recurring() => {
                next_fire_skipping(&alarm.recurrence, after.date().and_time(alarm.time), after, &skip)
            }
            EventDetail::Alarm(_) | EventDetail::Timer(_) => None,
            EventDetail::Reminder(reminder) => {
                reminder.delayed_until = None;
                if from_schedule {
                    reminder.last_fired = Some(fired_at);
                }
                match &reminder.schedule {
                    ReminderSchedule::Once { .. } => None,
                    ReminderSchedule::Recurring { rule, base } => Some(next_fire(rule, *base, after)),
                }
            }
        };

        tracing::info!(event_id = %id, kind = %event.kind(), fired_at = %fired_at, "ringing");
        let rung = event.clone();
        self.pending.push(StoreEvent::Ringing(Box::new(rung.clone())));
        self.touched = true;
        Some(rung)
    }

    fn stop_entity(&mut self, id: &str, settings: &StoreSettings, now: NaiveDateTime) -> Result<ScheduleEvent> {
        let event = self.get(id)?;
        let ringing = event.is_ringing();
        let snoozed = event.snoozed_until.is_some();

        match event.kind() {
            EventKind::Timer => {
                tracing::info!(event_id = %id, ringing, "timer stopped");
                self.touched = true;
                self.entities
                    .remove(id)
                    .ok_or_else(|| Error::NotFound(id.to_string()))
            }
            EventKind::Alarm if ringing || snoozed => {
                if event.is_recurring() {
                    let skip = self.skip_for(event, settings);
                    let event = self.get_mut(id)?;
                    event.ringing_since = None;
                    if snoozed {
                        event.snoozed_until = None;
                        refresh_next_fire(event, &skip, now);
                    }
                    tracing::info!(event_id = %id, next_fire = ?event.next_fire, "alarm stopped");
                    let stopped = event.clone();
                    self.touched = true;
                    Ok(stopped)
                } else {
                    tracing::info!(event_id = %id, "one-shot alarm stopped");
                    self.touched = true;
                    self.entities
                        .remove(id)
                        .ok_or_else(|| Error::NotFound(id.to_string()))
                }
            }
            EventKind::Reminder
                if ringing
                    || snoozed
                    || event.as_reminder().is_some_and(|r| r.delayed_until.is_some()) =>
            {
                self.complete_entity(id, now)
            }
            EventKind::Alarm | EventKind::Reminder => {
                tracing::debug!(event_id = %id, "stop on idle entity");
                Ok(event.clone())
            }
        }
    }

    fn complete_entity(&mut self, id: &str, now: NaiveDateTime) -> Result<ScheduleEvent> {
        let event = self.get_mut(id)?;
        let EventDetail::Reminder(reminder) = &mut event.detail else {
            return Err(Error::Validation("only reminders can be completed".to_string()));
        };

        let next = match reminder.schedule.clone() {
            ReminderSchedule::Once { .. } => None,
            ReminderSchedule::Recurring { rule, base } => {
                let current = reminder
                    .last_fired
                    .unwrap_or_else(|| next_fire(&rule, base, now));
                Some(next_fire(&rule, base, (current + TimeDelta::seconds(1)).max(now)))
            }
        };
        reminder.last_fired = None;
        reminder.delayed_until = None;
        reminder.completed = next.is_none();
        event.ringing_since = None;
        event.snoozed_until = None;
        event.next_fire = next;
        let done = event.clone();

        if next.is_none() {
            self.entities.remove(id);
            tracing::info!(event_id = %id, "one-shot reminder completed");
        } else {
            tracing::info!(event_id = %id, next_fire = ?next, "recurring reminder completed");
        }
        self.touched = true;
        Ok(done)
    }

    fn fire_calendar_triggers(&mut self, now: NaiveDateTime) -> Vec<ScheduleEvent> {
        let mut due = Vec::new();
        for feed in self.feeds.values_mut() {
            let keys: Vec<String> = feed
                .armed
                .values()
                .filter(|t| t.fire_at <= now)
                .map(|t| t.key.clone())
                .collect();
            for key in keys {
                if let Some(trigger) = feed.armed.remove(&key) {
                    feed.fired.insert(key);
                    due.push(trigger);
                }
            }
        }

        let mut rang = Vec::with_capacity(due.len());
        for trigger in due {
            let event = calendar_reminder(&trigger, now);
            tracing::info!(event_id = %event.id, trigger = %trigger.key, "calendar reminder ringing");
            self.pending.push(StoreEvent::Ringing(Box::new(event.clone())));
            self.entities.insert(event.id.clone(), event.clone());
            self.touched = true;
            rang.push(event);
        }
        rang
    }
}

fn require_kind(event: &ScheduleEvent, kind: EventKind, verb: &str) -> Result<()> {
    if event.kind() == kind {
        Ok(())
    } else {
        Err(Error::Validation(format!("cannot {verb} a {}", event.kind())))
    }
}

fn validate_alarm_rule(rule: &RecurrenceRule) -> Result<()> {
    match rule {
        RecurrenceRule::Monthly { .. } | RecurrenceRule::IntervalMonths { .. } => Err(Error::Validation(
            "alarms repeat daily, on weekdays, weekends or chosen days".to_string(),
        )),
        RecurrenceRule::Weekly { days } if days.is_empty() => {
            Err(Error::Validation("weekly rule needs at least one day".to_string()))
        }
        _ => Ok(()),
    }
}

fn validate_reminder_schedule(schedule: &ReminderSchedule, now: NaiveDateTime) -> Result<()> {
    match schedule {
        ReminderSchedule::Once { when } if *when + PAST_TOLERANCE < now => {
            Err(Error::Validation("reminder time is in the past".to_string()))
        }
        ReminderSchedule::Once { .. } => Ok(()),
        ReminderSchedule::Recurring { rule, .. } => match rule {
            RecurrenceRule::None => Err(Error::Validation("recurring reminder needs a rule".to_string())),
            RecurrenceRule::Weekly { days } if days.is_empty() => {
                Err(Error::Validation("weekly rule needs at least one day".to_string()))
            }
            RecurrenceRule::Monthly { day } if !(1..=31).contains(day) => {
                Err(Error::Validation(format!("invalid day of month: {day}")))
            }
            RecurrenceRule::IntervalMonths { months: 0 } => {
                Err(Error::Validation("month interval must be positive".to_string()))
            }
            _ => Ok(()),
        },
    }
}

fn build_event(new: NewEvent, now: NaiveDateTime) -> Result<ScheduleEvent> {
    let (label, playback, detail) = match new {
        NewEvent::Alarm {
            time,
            recurrence,
            label,
            playback,
        } => {
            validate_alarm_rule(&recurrence)?;
            (
                label,
                playback,
                EventDetail::Alarm(AlarmDetail {
                    time,
                    recurrence,
                    skip_dates: BTreeSet::new(),
                }),
            )
        }
        NewEvent::Timer {
            duration,
            label,
            playback,
        } => {
            if duration <= TimeDelta::zero() {
                return Err(Error::Validation("timer duration must be positive".to_string()));
            }
            (
                label,
                playback,
                EventDetail::Timer(TimerDetail {
                    duration_secs: duration.num_seconds(),
                    started_at: now,
                    target: shift(now, duration)?,
                }),
            )
        }
        NewEvent::Reminder {
            schedule,
            message,
            label,
        } => {
            let message = message.trim().to_string();
            if message.is_empty() {
                return Err(Error::Validation("reminder message is empty".to_string()));
            }
            validate_reminder_schedule(&schedule, now)?;
            (
                label,
                Playback::Beep,
                EventDetail::Reminder(ReminderDetail {
                    message,
                    schedule,
                    completed: false,
                    delayed_until: None,
                    last_fired: None,
                    source: None,
                }),
            )
        }
    };

    Ok(ScheduleEvent {
        id: uuid::Uuid::new_v4().to_string(),
        label: label.filter(|l| !l.trim().is_empty()),
        created_at: now,
        enabled: true,
        playback,
        paused: false,
        next_fire: None,
        ringing_since: None,
        snoozed_until: None,
        detail,
    })
}

fn apply_patch(event: &mut ScheduleEvent, patch: EventPatch, now: NaiveDateTime) -> Result<()> {
    let kind = event.kind();
    let reject = |field: &str| Error::Validation(format!("{field} does not apply to a {kind}"));
    let reschedules = patch.time.is_some()
        || patch.recurrence.is_some()
        || patch.when.is_some()
        || patch.skip_dates.is_some()
        || patch.enabled.is_some();

    match &mut event.detail {
        EventDetail::Alarm(alarm) => {
            if patch.message.is_some() {
                return Err(reject("message"));
            }
            if patch.when.is_some() {
                return Err(reject("when"));
            }
            if let Some(rule) = patch.recurrence {
                validate_alarm_rule(&rule)?;
                alarm.recurrence = rule;
            }
            if let Some(time) = patch.time {
                alarm.time = time;
            }
            if let Some(dates) = patch.skip_dates {
                alarm.skip_dates = dates;
            }
        }
        EventDetail::Timer(_) => {
            for (present, field) in [
                (patch.time.is_some(), "time"),
                (patch.recurrence.is_some(), "recurrence"),
                (patch.skip_dates.is_some(), "skip_dates"),
                (patch.message.is_some(), "message"),
                (patch.when.is_some(), "when"),
            ] {
                if present {
                    return Err(reject(field));
                }
            }
        }
        EventDetail::Reminder(reminder) => {
            if patch.skip_dates.is_some() {
                return Err(reject("skip_dates"));
            }
            if let Some(message) = patch.message {
                let message = message.trim().to_string();
                if message.is_empty() {
                    return Err(Error::Validation("reminder message is empty".to_string()));
                }
                reminder.message = message;
            }
            let mut schedule = reminder.schedule.clone();
            if let Some(when) = patch.when {
                schedule = match schedule {
                    ReminderSchedule::Recurring { rule, .. } => ReminderSchedule::Recurring { rule, base: when },
                    ReminderSchedule::Once { .. } => ReminderSchedule::Once { when },
                };
            }
            if let Some(time) = patch.time {
                schedule = match schedule {
                    ReminderSchedule::Once { when } => ReminderSchedule::Once {
                        when: when.date().and_time(time),
                    },
                    ReminderSchedule::Recurring { rule, base } => ReminderSchedule::Recurring {
                        rule,
                        base: base.date().and_time(time),
                    },
                };
            }
            if let Some(rule) = patch.recurrence {
                let anchor = match &schedule {
                    ReminderSchedule::Once { when } => *when,
                    ReminderSchedule::Recurring { base, .. } => *base,
                };
                schedule = if rule.is_recurring() {
                    ReminderSchedule::Recurring { rule, base: anchor }
                } else {
                    ReminderSchedule::Once { when: anchor }
                };
            }
            if schedule != reminder.schedule {
                validate_reminder_schedule(&schedule, now)?;
                reminder.schedule = schedule;
                reminder.last_fired = None;
                reminder.delayed_until = None;
            }
        }
    }

    if let Some(label) = patch.label {
        event.label = Some(label).filter(|l| !l.trim().is_empty());
    }
    if let Some(enabled) = patch.enabled {
        event.enabled = enabled;
    }
    if let Some(playback) = patch.playback {
        event.playback = playback;
    }
    if reschedules {
        event.snoozed_until = None;
    }
    Ok(())
}

/// Recompute `next_fire` for an entity that is not ringing
fn refresh_next_fire(event: &mut ScheduleEvent, skip: &SkipPolicy, now: NaiveDateTime) {
    if event.is_ringing() {
        return;
    }
    if let Some(until) = event.snoozed_until {
        event.next_fire = Some(until);
        return;
    }

    let next = match &event.detail {
        EventDetail::Alarm(alarm) if event.enabled && !event.paused => {
            next_fire_skipping(&alarm.recurrence, now.date().and_time(alarm.time), now, skip)
        }
        EventDetail::Alarm(_) => None,
        EventDetail::Timer(timer) => Some(timer.target),
        EventDetail::Reminder(_) if !event.enabled => None,
        EventDetail::Reminder(reminder) => reminder.delayed_until.or_else(|| match &reminder.schedule {
            ReminderSchedule::Once { when } => Some(*when),
            ReminderSchedule::Recurring { rule, base } => {
                let floor = reminder
                    .last_fired
                    .map_or(now, |fired| (fired + TimeDelta::seconds(1)).max(now));
                Some(next_fire(rule, *base, floor))
            }
        }),
    };
    event.next_fire = next;
}

fn diff_triggers(state: &mut FeedState, triggers: Vec<CalendarTrigger>, now: NaiveDateTime) -> CalendarMerge {
    let mut merge = CalendarMerge::default();
    let seen: BTreeSet<String> = triggers.iter().map(|t| t.key.clone()).collect();
    let mut armed = BTreeMap::new();

    for trigger in triggers {
        if state.fired.contains(&trigger.key) {
            continue;
        }
        if state.armed.contains_key(&trigger.key) {
            merge.retained += 1;
            armed.insert(trigger.key.clone(), trigger);
        } else if trigger.fire_at >= now {
            merge.newly_armed.push(trigger.clone());
            armed.insert(trigger.key.clone(), trigger);
        } else {
            merge.missed += 1;
            state.fired.insert(trigger.key);
        }
    }

    merge.dropped = state.armed.keys().filter(|k| !armed.contains_key(*k)).count();
    state.fired.retain(|key| seen.contains(key));
    state.armed = armed;
    merge
}

fn calendar_reminder(trigger: &CalendarTrigger, now: NaiveDateTime) -> ScheduleEvent {
    let message = if trigger.fire_at >= trigger.event_start {
        format!("{} is starting now", trigger.summary)
    } else {
        format!("{} at {}", trigger.summary, describe_time(trigger.event_start.time()))
    };

    ScheduleEvent {
        id: uuid::Uuid::new_v4().to_string(),
        label: Some(trigger.summary.clone()),
        created_at: now,
        enabled: true,
        playback: Playback::Beep,
        paused: false,
        next_fire: None,
        ringing_since: Some(now),
        snoozed_until: None,
        detail: EventDetail::Reminder(ReminderDetail {
            message,
            schedule: ReminderSchedule::Once { when: trigger.fire_at },
            completed: false,
            delayed_until: None,
            last_fired: Some(trigger.fire_at),
            source: Some(format!("calendar:{}:{}", trigger.feed, trigger.event_id)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::clock::ManualClock;
    use chrono::{NaiveTime, Weekday};

    // 2026-03-02 is a Monday
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn store_at(start: NaiveDateTime) -> (Arc<ManualClock>, ScheduleStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = ScheduleStore::new(clock.clone(), StoreSettings::default());
        (clock, store)
    }

    fn alarm(h: u32, m: u32, recurrence: RecurrenceRule) -> NewEvent {
        NewEvent::Alarm {
            time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            recurrence,
            label: None,
            playback: Playback::Beep,
        }
    }

    fn timer(minutes: i64) -> NewEvent {
        NewEvent::Timer {
            duration: TimeDelta::minutes(minutes),
            label: None,
            playback: Playback::Beep,
        }
    }

    #[test]
    fn test_add_time_extends_target() {
        let (_, store) = store_at(at(2, 12, 0));
        let t = store.create(timer(15)).unwrap();
        let t = store.add_time(&t.id, 180).unwrap();

        assert_eq!(t.next_fire, Some(t.created_at + TimeDelta::minutes(18)));
        assert_eq!(t.as_timer().unwrap().duration_secs, 18 * 60);
    }

    #[test]
    fn test_rejects_non_positive_timer() {
        let (_, store) = store_at(at(2, 12, 0));
        let err = store.create(timer(0)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.snapshot().timers.is_empty());
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_, store) = store_at(at(2, 12, 0));
        assert!(matches!(store.stop("nope"), Err(Error::NotFound(_))));
        assert!(matches!(store.delete("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_timer_rings_and_stop_deletes() {
        let (clock, store) = store_at(at(2, 12, 0));
        let mut rx = store.subscribe();
        let t = store.create(timer(5)).unwrap();

        clock.advance(TimeDelta::seconds(299));
        assert!(store.tick().unwrap().is_empty());

        clock.advance(TimeDelta::seconds(1));
        let rang = store.tick().unwrap();
        assert_eq!(rang.len(), 1);
        assert!(store.is_ringing());

        store.stop(&t.id).unwrap();
        assert!(store.snapshot().timers.is_empty());

        let mut saw_ringing = false;
        let mut saw_cleared = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                StoreEvent::Ringing(e) => saw_ringing |= e.id == t.id,
                StoreEvent::Cleared(EventKind::Timer) => saw_cleared = true,
                _ => {}
            }
        }
        assert!(saw_ringing && saw_cleared);
    }

    #[test]
    fn test_recurring_alarm_survives_stop() {
        let (clock, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();
        assert_eq!(a.next_fire, Some(at(2, 7, 0)));

        clock.set(at(2, 7, 0));
        store.tick().unwrap();
        let ringing = store.get(&a.id).unwrap();
        assert!(ringing.is_ringing());
        assert_eq!(ringing.next_fire, Some(at(3, 7, 0)));

        let stopped = store.stop(&a.id).unwrap();
        assert!(!stopped.is_ringing());
        assert_eq!(store.get(&a.id).unwrap().next_fire, Some(at(3, 7, 0)));
    }

    #[test]
    fn test_one_shot_alarm_deleted_on_stop() {
        let (clock, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::None)).unwrap();
        clock.set(at(2, 7, 0));
        store.tick().unwrap();
        store.stop(&a.id).unwrap();
        assert!(store.get(&a.id).is_err());
    }

    #[test]
    fn test_snooze_rearms_once() {
        let (clock, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Weekdays)).unwrap();
        clock.set(at(2, 7, 0));
        store.tick().unwrap();

        let snoozed = store.snooze(&a.id, Some(10)).unwrap();
        assert_eq!(snoozed.next_fire, Some(at(2, 7, 10)));

        clock.set(at(2, 7, 10));
        assert_eq!(store.tick().unwrap().len(), 1);
        // Base schedule untouched
        assert_eq!(store.get(&a.id).unwrap().next_fire, Some(at(3, 7, 0)));
    }

    #[test]
    fn test_snooze_requires_ringing() {
        let (_, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();
        assert!(matches!(store.snooze(&a.id, None), Err(Error::Validation(_))));
    }

    #[test]
    fn test_pause_day_suppresses_only_that_date() {
        let (_, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();

        store.pause_day(at(2, 0, 0).date()).unwrap();
        let paused = store.get(&a.id).unwrap();
        assert!(paused.enabled);
        assert_eq!(paused.next_fire, Some(at(3, 7, 0)));

        store.resume_day(at(2, 0, 0).date()).unwrap();
        assert_eq!(store.get(&a.id).unwrap(), a);
    }

    #[test]
    fn test_pause_twice_is_noop_snapshot() {
        let (_, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();
        store.pause(&a.id).unwrap();
        let first = serde_json::to_string(&store.snapshot()).unwrap();
        store.pause(&a.id).unwrap();
        let second = serde_json::to_string(&store.snapshot()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resume_recomputes_from_now() {
        let (clock, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();
        store.pause(&a.id).unwrap();
        clock.set(at(2, 8, 0));
        let resumed = store.resume(&a.id).unwrap();
        assert_eq!(resumed.next_fire, Some(at(3, 7, 0)));
    }

    #[test]
    fn test_weekly_reminder_completes_by_one_week() {
        let (_, store) = store_at(at(1, 12, 0));
        let r = store
            .create(NewEvent::Reminder {
                schedule: ReminderSchedule::Recurring {
                    rule: RecurrenceRule::Weekly { days: vec![Weekday::Mon] },
                    base: at(2, 9, 0),
                },
                message: "bins out".to_string(),
                label: None,
            })
            .unwrap();
        assert_eq!(r.next_fire, Some(at(2, 9, 0)));

        let done = store.complete_reminder(&r.id).unwrap();
        assert_eq!(done.next_fire, Some(at(9, 9, 0)));
        assert_eq!(store.snapshot().reminders.len(), 1);
    }

    #[test]
    fn test_ringing_weekly_reminder_completes_by_one_week() {
        let (clock, store) = store_at(at(1, 12, 0));
        let r = store
            .create(NewEvent::Reminder {
                schedule: ReminderSchedule::Recurring {
                    rule: RecurrenceRule::Weekly { days: vec![Weekday::Mon] },
                    base: at(2, 9, 0),
                },
                message: "bins out".to_string(),
                label: None,
            })
            .unwrap();

        clock.set(at(2, 9, 0));
        store.tick().unwrap();
        let done = store.complete_reminder(&r.id).unwrap();
        assert!(!done.is_ringing());
        assert_eq!(done.next_fire, Some(at(9, 9, 0)));
    }

    #[test]
    fn test_one_shot_reminder_deleted_on_complete() {
        let (_, store) = store_at(at(2, 12, 0));
        let r = store
            .create(NewEvent::Reminder {
                schedule: ReminderSchedule::Once { when: at(2, 18, 0) },
                message: "call mum".to_string(),
                label: None,
            })
            .unwrap();
        let done = store.complete_reminder(&r.id).unwrap();
        assert!(done.as_reminder().unwrap().completed);
        assert!(store.snapshot().reminders.is_empty());
    }

    #[test]
    fn test_delay_resets_from_now() {
        let (clock, store) = store_at(at(2, 12, 0));
        let r = store
            .create(NewEvent::Reminder {
                schedule: ReminderSchedule::Once { when: at(2, 12, 5) },
                message: "stretch".to_string(),
                label: None,
            })
            .unwrap();

        store.delay_reminder(&r.id, 600).unwrap();
        clock.advance(TimeDelta::minutes(2));
        let again = store.delay_reminder(&r.id, 600).unwrap();
        assert_eq!(again.next_fire, Some(at(2, 12, 12)));
        assert_eq!(
            again.as_reminder().unwrap().schedule,
            ReminderSchedule::Once { when: at(2, 12, 5) }
        );
    }

    #[test]
    fn test_ringing_auto_stops_after_timeout() {
        let (clock, store) = store_at(at(2, 12, 0));
        let t = store.create(timer(1)).unwrap();
        clock.advance(TimeDelta::minutes(1));
        store.tick().unwrap();
        clock.advance(TimeDelta::minutes(10));
        store.tick().unwrap();
        assert!(store.get(&t.id).is_err());
    }

    #[test]
    fn test_cancel_all_scoped_to_kind() {
        let (_, store) = store_at(at(2, 12, 0));
        store.create(timer(1)).unwrap();
        store.create(timer(2)).unwrap();
        store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();

        assert_eq!(store.cancel_all(EventKind::Timer).unwrap(), 2);
        assert_eq!(store.snapshot().alarms.len(), 1);
    }

    #[test]
    fn test_alarm_rejects_monthly_rule() {
        let (_, store) = store_at(at(2, 12, 0));
        let err = store
            .create(alarm(7, 0, RecurrenceRule::Monthly { day: 3 }))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_update_rejects_foreign_fields() {
        let (_, store) = store_at(at(2, 12, 0));
        let t = store.create(timer(5)).unwrap();
        let patch = EventPatch {
            message: Some("hi".to_string()),
            ..EventPatch::default()
        };
        assert!(matches!(store.update(&t.id, patch), Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_alarm_time() {
        let (_, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();
        let patch = EventPatch {
            time: NaiveTime::from_hms_opt(6, 30, 0),
            label: Some("gym".to_string()),
            ..EventPatch::default()
        };
        let updated = store.update(&a.id, patch).unwrap();
        assert_eq!(updated.next_fire, Some(at(2, 6, 30)));
        assert_eq!(updated.label.as_deref(), Some("gym"));
    }

    #[test]
    fn test_calendar_trigger_fires_once() {
        let (clock, store) = store_at(at(2, 8, 0));
        let event = CalendarEvent {
            id: "standup".to_string(),
            feed: "work".to_string(),
            summary: "Standup".to_string(),
            start: at(2, 9, 0),
            end: at(2, 9, 15),
            all_day: false,
            trigger_offsets: vec![-600],
            is_owner: true,
            declined: false,
            out_of_office: false,
        };
        let trigger = CalendarTrigger::new(&event, at(2, 8, 50));

        let merge = store
            .apply_calendar_sync("work", vec![event.clone()], vec![trigger.clone()], BTreeSet::new())
            .unwrap();
        assert_eq!(merge.newly_armed.len(), 1);

        clock.set(at(2, 8, 50));
        let rang = store.tick().unwrap();
        assert_eq!(rang.len(), 1);
        assert_eq!(rang[0].as_reminder().unwrap().message, "Standup at 9:00 AM");

        // Same trigger on the next poll is not re-armed
        let merge = store
            .apply_calendar_sync("work", vec![event], vec![trigger], BTreeSet::new())
            .unwrap();
        assert!(merge.newly_armed.is_empty());
        assert!(store.armed_triggers().is_empty());
    }

    #[test]
    fn test_past_trigger_at_first_sight_is_missed() {
        let (_, store) = store_at(at(2, 10, 0));
        let event = CalendarEvent {
            id: "standup".to_string(),
            feed: "work".to_string(),
            summary: "Standup".to_string(),
            start: at(2, 9, 0),
            end: at(2, 9, 15),
            all_day: false,
            trigger_offsets: Vec::new(),
            is_owner: true,
            declined: false,
            out_of_office: false,
        };
        let trigger = CalendarTrigger::new(&event, at(2, 9, 0));
        let merge = store
            .apply_calendar_sync("work", vec![event], vec![trigger], BTreeSet::new())
            .unwrap();
        assert_eq!(merge.missed, 1);
        assert!(store.tick().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_office_skips_alarm() {
        let (_, store) = store_at(at(2, 6, 0));
        let a = store.create(alarm(7, 0, RecurrenceRule::Weekdays)).unwrap();
        let ooo: BTreeSet<NaiveDate> = [at(2, 0, 0).date(), at(3, 0, 0).date()].into();
        store
            .apply_calendar_sync("work", Vec::new(), Vec::new(), ooo)
            .unwrap();
        assert_eq!(store.get(&a.id).unwrap().next_fire, Some(at(4, 7, 0)));
    }

    #[test]
    fn test_restore_clears_ringing() {
        let (clock, store) = store_at(at(2, 6, 0));
        store.create(alarm(7, 0, RecurrenceRule::Daily)).unwrap();
        clock.set(at(2, 7, 0));
        store.tick().unwrap();
        let saved = store.snapshot();

        let (_, fresh) = store_at(at(2, 7, 5));
        fresh.restore(saved.entities().cloned().collect(), saved.paused_days);
        let restored = fresh.snapshot();
        assert!(!restored.alarms[0].is_ringing());
        assert_eq!(restored.alarms[0].next_fire, Some(at(3, 7, 0)));
    }
}
