//! Schedule integration tests
//!
//! Drive the store through the inbound command surface the way a display or
//! companion app would, advancing a manual clock between steps.

use chrono::TimeDelta;
use tokio_test::{assert_err, assert_ok};

use hearth::Error;
use hearth::publisher::{Applied, execute};
use hearth::schedule::{EventKind, ScheduleEvent, ScheduleStore};

mod common;
use common::at;

fn created(store: &ScheduleStore, raw: &str) -> ScheduleEvent {
    match assert_ok!(execute(store, raw)) {
        (_, Applied::Event(event)) => event,
        (command, other) => panic!("{command:?} produced {other:?}"),
    }
}

#[test]
fn test_five_minute_timer_rings_then_stops() {
    let (clock, store) = common::store();
    let timer = created(
        &store,
        r#"{"action": "start_timer", "duration": "5 minutes", "label": "pasta"}"#,
    );
    assert_eq!(timer.next_fire, Some(at(2026, 3, 3, 9, 5)));

    clock.advance(TimeDelta::seconds(299));
    assert!(assert_ok!(store.tick()).is_empty());

    clock.advance(TimeDelta::seconds(1));
    let rang = assert_ok!(store.tick());
    assert_eq!(rang.len(), 1);
    assert_eq!(rang[0].id, timer.id);
    assert!(store.is_ringing());

    let stop = format!(r#"{{"action": "stop", "event_id": "{}"}}"#, timer.id);
    assert_ok!(execute(&store, &stop));
    assert!(!store.is_ringing());
    assert!(store.list(EventKind::Timer).is_empty());
}

#[test]
fn test_paused_day_skips_daily_alarm() {
    let (clock, store) = common::store();
    let alarm = created(
        &store,
        r#"{"action": "create_alarm", "time": "7:00", "recurrence": "daily"}"#,
    );
    assert_eq!(alarm.next_fire, Some(at(2026, 3, 4, 7, 0)));

    assert_ok!(execute(&store, r#"{"action": "pause_day", "date": "2026-03-04"}"#));
    let paused = assert_ok!(store.get(&alarm.id));
    assert!(paused.enabled);
    assert_eq!(paused.next_fire, Some(at(2026, 3, 5, 7, 0)));

    clock.set(at(2026, 3, 4, 7, 0));
    assert!(assert_ok!(store.tick()).is_empty());

    clock.set(at(2026, 3, 5, 7, 0));
    assert_eq!(assert_ok!(store.tick()).len(), 1);
    assert_eq!(store.snapshot().paused_days, vec![at(2026, 3, 4, 0, 0).date()]);
}

#[test]
fn test_snoozed_alarm_rings_again() {
    let (clock, store) = common::store();
    let alarm = created(
        &store,
        r#"{"action": "create_alarm", "time": "7:00", "recurrence": "weekdays"}"#,
    );

    clock.set(at(2026, 3, 4, 7, 0));
    assert_eq!(assert_ok!(store.tick()).len(), 1);

    let snooze = format!(r#"{{"action": "snooze", "event_id": "{}", "minutes": 5}}"#, alarm.id);
    let snoozed = match assert_ok!(execute(&store, &snooze)) {
        (_, Applied::Event(event)) => event,
        (_, other) => panic!("unexpected {other:?}"),
    };
    assert!(!snoozed.is_ringing());
    assert_eq!(snoozed.next_fire, Some(at(2026, 3, 4, 7, 5)));

    clock.set(at(2026, 3, 4, 7, 5));
    assert_eq!(assert_ok!(store.tick()).len(), 1);
    assert!(assert_ok!(store.get(&alarm.id)).is_ringing());
}

#[test]
fn test_delayed_reminder_resets_from_now() {
    let (clock, store) = common::store();
    let reminder = created(
        &store,
        r#"{"action": "create_reminder", "when": "2026-03-03 09:30", "message": "water the plants"}"#,
    );

    let delay = format!(r#"{{"action": "delay_reminder", "event_id": "{}", "minutes": 10}}"#, reminder.id);
    assert_ok!(execute(&store, &delay));
    clock.advance(TimeDelta::minutes(3));
    let (_, applied) = assert_ok!(execute(&store, &delay));
    let Applied::Event(delayed) = applied else {
        panic!("unexpected {applied:?}");
    };
    assert_eq!(delayed.next_fire, Some(at(2026, 3, 3, 9, 13)));

    clock.set(at(2026, 3, 3, 9, 13));
    let rang = assert_ok!(store.tick());
    assert_eq!(rang.len(), 1);
    assert_eq!(rang[0].spoken_name(), "water the plants");

    let complete = format!(r#"{{"action": "complete_reminder", "event_id": "{}"}}"#, reminder.id);
    assert_ok!(execute(&store, &complete));
    assert!(store.list(EventKind::Reminder).is_empty());
}

#[test]
fn test_rejected_commands_leave_store_untouched() {
    let (_clock, store) = common::store();
    created(&store, r#"{"action": "start_timer", "duration": 60}"#);
    let before = store.snapshot();

    let err = assert_err!(execute(&store, r#"{"action": "stop"}"#));
    assert!(matches!(err, Error::MalformedCommand(_)));
    let err = assert_err!(execute(&store, r#"{"action": "stop", "event_id": "missing"}"#));
    assert!(matches!(err, Error::NotFound(_)));
    let err = assert_err!(execute(&store, r#"{"action": "start_timer", "duration": -5}"#));
    assert!(matches!(err, Error::Validation(_)));
    assert_err!(execute(&store, r#"{"action": "launch_rocket"}"#));
    assert_err!(execute(&store, "not json"));

    assert_eq!(store.snapshot(), before);
}

#[test]
fn test_cancel_all_only_touches_one_kind() {
    let (_clock, store) = common::store();
    created(&store, r#"{"action": "start_timer", "duration": "10m"}"#);
    created(&store, r#"{"action": "start_timer", "duration": "1h"}"#);
    created(&store, r#"{"action": "create_alarm", "time": "6:30am"}"#);

    let (_, applied) = assert_ok!(execute(&store, r#"{"action": "cancel_all", "event_type": "timer"}"#));
    assert_eq!(applied, Applied::Count(2));
    assert!(store.list(EventKind::Timer).is_empty());
    assert_eq!(store.list(EventKind::Alarm).len(), 1);
}

#[test]
fn test_oversized_spans_are_rejected_not_fatal() {
    let (clock, store) = common::store();
    let timer = created(&store, r#"{"action": "start_timer", "duration": 60}"#);
    let before = store.snapshot();

    for raw in [
        r#"{"action": "start_timer", "duration": 9223372036854775807}"#.to_string(),
        r#"{"action": "start_timer", "duration": "P99999999999999D"}"#.to_string(),
        r#"{"action": "create_reminder", "when": "in 9000000000000 minutes", "message": "never"}"#.to_string(),
        r#"{"action": "create_reminder", "when": "tomorrow at 9", "message": "rent", "repeat": "interval_months", "months": 4294967295}"#.to_string(),
        format!(r#"{{"action": "add_time", "event_id": "{}", "seconds": 9223372036854775807}}"#, timer.id),
        format!(r#"{{"action": "add_time", "event_id": "{}", "minutes": 9223372036854775807}}"#, timer.id),
        format!(r#"{{"action": "add_time", "event_id": "{}", "seconds": 9000000000000000}}"#, timer.id),
    ] {
        let err = assert_err!(execute(&store, &raw));
        assert!(matches!(err, Error::Validation(_)), "{raw}: {err:?}");
    }
    assert_eq!(store.snapshot(), before);

    let err = assert_err!(store.add_time(&timer.id, i64::MAX));
    assert!(matches!(err, Error::Validation(_)));
    let err = assert_err!(store.snooze("missing", Some(i64::MAX)));
    assert!(matches!(err, Error::NotFound(_)));

    clock.advance(TimeDelta::seconds(60));
    assert_eq!(assert_ok!(store.tick()).len(), 1);
    let err = assert_err!(store.snooze(&timer.id, Some(i64::MAX)));
    assert!(matches!(err, Error::Validation(_)));
    let err = assert_err!(store.delay_reminder(&timer.id, i64::MAX));
    assert!(matches!(err, Error::Validation(_)));
    assert!(store.is_ringing());
}
