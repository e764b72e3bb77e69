//! State publisher integration tests
//!
//! Run the publisher task against a real bus, store and snapshot file.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::{broadcast, watch};

use hearth::publisher::{
    BusMessage, CommandSender, Overlay, StatePublisher, SyncBus, load_snapshot,
};
use hearth::schedule::{EventKind, ManualClock, ScheduleStore, StoreSettings};

mod common;
use common::RecordingDisplay;

/// Next message on `topic`, skipping everything else
async fn next_on(rx: &mut broadcast::Receiver<BusMessage>, topic: &str) -> BusMessage {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let message = rx.recv().await.unwrap();
            if message.topic == topic {
                return message;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("nothing published on {topic}"))
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<ScheduleStore>,
    bus: Arc<SyncBus>,
    display: Arc<RecordingDisplay>,
    commands: CommandSender,
    rx: broadcast::Receiver<BusMessage>,
}

fn harness() -> Harness {
    let (clock, store) = common::store();
    let bus = Arc::new(SyncBus::new("hearth"));
    let display = Arc::new(RecordingDisplay::default());
    let rx = bus.subscribe();
    let (commands, _task) = StatePublisher::new(Arc::clone(&store), Arc::clone(&bus), display.clone()).spawn();
    Harness {
        clock,
        store,
        bus,
        display,
        commands,
        rx,
    }
}

#[tokio::test]
async fn test_list_republishes_identical_snapshot() {
    let mut h = harness();
    let topic = h.bus.topic("schedules/state");
    let initial = next_on(&mut h.rx, &topic).await;
    assert!(initial.retained);

    h.commands.send(r#"{"action": "list"}"#.to_string()).await.unwrap();
    let again = next_on(&mut h.rx, &topic).await;
    assert_eq!(again.payload, initial.payload);
}

#[tokio::test]
async fn test_command_updates_retained_snapshot() {
    let mut h = harness();
    let topic = h.bus.topic("schedules/state");
    next_on(&mut h.rx, &topic).await;

    h.commands
        .send(r#"{"action": "create_alarm", "time": "6:45", "label": "gym"}"#.to_string())
        .await
        .unwrap();
    let changed = next_on(&mut h.rx, &topic).await;

    let state: serde_json::Value = serde_json::from_str(&changed.payload).unwrap();
    assert_eq!(state["alarms"][0]["label"], "gym");
    assert_eq!(h.bus.retained(&topic), Some(changed.payload));
}

#[tokio::test]
async fn test_ringing_and_idle_reach_bus_and_display() {
    let mut h = harness();
    let active = h.bus.topic("timers/active");

    h.commands
        .send(r#"{"action": "start_timer", "duration": 30}"#.to_string())
        .await
        .unwrap();
    common::eventually(|| h.store.list(EventKind::Timer).len() == 1).await;

    h.clock.advance(TimeDelta::seconds(30));
    h.store.tick().unwrap();
    let ringing = loop {
        let message = next_on(&mut h.rx, &active).await;
        if message.payload.contains("ringing") {
            break message;
        }
    };
    assert!(!ringing.retained);

    h.store.stop_all_ringing().unwrap();
    let idle = next_on(&mut h.rx, &active).await;
    assert_eq!(idle.payload, r#"{"state":"idle"}"#);

    common::eventually(|| {
        let shown = h.display.shown.lock().unwrap();
        shown.iter().any(|o| matches!(o, Overlay::Ringing { .. }))
            && matches!(shown.last(), Some(Overlay::Idle { kind: EventKind::Timer }))
    })
    .await;
}

#[tokio::test]
async fn test_shutdown_flushes_pending_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedules.json");
    let (_clock, store) = common::store();
    let bus = Arc::new(SyncBus::new("hearth"));
    let (stop_tx, stop_rx) = watch::channel(false);

    // Long debounce: only the shutdown flush can write the file in time
    let (commands, task) = StatePublisher::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::new(RecordingDisplay::default()),
    )
    .persist_to(path.clone(), Duration::from_secs(3600))
    .until(stop_rx)
    .spawn();

    commands
        .send(r#"{"action": "create_reminder", "when": "tomorrow at 8", "message": "take the bins out"}"#.to_string())
        .await
        .unwrap();
    common::eventually(|| store.list(EventKind::Reminder).len() == 1).await;
    assert!(load_snapshot(&path).unwrap().is_none());

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    let saved = load_snapshot(&path).unwrap().unwrap();
    assert_eq!(saved.reminders.len(), 1);

    let restored = ScheduleStore::new(Arc::new(ManualClock::new(common::start())), StoreSettings::default());
    restored.restore(saved.entities().cloned().collect(), saved.paused_days);
    assert_eq!(restored.snapshot(), store.snapshot());
}

#[tokio::test]
async fn test_out_of_range_command_is_dropped() {
    let mut h = harness();
    let topic = h.bus.topic("schedules/state");
    let initial = next_on(&mut h.rx, &topic).await;

    for raw in [
        r#"{"action": "start_timer", "duration": 9223372036854775807}"#,
        r#"{"action": "snooze", "event_id": "missing", "minutes": 9223372036854775807}"#,
    ] {
        h.commands.send(raw.to_string()).await.unwrap();
    }

    // Still serving commands afterwards, with nothing changed
    h.commands.send(r#"{"action": "list"}"#.to_string()).await.unwrap();
    let again = next_on(&mut h.rx, &topic).await;
    assert_eq!(again.payload, initial.payload);
    assert!(h.store.list(EventKind::Timer).is_empty());
}
