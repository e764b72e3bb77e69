//! State publisher
//!
//! Mirrors the schedule store onto the sync contract and applies inbound
//! commands. A single task owns both directions, so commands are applied in
//! arrival order and every resulting snapshot is published before the next
//! command is read.
//!
//! Topics (under `<namespace>/assistant/`):
//! - `schedules/state` (retained): full snapshot after every mutation
//! - `<kind>s/active`: `{"state":"ringing","event":{...}}` or `{"state":"idle"}`
//! - `calendar/events` (retained): cached calendar events

mod bus;
pub mod commands;
mod debounce;
mod display;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::schedule::{EventKind, ScheduleEvent, ScheduleStore, StoreEvent};
use crate::Result;

pub use bus::{BusFrame, BusMessage, SyncBus};
pub use commands::{Applied, Command, execute};
pub use debounce::{DebouncedWriter, PERSIST_DELAY, load_snapshot};
pub use display::{BusDisplay, DisplaySurface, Overlay};

const COMMAND_QUEUE: usize = 64;

/// Sender half of the inbound command queue
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<String>,
}

impl CommandSender {
    /// Queue a raw command payload
    ///
    /// # Errors
    ///
    /// Returns error if the publisher has shut down
    pub async fn send(&self, raw: String) -> Result<()> {
        self.tx
            .send(raw)
            .await
            .map_err(|_| crate::Error::Config("state publisher is not running".to_string()))
    }
}

/// Publishes store state and applies inbound commands
pub struct StatePublisher {
    store: Arc<ScheduleStore>,
    bus: Arc<SyncBus>,
    display: Arc<dyn DisplaySurface>,
    persist: Option<DebouncedWriter>,
    shutdown: Option<watch::Receiver<bool>>,
    last_snapshot: Option<String>,
}

impl StatePublisher {
    #[must_use]
    pub fn new(store: Arc<ScheduleStore>, bus: Arc<SyncBus>, display: Arc<dyn DisplaySurface>) -> Self {
        Self {
            store,
            bus,
            display,
            persist: None,
            shutdown: None,
            last_snapshot: None,
        }
    }

    /// Persist snapshots to `path` after `delay` of quiet
    #[must_use]
    pub fn persist_to(mut self, path: PathBuf, delay: Duration) -> Self {
        self.persist = Some(DebouncedWriter::new(path, delay));
        self
    }

    /// Stop (after a final flush) once `shutdown` flips to true
    #[must_use]
    pub fn until(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Publish the current snapshot
    ///
    /// Identical snapshots are still republished so the retained value is
    /// refreshed; the payload is byte-identical.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be serialized
    pub fn publish_snapshot(&mut self) -> Result<()> {
        let payload = serde_json::to_string(&self.store.snapshot())?;
        if self.last_snapshot.as_deref() == Some(payload.as_str()) {
            tracing::trace!("snapshot unchanged, republishing");
        } else {
            tracing::debug!(bytes = payload.len(), "snapshot published");
            if let Some(writer) = self.persist.as_mut() {
                writer.schedule(payload.clone());
            }
        }
        self.bus.publish("schedules/state", payload.clone(), true);
        self.last_snapshot = Some(payload);
        Ok(())
    }

    /// Publish the ringing card for an entity
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be serialized
    pub fn publish_ringing(&self, event: &ScheduleEvent) -> Result<()> {
        let topic = format!("{}/active", event.kind().plural());
        self.bus
            .publish_json(&topic, &json!({"state": "ringing", "event": event}), false)?;
        self.display.show(Overlay::Ringing {
            event: event.clone(),
        });
        Ok(())
    }

    /// Publish the idle message for a kind
    pub fn publish_idle(&self, kind: EventKind) {
        let topic = format!("{}/active", kind.plural());
        self.bus.publish(&topic, r#"{"state":"idle"}"#.to_string(), false);
        self.display.show(Overlay::Idle { kind });
    }

    /// Publish the calendar cache
    ///
    /// # Errors
    ///
    /// Returns error if the events cannot be serialized
    pub fn publish_calendar(&self) -> Result<()> {
        self.bus
            .publish_json("calendar/events", &self.store.calendar_events(), true)
    }

    /// Parse, validate, and apply one inbound command
    ///
    /// Malformed payloads and unknown ids are logged and dropped; the store
    /// is unchanged in that case.
    pub fn handle_command(&mut self, raw: &str) {
        match execute(&self.store, raw) {
            Ok((Command::List, _)) => {
                if let Err(e) = self.publish_snapshot() {
                    tracing::warn!(error = %e, "failed to publish snapshot");
                }
            }
            Ok((command, applied)) => {
                tracing::info!(action = command.action(), result = ?summary(&applied), "command applied");
            }
            Err(e) => {
                tracing::warn!(error = %e, payload = %truncate(raw, 200), "command rejected");
            }
        }
    }

    /// React to one store notification
    ///
    /// # Errors
    ///
    /// Returns error if a payload cannot be serialized
    pub fn handle_store_event(&mut self, event: StoreEvent) -> Result<()> {
        match event {
            StoreEvent::Changed => self.publish_snapshot(),
            StoreEvent::Ringing(event) => {
                tracing::info!(event_id = %event.id, kind = %event.kind(), "ringing");
                self.publish_ringing(&event)
            }
            StoreEvent::Cleared(kind) => {
                self.publish_idle(kind);
                Ok(())
            }
            StoreEvent::CalendarChanged => self.publish_calendar(),
        }
    }

    /// Republish everything from store truth (after a missed notification)
    ///
    /// # Errors
    ///
    /// Returns error if a payload cannot be serialized
    pub fn resync(&mut self) -> Result<()> {
        self.publish_snapshot()?;
        self.publish_calendar()?;
        let ringing = self.store.ringing();
        for kind in EventKind::ALL {
            match ringing.iter().find(|e| e.kind() == kind) {
                Some(event) => self.publish_ringing(event)?,
                None => self.publish_idle(kind),
            }
        }
        Ok(())
    }

    /// Start the publisher task
    pub fn spawn(self) -> (CommandSender, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let events = self.store.subscribe();
        let handle = tokio::spawn(self.run(events, rx));
        (CommandSender { tx }, handle)
    }

    async fn run(mut self, mut events: broadcast::Receiver<StoreEvent>, mut commands: mpsc::Receiver<String>) {
        if let Err(e) = self.resync() {
            tracing::warn!(error = %e, "initial publish failed");
        }
        let mut shutdown = self.shutdown.take();

        loop {
            let due = self.persist.as_ref().and_then(DebouncedWriter::due);
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.handle_store_event(event) {
                            tracing::warn!(error = %e, "failed to publish store event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "publisher lagged, resyncing");
                        if let Err(e) = self.resync() {
                            tracing::warn!(error = %e, "resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                raw = commands.recv() => match raw {
                    Some(raw) => self.handle_command(&raw),
                    None => break,
                },
                () = shutdown_requested(shutdown.as_mut()) => break,
                () = sleep_until(due) => {
                    if let Some(writer) = self.persist.as_mut() {
                        if let Err(e) = writer.flush().await {
                            tracing::warn!(error = %e, "failed to persist schedules");
                        }
                    }
                }
            }
        }

        if let Some(writer) = self.persist.as_mut() {
            if let Err(e) = writer.flush().await {
                tracing::warn!(error = %e, "failed to persist schedules on shutdown");
            }
        }
        tracing::info!("state publisher stopped");
    }
}

async fn shutdown_requested(shutdown: Option<&mut watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn sleep_until(due: Option<tokio::time::Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn summary(applied: &Applied) -> String {
    match applied {
        Applied::Event(event) => format!("{} {}", event.kind(), event.id),
        Applied::Events(events) => format!("{} entities", events.len()),
        Applied::Count(n) => format!("{n} removed"),
        Applied::Day(date) => date.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ManualClock, StoreSettings};
    use chrono::NaiveDate;

    struct NullDisplay;

    impl DisplaySurface for NullDisplay {
        fn show(&self, _overlay: Overlay) {}
    }

    fn publisher() -> (Arc<ScheduleStore>, Arc<SyncBus>, StatePublisher) {
        let now = NaiveDate::from_ymd_opt(2026, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let store = Arc::new(ScheduleStore::new(
            Arc::new(ManualClock::new(now)),
            StoreSettings::default(),
        ));
        let bus = Arc::new(SyncBus::new("test"));
        let publisher = StatePublisher::new(store.clone(), bus.clone(), Arc::new(NullDisplay));
        (store, bus, publisher)
    }

    #[test]
    fn test_command_republishes_via_store_event() {
        let (store, bus, mut publisher) = publisher();
        let mut events = store.subscribe();

        publisher.handle_command(r#"{"action":"create_alarm","time":"07:00"}"#);
        while let Ok(event) = events.try_recv() {
            publisher.handle_store_event(event).unwrap();
        }

        let state = bus.retained("test/assistant/schedules/state").unwrap();
        let snapshot: serde_json::Value = serde_json::from_str(&state).unwrap();
        assert_eq!(snapshot["alarms"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_command_leaves_state_alone() {
        let (store, _bus, mut publisher) = publisher();
        publisher.handle_command("{\"action\":");
        publisher.handle_command(r#"{"action":"delete_alarm","event_id":"missing"}"#);
        assert!(store.snapshot().entities().next().is_none());
    }

    #[test]
    fn test_idle_payload() {
        let (_store, bus, publisher) = publisher();
        let mut rx = bus.subscribe();
        publisher.publish_idle(EventKind::Timer);
        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "test/assistant/timers/active");
        assert_eq!(message.payload, r#"{"state":"idle"}"#);
    }
}
