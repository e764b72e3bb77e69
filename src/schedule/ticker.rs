//! Fixed-interval ticker driving the schedule store

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::ScheduleStore;

/// Spawn the ticker task
///
/// Each tick advances the store to the clock's current time. Ringing
/// notifications reach subscribers through the store's broadcast channel.
pub fn spawn_ticker(store: Arc<ScheduleStore>, every: Duration) -> JoinHandle<()> {
    tracing::info!(interval_ms = every.as_millis(), "schedule ticker started");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match store.tick() {
                Ok(rang) if !rang.is_empty() => {
                    tracing::debug!(count = rang.len(), "entities started ringing");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "schedule tick failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ManualClock, NewEvent, Playback, StoreEvent, StoreSettings};
    use chrono::{NaiveDate, TimeDelta};

    #[tokio::test]
    async fn test_ticker_raises_ringing() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(ScheduleStore::new(clock.clone(), StoreSettings::default()));
        let mut rx = store.subscribe();

        store
            .create(NewEvent::Timer {
                duration: TimeDelta::seconds(30),
                label: None,
                playback: Playback::Beep,
            })
            .unwrap();
        clock.advance(TimeDelta::seconds(30));

        let handle = spawn_ticker(store.clone(), Duration::from_millis(10));
        let ringing = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(StoreEvent::Ringing(event)) = rx.recv().await {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        handle.abort();

        assert!(ringing.is_ringing());
    }
}
