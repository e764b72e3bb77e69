//! Audible ringing
//!
//! Follows the store's ringing notifications and sounds the entity's
//! playback: a repeating alarm tone on the speaker, or a music source on the
//! household player. The sound stops once nothing rings any more.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::clients::{AudioSink, Clip, Tone};
use crate::error::with_timeout;
use crate::media::{MediaCommand, MediaPlayer};
use crate::schedule::{Playback, ScheduleEvent, ScheduleStore, StoreEvent};

/// Pause between repeats of the alarm tone
pub const TONE_GAP: Duration = Duration::from_millis(600);

/// What is currently sounding
enum Sounding {
    Tone(JoinHandle<()>),
    Music,
}

/// Sounds ringing entities until they are acknowledged
pub struct Ringer {
    store: Arc<ScheduleStore>,
    sink: Arc<dyn AudioSink>,
    media: Option<Arc<dyn MediaPlayer>>,
    timeout: Duration,
    gap: Duration,
    sounding: Option<Sounding>,
}

impl Ringer {
    #[must_use]
    pub fn new(
        store: Arc<ScheduleStore>,
        sink: Arc<dyn AudioSink>,
        media: Option<Arc<dyn MediaPlayer>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            media,
            timeout,
            gap: TONE_GAP,
            sounding: None,
        }
    }

    /// Override the pause between tone repeats
    #[must_use]
    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    /// Follow the store until `shutdown` flips
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut rx = self.store.subscribe();
        tokio::spawn(async move {
            // Something may already be ringing after a restore
            if let Some(event) = self.store.ringing().into_iter().next() {
                self.start(&event).await;
            }
            loop {
                tokio::select! {
                    () = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                    received = rx.recv() => match received {
                        Ok(StoreEvent::Ringing(event)) => self.start(&event).await,
                        Ok(StoreEvent::Cleared(_) | StoreEvent::Changed) => self.settle().await,
                        Ok(StoreEvent::CalendarChanged) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "ringer lagged, resyncing");
                            match self.store.ringing().into_iter().next() {
                                Some(event) => self.start(&event).await,
                                None => self.settle().await,
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            self.silence().await;
        })
    }

    /// Sound `event` unless something is already sounding
    async fn start(&mut self, event: &ScheduleEvent) {
        if self.sounding.is_some() {
            return;
        }
        if let Playback::Music { source } = &event.playback {
            if let Some(media) = &self.media {
                match with_timeout("media", self.timeout, media.command(MediaCommand::Play(source.clone()))).await {
                    Ok(()) => {
                        tracing::info!(event_id = %event.id, %source, "ringing with music");
                        self.sounding = Some(Sounding::Music);
                        return;
                    }
                    Err(e) => tracing::warn!(error = %e, %source, "music unavailable, ringing with tone"),
                }
            }
        }

        tracing::info!(event_id = %event.id, kind = %event.kind(), "ringing with tone");
        let (sink, gap) = (Arc::clone(&self.sink), self.gap);
        self.sounding = Some(Sounding::Tone(tokio::spawn(async move {
            loop {
                if let Err(e) = sink.play(Clip::Tone(Tone::Alarm)).await {
                    tracing::warn!(error = %e, "alarm tone failed");
                }
                tokio::time::sleep(gap).await;
            }
        })));
    }

    /// Stop sounding once nothing rings
    async fn settle(&mut self) {
        if self.sounding.is_some() && !self.store.is_ringing() {
            self.silence().await;
        }
    }

    async fn silence(&mut self) {
        match self.sounding.take() {
            Some(Sounding::Tone(task)) => {
                task.abort();
                self.sink.stop();
                tracing::debug!("alarm tone stopped");
            }
            Some(Sounding::Music) => {
                if let Some(media) = &self.media {
                    if let Err(e) = with_timeout("media", self.timeout, media.command(MediaCommand::Stop)).await {
                        tracing::warn!(error = %e, "failed to stop alarm music");
                    }
                }
            }
            None => {}
        }
    }
}
