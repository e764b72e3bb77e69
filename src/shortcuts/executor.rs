//! Carries out locally handled intents

use std::sync::Arc;

use crate::media::{MediaCommand, MediaPlayer};
use crate::publisher::{DisplaySurface, Overlay};
use crate::schedule::parse::{describe_duration, describe_time};
use crate::schedule::{EventKind, NewEvent, Playback, ScheduleEvent, ScheduleStore};
use crate::{Error, Result};

use super::info::InfoProviders;
use super::intents::Intent;

/// What the assistant says after a local intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    /// Empty when the turn should end silently (bare "stop")
    pub speech: String,
    pub expects_reply: bool,
}

impl LocalReply {
    fn say(speech: impl Into<String>) -> Self {
        Self {
            speech: speech.into(),
            expects_reply: false,
        }
    }

    fn ask(speech: impl Into<String>) -> Self {
        Self {
            speech: speech.into(),
            expects_reply: true,
        }
    }

    const fn silent() -> Self {
        Self {
            speech: String::new(),
            expects_reply: false,
        }
    }
}

/// Executes intents against the store and local collaborators
pub struct ShortcutExecutor {
    store: Arc<ScheduleStore>,
    info: Arc<InfoProviders>,
    media: Option<Arc<dyn MediaPlayer>>,
    display: Arc<dyn DisplaySurface>,
}

impl ShortcutExecutor {
    #[must_use]
    pub fn new(
        store: Arc<ScheduleStore>,
        info: Arc<InfoProviders>,
        media: Option<Arc<dyn MediaPlayer>>,
        display: Arc<dyn DisplaySurface>,
    ) -> Self {
        Self {
            store,
            info,
            media,
            display,
        }
    }

    /// Run an intent; store failures become a spoken apology
    pub async fn execute(&self, intent: &Intent) -> LocalReply {
        tracing::debug!(intent = intent.name(), "executing shortcut");
        match self.dispatch(intent).await {
            Ok(reply) => reply,
            Err(Error::NotFound(_)) => LocalReply::say("I couldn't find that."),
            Err(Error::Validation(message)) => {
                tracing::warn!(intent = intent.name(), %message, "shortcut rejected");
                LocalReply::say("Sorry, I couldn't do that.")
            }
            Err(e) => {
                tracing::warn!(intent = intent.name(), error = %e, "shortcut failed");
                LocalReply::say("Sorry, something went wrong.")
            }
        }
    }

    async fn dispatch(&self, intent: &Intent) -> Result<LocalReply> {
        match intent {
            Intent::Stop { kind } => self.stop(*kind),
            Intent::Snooze { minutes } => self.snooze(*minutes),
            Intent::StartTimer { duration, label } => {
                let timer = self.store.create(NewEvent::Timer {
                    duration: *duration,
                    label: label.clone(),
                    playback: Playback::Beep,
                })?;
                Ok(LocalReply::say(format!(
                    "{} set for {}.",
                    capitalize(&timer.spoken_name()),
                    describe_duration(*duration)
                )))
            }
            Intent::SetAlarm {
                time,
                recurrence,
                label,
            } => {
                let alarm = self.store.create(NewEvent::Alarm {
                    time: *time,
                    recurrence: recurrence.clone(),
                    label: label.clone(),
                    playback: Playback::Beep,
                })?;
                let repeat = if recurrence.is_recurring() {
                    format!(" {}", recurrence.describe())
                } else {
                    String::new()
                };
                Ok(LocalReply::say(format!(
                    "{} set for {}{repeat}.",
                    capitalize(&alarm.spoken_name()),
                    describe_time(*time)
                )))
            }
            Intent::CreateReminder { schedule, message } => {
                let reminder = self.store.create(NewEvent::Reminder {
                    schedule: schedule.clone(),
                    message: message.clone(),
                    label: None,
                })?;
                let now = self.store.now();
                Ok(LocalReply::say(format!(
                    "Okay, I'll remind you to {}.",
                    reminder.describe(now)
                )))
            }
            Intent::AddTime { duration, label } => self.add_time(*duration, label.as_deref()),
            Intent::Cancel { kind, all, label } => self.cancel(*kind, *all, label.as_deref()),
            Intent::List { kind } => Ok(self.list(*kind)),
            Intent::Info(topic) => {
                let answer = self.info.answer(*topic).await;
                if !answer.degraded {
                    self.display.show(Overlay::Info {
                        title: answer.title,
                        lines: answer.lines,
                    });
                }
                Ok(LocalReply::say(answer.speech))
            }
            Intent::Music(command) => Ok(self.music(command.clone()).await),
        }
    }

    fn stop(&self, kind: Option<EventKind>) -> Result<LocalReply> {
        if self.store.is_ringing() {
            let stopped = self.store.stop_all_ringing()?;
            tracing::info!(count = stopped.len(), "stopped by voice");
            return Ok(LocalReply::silent());
        }
        match kind {
            // "stop the timer" with nothing ringing cancels the only one
            Some(kind) => self.cancel(kind, false, None),
            None => Ok(LocalReply::silent()),
        }
    }

    fn snooze(&self, minutes: Option<i64>) -> Result<LocalReply> {
        let Some(ringing) = self.store.ringing().into_iter().next() else {
            return Ok(LocalReply::say("Nothing is ringing."));
        };
        let snoozed = self.store.snooze(&ringing.id, minutes)?;
        let until = snoozed.next_fire.map_or_else(String::new, |at| describe_time(at.time()));
        Ok(LocalReply::say(format!("Snoozed until {until}.")))
    }

    fn add_time(&self, duration: chrono::TimeDelta, label: Option<&str>) -> Result<LocalReply> {
        let timers = self.store.list(EventKind::Timer);
        let target = match pick(&timers, label) {
            Pick::One(timer) => timer,
            Pick::None => return Ok(LocalReply::say("You don't have a timer running.")),
            Pick::Many => return Ok(LocalReply::ask("Which timer?")),
        };
        let extended = self.store.add_time(&target.id, duration.num_seconds())?;
        let now = self.store.now();
        Ok(LocalReply::say(format!(
            "Added {}. {}.",
            describe_duration(duration),
            capitalize(&extended.describe(now))
        )))
    }

    fn cancel(&self, kind: EventKind, all: bool, label: Option<&str>) -> Result<LocalReply> {
        if all {
            let removed = self.store.cancel_all(kind)?;
            return Ok(LocalReply::say(match removed {
                0 => format!("You don't have any {}.", kind.plural()),
                1 => format!("Cancelled your {kind}."),
                n => format!("Cancelled {n} {}.", kind.plural()),
            }));
        }

        let entities = self.store.list(kind);
        match pick(&entities, label) {
            Pick::One(event) => {
                self.store.delete(&event.id)?;
                Ok(LocalReply::say(format!("Cancelled the {}.", event.spoken_name())))
            }
            Pick::None => Ok(LocalReply::say(format!("You don't have any {}.", kind.plural()))),
            Pick::Many => {
                let now = self.store.now();
                let names: Vec<String> = entities.iter().map(|e| e.describe(now)).collect();
                Ok(LocalReply::ask(format!(
                    "You have {} {}: {}. Which one?",
                    entities.len(),
                    kind.plural(),
                    names.join(", ")
                )))
            }
        }
    }

    fn list(&self, kind: EventKind) -> LocalReply {
        let now = self.store.now();
        let entities = self.store.list(kind);
        let descriptions: Vec<String> = entities.iter().map(|e| e.describe(now)).collect();
        LocalReply::say(match descriptions.as_slice() {
            [] => format!("You don't have any {}.", kind.plural()),
            [one] => format!("You have one {kind}: {one}."),
            many => format!("You have {} {}: {}.", many.len(), kind.plural(), many.join(", ")),
        })
    }

    async fn music(&self, command: MediaCommand) -> LocalReply {
        let Some(media) = &self.media else {
            return LocalReply::say("Music control isn't set up.");
        };
        let confirmation = command.confirmation();
        match media.command(command).await {
            Ok(()) => LocalReply::say(confirmation),
            Err(e) => {
                tracing::warn!(error = %e, "media command failed");
                LocalReply::say("Sorry, I couldn't reach the music player.")
            }
        }
    }
}

enum Pick<'a> {
    None,
    One(&'a ScheduleEvent),
    Many,
}

/// Choose the entity a spoken request refers to: by label, else the only one
fn pick<'a>(entities: &'a [ScheduleEvent], label: Option<&str>) -> Pick<'a> {
    if let Some(label) = label {
        let label = label.to_lowercase();
        let matched = entities.iter().find(|e| {
            e.label.as_deref().is_some_and(|l| l.to_lowercase() == label)
                || e.as_reminder().is_some_and(|r| r.message.to_lowercase().contains(&label))
        });
        if let Some(event) = matched {
            return Pick::One(event);
        }
    }
    match entities {
        [] => Pick::None,
        [one] => Pick::One(one),
        _ => Pick::Many,
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InfoConfig;
    use crate::schedule::{ManualClock, StoreSettings};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeDelta};
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullDisplay;

    impl DisplaySurface for NullDisplay {
        fn show(&self, _overlay: Overlay) {}
    }

    #[derive(Default)]
    struct FakePlayer {
        sent: Mutex<Vec<MediaCommand>>,
    }

    #[async_trait]
    impl MediaPlayer for FakePlayer {
        async fn state(&self) -> Result<crate::media::PlayerState> {
            Ok(crate::media::PlayerState::Idle)
        }

        async fn command(&self, command: MediaCommand) -> Result<()> {
            self.sent.lock().unwrap().push(command);
            Ok(())
        }
    }

    fn fixture(media: Option<Arc<dyn MediaPlayer>>) -> (Arc<ManualClock>, Arc<ScheduleStore>, ShortcutExecutor) {
        let start = NaiveDate::from_ymd_opt(2026, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(ScheduleStore::new(clock.clone(), StoreSettings::default()));
        let info = Arc::new(InfoProviders::new(InfoConfig {
            latitude: None,
            longitude: None,
            weather_url: "http://127.0.0.1:9/forecast".to_string(),
            news_url: "http://127.0.0.1:9/rss".to_string(),
            sports_url: "http://127.0.0.1:9/scores".to_string(),
            timeout: Duration::from_millis(200),
            cache_ttl: Duration::from_secs(60),
        }));
        let executor = ShortcutExecutor::new(store.clone(), info, media, Arc::new(NullDisplay));
        (clock, store, executor)
    }

    fn timer(minutes: i64, label: Option<&str>) -> Intent {
        Intent::StartTimer {
            duration: TimeDelta::minutes(minutes),
            label: label.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_timer_then_stop_while_ringing() {
        let (clock, store, executor) = fixture(None);
        let reply = executor.execute(&timer(5, None)).await;
        assert_eq!(reply.speech, "Timer set for 5 minutes.");

        clock.advance(TimeDelta::minutes(5));
        store.tick().unwrap();
        assert!(store.is_ringing());

        let reply = executor.execute(&Intent::Stop { kind: None }).await;
        assert!(reply.speech.is_empty());
        assert!(store.list(EventKind::Timer).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_asks_when_ambiguous() {
        let (_, store, executor) = fixture(None);
        executor.execute(&timer(5, Some("pasta"))).await;
        executor.execute(&timer(10, Some("eggs"))).await;

        let cancel = |label: Option<&str>| Intent::Cancel {
            kind: EventKind::Timer,
            all: false,
            label: label.map(str::to_string),
        };
        let reply = executor.execute(&cancel(None)).await;
        assert!(reply.expects_reply);

        let reply = executor.execute(&cancel(Some("eggs"))).await;
        assert_eq!(reply.speech, "Cancelled the eggs timer.");
        assert_eq!(store.list(EventKind::Timer).len(), 1);
    }

    #[tokio::test]
    async fn test_snooze_nothing_ringing() {
        let (_, _, executor) = fixture(None);
        let reply = executor.execute(&Intent::Snooze { minutes: None }).await;
        assert_eq!(reply.speech, "Nothing is ringing.");
    }

    #[tokio::test]
    async fn test_add_time_to_only_timer() {
        let (_, store, executor) = fixture(None);
        executor.execute(&timer(15, None)).await;
        let reply = executor
            .execute(&Intent::AddTime {
                duration: TimeDelta::minutes(3),
                label: None,
            })
            .await;
        assert!(reply.speech.starts_with("Added 3 minutes."));
        let timers = store.list(EventKind::Timer);
        let detail = timers[0].as_timer().unwrap();
        assert_eq!(detail.target - detail.started_at, TimeDelta::minutes(18));
    }

    #[tokio::test]
    async fn test_music_without_player() {
        let (_, _, executor) = fixture(None);
        let reply = executor.execute(&Intent::Music(MediaCommand::Pause)).await;
        assert_eq!(reply.speech, "Music control isn't set up.");

        let player = Arc::new(FakePlayer::default());
        let (_, _, executor) = fixture(Some(player.clone()));
        let reply = executor.execute(&Intent::Music(MediaCommand::Next)).await;
        assert_eq!(reply.speech, "Skipping ahead.");
        assert_eq!(*player.sent.lock().unwrap(), vec![MediaCommand::Next]);
    }

    #[tokio::test]
    async fn test_info_degrades_without_location() {
        let (_, _, executor) = fixture(None);
        let reply = executor.execute(&Intent::Info(super::super::InfoTopic::Weather)).await;
        assert_eq!(reply.speech, "Sorry, I couldn't get the weather right now.");
    }
}
