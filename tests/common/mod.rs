//! Shared test fixtures
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use hearth::Result;
use hearth::config::InfoConfig;
use hearth::pipeline::{
    AudioSink, Captured, Clip, Exchange, Heard, LlmClient, LlmReply, Phrase, PhraseSource,
    SpeechClient, Tone,
};
use hearth::media::{MediaCommand, MediaPlayer, PlayerState};
use hearth::publisher::{DisplaySurface, Overlay};
use hearth::schedule::{ManualClock, ScheduleStore, StoreSettings};
use hearth::shortcuts::{InfoProviders, ShortcutExecutor};

/// Tuesday 2026-03-03 09:00
pub fn start() -> NaiveDateTime {
    at(2026, 3, 3, 9, 0)
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("valid date")
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}

/// Store on a manual clock starting at [`start`]
pub fn store() -> (Arc<ManualClock>, Arc<ScheduleStore>) {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(ScheduleStore::new(clock.clone(), StoreSettings::default()));
    (clock, store)
}

/// Display that remembers every overlay
#[derive(Default)]
pub struct RecordingDisplay {
    pub shown: Mutex<Vec<Overlay>>,
}

impl DisplaySurface for RecordingDisplay {
    fn show(&self, overlay: Overlay) {
        self.shown.lock().unwrap().push(overlay);
    }
}

pub fn executor(store: &Arc<ScheduleStore>) -> ShortcutExecutor {
    ShortcutExecutor::new(
        Arc::clone(store),
        Arc::new(InfoProviders::new(InfoConfig::default())),
        None,
        Arc::new(RecordingDisplay::default()),
    )
}

/// Phrase source that replays a script, then waits forever
#[derive(Default)]
pub struct ScriptedSource {
    pub heard: VecDeque<Heard>,
}

impl ScriptedSource {
    pub fn speech(count: usize) -> Self {
        Self {
            heard: std::iter::repeat_n(Heard::Speech, count).collect(),
        }
    }
}

#[async_trait]
impl PhraseSource for ScriptedSource {
    async fn listen(&mut self, within: Option<Duration>) -> Result<Heard> {
        match (self.heard.pop_front(), within) {
            (Some(heard), _) => Ok(heard),
            (None, Some(_)) => Ok(Heard::Silence),
            (None, None) => std::future::pending().await,
        }
    }

    async fn capture(&mut self) -> Result<Captured> {
        Ok(Captured::Phrase(Phrase {
            samples: vec![0.1; 1600],
            sample_rate: 16_000,
        }))
    }

    fn discard(&mut self) {}
}

/// Speech client returning scripted transcripts; "synthesizes" text as bytes
pub struct ScriptedSpeech {
    pub transcripts: Mutex<VecDeque<String>>,
}

impl ScriptedSpeech {
    pub fn new(transcripts: &[&str]) -> Self {
        Self {
            transcripts: Mutex::new(transcripts.iter().map(|t| (*t).to_string()).collect()),
        }
    }
}

#[async_trait]
impl SpeechClient for ScriptedSpeech {
    async fn transcribe(&self, _wav: Vec<u8>) -> Result<String> {
        Ok(self.transcripts.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }
}

/// Sink that records spoken text and tones, taking `speech_delay` per spoken clip
#[derive(Default)]
pub struct RecordingSink {
    pub spoken: Mutex<Vec<String>>,
    pub tones: Mutex<Vec<Tone>>,
    pub speech_delay: Duration,
    pub stopped: AtomicBool,
}

impl RecordingSink {
    pub fn slow(speech_delay: Duration) -> Self {
        Self {
            speech_delay,
            ..Self::default()
        }
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn alarm_tones(&self) -> usize {
        self.tones.lock().unwrap().iter().filter(|t| **t == Tone::Alarm).count()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, clip: Clip) -> Result<()> {
        match clip {
            Clip::Speech(bytes) => {
                self.spoken
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&bytes).into_owned());
                tokio::time::sleep(self.speech_delay).await;
            }
            Clip::Tone(tone) => self.tones.lock().unwrap().push(tone),
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Player that records commands and tracks play/pause state
pub struct ScriptedPlayer {
    pub state: Mutex<PlayerState>,
    pub commands: Mutex<Vec<MediaCommand>>,
}

impl ScriptedPlayer {
    pub fn new(state: PlayerState) -> Self {
        Self {
            state: Mutex::new(state),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<MediaCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaPlayer for ScriptedPlayer {
    async fn state(&self) -> Result<PlayerState> {
        Ok(*self.state.lock().unwrap())
    }

    async fn command(&self, command: MediaCommand) -> Result<()> {
        let next = match &command {
            MediaCommand::Pause => Some(PlayerState::Paused),
            MediaCommand::Resume | MediaCommand::Play(_) => Some(PlayerState::Playing),
            MediaCommand::Stop => Some(PlayerState::Idle),
            _ => None,
        };
        if let Some(next) = next {
            *self.state.lock().unwrap() = next;
        }
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

/// LLM that always gives the same reply
pub struct CannedLlm(pub LlmReply);

impl CannedLlm {
    pub fn says(response: &str) -> Self {
        Self(LlmReply {
            response: response.to_string(),
            ..LlmReply::default()
        })
    }
}

#[async_trait]
impl LlmClient for CannedLlm {
    async fn reply(&self, _prompt: &str, _history: &[Exchange]) -> Result<LlmReply> {
        Ok(self.0.clone())
    }
}

/// Poll `condition` until it holds, failing after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
