//! The wake → listen → transcribe → route → respond → speak loop
//!
//! One task owns the orchestrator. Every stage that waits (microphone,
//! network, speaker) races the store's ringing notifications: a ring aborts
//! the turn instead of queueing behind it, so the next wake word is honored
//! promptly. Network calls each run under the remote deadline and failures
//! end the turn with a short spoken apology.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::clients::{
    AssistClient, AudioSink, Captured, Clip, Exchange, Heard, LlmClient, Phrase, PhraseSource,
    SpeechClient, Tone,
};
use super::sensitivity::Sensitivity;
use super::state::{AssistRun, Metrics, PipelineEvent, ReplySource, RunOutcome};
use super::wake::{Route, WakeMatch, WakeModel, WakeRouter};
use crate::config::Config;
use crate::error::with_timeout;
use crate::media::{MediaCommand, MediaPlayer};
use crate::publisher::{Command, SyncBus};
use crate::schedule::{ScheduleStore, StoreEvent};
use crate::shortcuts::{Intent, ShortcutExecutor, ShortcutRouter};
use crate::voice::samples_to_wav;
use crate::{Error, Result};

const APOLOGY: &str = "Sorry, I'm having trouble right now.";
const REPROMPT: &str = "Sorry, I didn't catch that.";

/// Timing and bounds for a turn
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub listen_timeout: Duration,
    pub follow_up_timeout: Duration,
    pub max_follow_ups: u32,
    /// Deadline for each STT/LLM/TTS/Assist call
    pub remote_timeout: Duration,
    /// Delay before paused media resumes after a turn
    pub resume_delay: Duration,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            listen_timeout: config.voice.listen_timeout,
            follow_up_timeout: config.voice.follow_up_timeout,
            max_follow_ups: config.voice.max_follow_ups,
            remote_timeout: config.remote.timeout,
            resume_delay: config.media.resume_delay,
        }
    }
}

/// Collaborators the orchestrator drives
pub struct PipelineParts {
    pub source: Box<dyn PhraseSource>,
    pub sink: Arc<dyn AudioSink>,
    pub speech: Arc<dyn SpeechClient>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub assist: Option<Arc<dyn AssistClient>>,
    pub media: Option<Arc<dyn MediaPlayer>>,
    pub executor: ShortcutExecutor,
}

/// Remote reply normalized across routes
struct RemoteReply {
    speech: String,
    actions: Vec<serde_json::Value>,
    expects_reply: bool,
    conversation_id: Option<String>,
}

/// Network-facing collaborators, each call under the remote deadline
struct Backends {
    sink: Arc<dyn AudioSink>,
    speech: Arc<dyn SpeechClient>,
    llm: Option<Arc<dyn LlmClient>>,
    assist: Option<Arc<dyn AssistClient>>,
    timeout: Duration,
}

impl Backends {
    async fn transcribe(&self, phrase: Phrase) -> Result<String> {
        let wav = samples_to_wav(&phrase.samples, phrase.sample_rate)?;
        let text = with_timeout("stt", self.timeout, self.speech.transcribe(wav)).await?;
        tracing::debug!(transcript = %text, "transcribed");
        Ok(text)
    }

    async fn remote(
        &self,
        route: Route,
        text: &str,
        history: &[Exchange],
        conversation_id: Option<&str>,
    ) -> Result<RemoteReply> {
        match route {
            Route::Llm => {
                let llm = self
                    .llm
                    .as_ref()
                    .ok_or_else(|| Error::Llm("no LLM backend configured".to_string()))?;
                let reply = with_timeout("llm", self.timeout, llm.reply(text, history)).await?;
                Ok(RemoteReply {
                    speech: reply.response,
                    actions: reply.actions,
                    expects_reply: reply.expects_reply,
                    conversation_id: None,
                })
            }
            Route::Assist => {
                let assist = self
                    .assist
                    .as_ref()
                    .ok_or_else(|| Error::Assist("no Assist backend configured".to_string()))?;
                let reply =
                    with_timeout("assist", self.timeout, assist.converse(text, conversation_id)).await?;
                Ok(RemoteReply {
                    speech: reply.speech,
                    actions: Vec::new(),
                    expects_reply: reply.continue_conversation,
                    conversation_id: reply.conversation_id,
                })
            }
        }
    }

    async fn speak(&self, text: &str) -> Result<()> {
        let audio = with_timeout("tts", self.timeout, self.speech.synthesize(text)).await?;
        self.sink.play(Clip::Speech(audio)).await
    }
}

/// Store ringing notifications, consumed as turn interrupts
struct Interrupts {
    rx: broadcast::Receiver<StoreEvent>,
    store: Arc<ScheduleStore>,
}

impl Interrupts {
    /// Drop notifications queued before the turn; the caller rechecks ringing state
    fn clear(&mut self) {
        while let Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) = self.rx.try_recv() {}
    }

    /// Resolve on the next ring
    async fn ringing(&mut self) {
        loop {
            match self.rx.recv().await {
                Ok(StoreEvent::Ringing(event)) => {
                    tracing::info!(event_id = %event.id, kind = %event.kind(), "ringing interrupts turn");
                    return;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.store.is_ringing() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

enum Step<T> {
    Done(T),
    Interrupted,
}

async fn guarded<T>(interrupts: &mut Interrupts, fut: impl Future<Output = T>) -> Step<T> {
    tokio::select! {
        biased;
        () = interrupts.ringing() => Step::Interrupted,
        value = fut => Step::Done(value),
    }
}

/// Await a stage; a ring ends the turn as interrupted
macro_rules! guard {
    ($self:ident, $fut:expr) => {
        match guarded(&mut $self.interrupts, $fut).await {
            Step::Done(value) => value,
            Step::Interrupted => return Ok(RunOutcome::Interrupted),
        }
    };
}

/// Pauses the household player for a turn and resumes it afterwards
struct MediaHold {
    media: Option<Arc<dyn MediaPlayer>>,
    timeout: Duration,
    resume_delay: Duration,
    paused_by_us: bool,
    pending_resume: Option<JoinHandle<()>>,
}

impl MediaHold {
    async fn pause(&mut self) {
        if let Some(resume) = self.pending_resume.take() {
            if !resume.is_finished() {
                // Still paused from the previous turn
                resume.abort();
                self.paused_by_us = true;
                return;
            }
        }
        if self.paused_by_us {
            return;
        }
        let Some(media) = &self.media else {
            return;
        };

        match with_timeout("media", self.timeout, media.state()).await {
            Ok(state) if state.is_playing() => {
                match with_timeout("media", self.timeout, media.command(MediaCommand::Pause)).await {
                    Ok(()) => {
                        tracing::debug!("media paused for turn");
                        self.paused_by_us = true;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to pause media"),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "media state unavailable"),
        }
    }

    /// The user took control of playback during the turn
    const fn forget(&mut self) {
        self.paused_by_us = false;
    }

    fn release(&mut self) {
        if !self.paused_by_us {
            return;
        }
        let Some(media) = self.media.clone() else {
            return;
        };
        self.paused_by_us = false;
        let (delay, timeout) = (self.resume_delay, self.timeout);
        self.pending_resume = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match with_timeout("media", timeout, media.command(MediaCommand::Resume)).await {
                Ok(()) => tracing::debug!("media resumed"),
                Err(e) => tracing::warn!(error = %e, "failed to resume media"),
            }
        }));
    }
}

/// Publishes orchestrator telemetry on the bus
struct Telemetry {
    bus: Arc<SyncBus>,
}

impl Telemetry {
    fn stage(&self, run: &AssistRun) {
        let state = json!({
            "state": run.stage,
            "wake_word": run.wake_word,
            "route": run.route,
        });
        if let Err(e) = self.bus.publish_json("state", &state, true) {
            tracing::warn!(error = %e, "failed to publish pipeline state");
        }
        self.bus
            .publish("in_progress", run.stage.in_progress().to_string(), true);
    }

    fn finished(&self, run: &AssistRun, metrics: &Metrics) {
        let state = json!({ "state": run.stage, "last_run": run });
        let published = self
            .bus
            .publish_json("state", &state, true)
            .and_then(|()| self.bus.publish_json("metrics", metrics, true));
        if let Err(e) = published {
            tracing::warn!(error = %e, "failed to publish pipeline telemetry");
        }
        self.bus.publish("in_progress", "false".to_string(), true);
    }
}

/// Drives the voice pipeline state machine
pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    source: Box<dyn PhraseSource>,
    backends: Backends,
    executor: ShortcutExecutor,
    shortcuts: ShortcutRouter,
    wake: WakeRouter,
    sensitivity: Sensitivity,
    store: Arc<ScheduleStore>,
    interrupts: Interrupts,
    media: MediaHold,
    telemetry: Telemetry,
    metrics: Metrics,
    last_run: Option<AssistRun>,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        settings: PipelineSettings,
        wake_words: Vec<WakeModel>,
        parts: PipelineParts,
        store: Arc<ScheduleStore>,
        bus: Arc<SyncBus>,
        sensitivity: Sensitivity,
    ) -> Self {
        let interrupts = Interrupts {
            rx: store.subscribe(),
            store: Arc::clone(&store),
        };
        let media = MediaHold {
            media: parts.media,
            timeout: settings.remote_timeout,
            resume_delay: settings.resume_delay,
            paused_by_us: false,
            pending_resume: None,
        };
        Self {
            backends: Backends {
                sink: parts.sink,
                speech: parts.speech,
                llm: parts.llm,
                assist: parts.assist,
                timeout: settings.remote_timeout,
            },
            settings,
            source: parts.source,
            executor: parts.executor,
            shortcuts: ShortcutRouter::new(),
            wake: WakeRouter::new(wake_words),
            sensitivity,
            store,
            interrupts,
            media,
            telemetry: Telemetry { bus },
            metrics: Metrics::default(),
            last_run: None,
        }
    }

    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[must_use]
    pub const fn last_run(&self) -> Option<&AssistRun> {
        self.last_run.as_ref()
    }

    /// Run until `shutdown` flips or its sender is dropped
    ///
    /// # Errors
    ///
    /// Infallible today; per-turn failures are logged and the loop continues
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(wake_words = self.wake.len(), "voice pipeline started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.step() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "voice pipeline step failed");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
        self.media.release();
        tracing::info!("voice pipeline stopped");
        Ok(())
    }

    /// Handle one idle segment: a bare interrupt while ringing, a wake word, or nothing
    ///
    /// # Errors
    ///
    /// Returns microphone or transcription errors from the idle segment
    pub async fn step(&mut self) -> Result<()> {
        if self.source.listen(None).await? == Heard::Silence {
            return Ok(());
        }
        let Captured::Phrase(phrase) = self.source.capture().await? else {
            return Ok(());
        };
        let text = self.backends.transcribe(phrase).await?;
        let now = self.store.now();

        // While something rings, "stop" and "snooze" need no wake word
        if self.store.is_ringing() {
            if let Some(intent) = self.shortcuts.interrupt(&text, now) {
                let reply = self.executor.execute(&intent).await;
                if !reply.speech.is_empty() {
                    if let Err(e) = self.backends.speak(&reply.speech).await {
                        tracing::warn!(error = %e, "failed to speak interrupt reply");
                    }
                }
                return Ok(());
            }
        }

        if let Some(wake) = self.wake.detect(&text, self.sensitivity.level()) {
            self.turn(wake).await;
        }
        Ok(())
    }

    /// Run one turn from a wake detection to idle
    pub async fn turn(&mut self, wake: WakeMatch) {
        let mut run = AssistRun::new(&wake.phrase, wake.route, self.store.now());
        self.interrupts.clear();

        // Queued notifications are gone, so ask the store whether anything rings now
        let outcome = if self.store.is_ringing() {
            tracing::info!(wake_word = %wake.phrase, "ringing, turn not started");
            RunOutcome::Interrupted
        } else {
            match self.drive(&mut run, wake.trailing).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, stage = %run.stage, "turn failed");
                    run.timed_out = e.is_timeout();
                    self.apologize().await;
                    RunOutcome::Failed
                }
            }
        };

        match outcome {
            RunOutcome::Interrupted => {
                self.backends.sink.stop();
                self.source.discard();
            }
            RunOutcome::Discarded => self.source.discard(),
            RunOutcome::Completed | RunOutcome::Failed => {}
        }

        run.finish(outcome, self.store.now());
        tracing::info!(
            outcome = ?outcome,
            route = %run.route,
            follow_ups = run.follow_ups,
            latency_ms = run.latency_ms(),
            "turn finished"
        );
        self.metrics.record(&run);
        self.media.release();
        self.telemetry.finished(&run, &self.metrics);
        self.last_run = Some(run);
    }

    fn advance(&self, run: &mut AssistRun, event: PipelineEvent) -> Result<()> {
        run.advance(event, self.store.now())?;
        self.telemetry.stage(run);
        Ok(())
    }

    async fn drive(&mut self, run: &mut AssistRun, trailing: Option<String>) -> Result<RunOutcome> {
        self.advance(run, PipelineEvent::WakeWord)?;
        self.media.pause().await;

        let mut pending = trailing;
        let mut listen_for = self.settings.listen_timeout;
        let mut history: Vec<Exchange> = Vec::new();
        let mut conversation_id: Option<String> = None;

        loop {
            let text = if let Some(text) = pending.take() {
                self.advance(run, PipelineEvent::PhraseComplete)?;
                text
            } else {
                if run.follow_ups == 0 {
                    guard!(self, self.backends.sink.play(Clip::Tone(Tone::Listening)))?;
                }
                if guard!(self, self.source.listen(Some(listen_for)))? == Heard::Silence {
                    self.advance(run, PipelineEvent::Discard)?;
                    // Silence after an answered follow-up ends the conversation normally
                    return Ok(if run.follow_ups > 0 {
                        RunOutcome::Completed
                    } else {
                        RunOutcome::Discarded
                    });
                }
                self.advance(run, PipelineEvent::SpeechStarted)?;
                let Captured::Phrase(phrase) = guard!(self, self.source.capture())? else {
                    self.advance(run, PipelineEvent::Discard)?;
                    return Ok(RunOutcome::Discarded);
                };
                self.advance(run, PipelineEvent::PhraseComplete)?;
                guard!(self, self.backends.transcribe(phrase))?
            };
            self.advance(run, PipelineEvent::Transcript)?;

            let text = text.trim().to_string();
            if text.is_empty() {
                self.advance(run, PipelineEvent::Abort)?;
                guard!(self, self.backends.speak(REPROMPT))?;
                return Ok(RunOutcome::Failed);
            }
            run.transcript = Some(text.clone());

            let now = self.store.now();
            let (speech, expects_reply) = if let Some(intent) = self.shortcuts.classify(&text, now) {
                self.advance(run, PipelineEvent::LocalMatch)?;
                run.reply_source = Some(ReplySource::Local);
                let reply = guard!(self, self.executor.execute(&intent));
                match &intent {
                    Intent::Stop { .. } if reply.speech.is_empty() => {
                        self.advance(run, PipelineEvent::Abort)?;
                        return Ok(RunOutcome::Interrupted);
                    }
                    Intent::Music(_) => self.media.forget(),
                    _ => {}
                }
                run.actions.push(intent.name().to_string());
                (reply.speech, reply.expects_reply)
            } else {
                self.advance(run, PipelineEvent::NoMatch)?;
                run.reply_source = Some(ReplySource::Remote);
                let reply = guard!(
                    self,
                    self.backends
                        .remote(run.route, &text, &history, conversation_id.as_deref())
                )?;
                self.apply_actions(run, &reply.actions);
                if reply.conversation_id.is_some() {
                    conversation_id = reply.conversation_id;
                }
                (reply.speech, reply.expects_reply)
            };

            run.response = Some(speech.clone());
            history.push(Exchange {
                user: text,
                assistant: speech.clone(),
            });
            self.advance(run, PipelineEvent::Response)?;
            if !speech.trim().is_empty() {
                guard!(self, self.backends.speak(&speech))?;
            }

            let follow_up = expects_reply || speech.trim_end().ends_with('?');
            if follow_up && run.follow_ups < self.settings.max_follow_ups {
                run.follow_ups += 1;
                listen_for = self.settings.follow_up_timeout;
                self.advance(run, PipelineEvent::FollowUp)?;
                continue;
            }

            self.advance(run, PipelineEvent::Done)?;
            return Ok(RunOutcome::Completed);
        }
    }

    /// Apply LLM actions through the inbound command table
    fn apply_actions(&self, run: &mut AssistRun, actions: &[serde_json::Value]) {
        let now = self.store.now();
        for value in actions {
            let result = Command::from_value(value, now).and_then(|command| {
                let action = command.action();
                command.apply(&self.store).map(|_| action)
            });
            match result {
                Ok(action) => {
                    tracing::info!(action, "applied assistant action");
                    run.actions.push(action.to_string());
                }
                Err(e) => tracing::warn!(error = %e, action = %value, "assistant action rejected"),
            }
        }
    }

    /// Speak the apology, or play the error tone if speech is unavailable too
    async fn apologize(&self) {
        if let Err(e) = self.backends.speak(APOLOGY).await {
            tracing::debug!(error = %e, "apology speech failed, playing tone");
            if let Err(e) = self.backends.sink.play(Clip::Tone(Tone::Error)).await {
                tracing::warn!(error = %e, "failed to play error tone");
            }
        }
    }
}
