//! Turn state machine, run records and counters

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::wake::Route;
use crate::{Error, Result};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Listening,
    Capturing,
    Transcribing,
    Routing,
    LocalReply,
    RemoteReply,
    Speaking,
}

/// Input to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    WakeWord,
    SpeechStarted,
    PhraseComplete,
    Transcript,
    LocalMatch,
    NoMatch,
    Response,
    Done,
    FollowUp,
    /// No speech, or a phrase too short to use
    Discard,
    /// Stop phrase, ringing interrupt, or failure
    Abort,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl PipelineState {
    /// Apply an event
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when `event` is not accepted in this state
    pub fn next(self, event: PipelineEvent) -> Result<Self> {
        use PipelineEvent as E;
        use PipelineState as S;

        let next = match (self, event) {
            (_, E::Abort) => S::Idle,
            (S::Idle, E::WakeWord) => S::Listening,
            (S::Listening, E::SpeechStarted) => S::Capturing,
            // A command spoken with the wake phrase skips capture
            (S::Listening | S::Capturing, E::PhraseComplete) => S::Transcribing,
            (S::Listening | S::Capturing, E::Discard) => S::Idle,
            (S::Transcribing, E::Transcript) => S::Routing,
            (S::Routing, E::LocalMatch) => S::LocalReply,
            (S::Routing, E::NoMatch) => S::RemoteReply,
            (S::LocalReply | S::RemoteReply, E::Response) => S::Speaking,
            (S::Speaking, E::Done) => S::Idle,
            (S::Speaking, E::FollowUp) => S::Listening,
            (from, event) => {
                return Err(Error::InvalidTransition {
                    from: from.to_string(),
                    event: event.to_string(),
                });
            }
        };
        Ok(next)
    }

    /// Whether a turn is underway
    #[must_use]
    pub const fn in_progress(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Stop phrase or ringing interrupt
    Interrupted,
    /// Upstream error, timeout, or empty transcript
    Failed,
    /// No usable speech after the wake word
    Discarded,
}

/// Where the reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Local,
    Remote,
}

/// Timestamp of a stage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageMark {
    pub stage: PipelineState,
    pub at: NaiveDateTime,
}

/// One wake-to-idle turn, including follow-ups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistRun {
    pub wake_word: String,
    pub route: Route,
    pub stage: PipelineState,
    pub stages: Vec<StageMark>,
    pub transcript: Option<String>,
    pub response: Option<String>,
    pub reply_source: Option<ReplySource>,
    /// Schedule actions applied on behalf of this run
    pub actions: Vec<String>,
    pub follow_ups: u32,
    pub outcome: Option<RunOutcome>,
    pub timed_out: bool,
}

impl AssistRun {
    #[must_use]
    pub fn new(wake_word: &str, route: Route, at: NaiveDateTime) -> Self {
        Self {
            wake_word: wake_word.to_string(),
            route,
            stage: PipelineState::Idle,
            stages: vec![StageMark {
                stage: PipelineState::Idle,
                at,
            }],
            transcript: None,
            response: None,
            reply_source: None,
            actions: Vec::new(),
            follow_ups: 0,
            outcome: None,
            timed_out: false,
        }
    }

    /// Advance the run's stage
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the event does not apply to the current stage
    pub fn advance(&mut self, event: PipelineEvent, at: NaiveDateTime) -> Result<PipelineState> {
        let next = self.stage.next(event)?;
        tracing::debug!(from = %self.stage, to = %next, %event, "pipeline transition");
        self.stage = next;
        self.stages.push(StageMark { stage: next, at });
        Ok(next)
    }

    /// Close the run with an outcome and return to idle
    pub fn finish(&mut self, outcome: RunOutcome, at: NaiveDateTime) {
        if self.stage != PipelineState::Idle {
            self.stage = PipelineState::Idle;
            self.stages.push(StageMark {
                stage: PipelineState::Idle,
                at,
            });
        }
        self.outcome = Some(outcome);
    }

    /// Wall time from wake to the last stage change, in milliseconds
    #[must_use]
    pub fn latency_ms(&self) -> i64 {
        match (self.stages.first(), self.stages.last()) {
            (Some(first), Some(last)) => (last.at - first.at).num_milliseconds(),
            _ => 0,
        }
    }
}

/// Orchestrator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub turns: u64,
    pub completed: u64,
    pub interrupted: u64,
    pub failed: u64,
    pub discarded: u64,
    pub timeouts: u64,
    pub local_replies: u64,
    pub remote_replies: u64,
    pub follow_ups: u64,
    pub last_latency_ms: i64,
}

impl Metrics {
    /// Fold a finished run into the counters
    pub fn record(&mut self, run: &AssistRun) {
        self.turns += 1;
        match run.outcome {
            Some(RunOutcome::Completed) => self.completed += 1,
            Some(RunOutcome::Interrupted) => self.interrupted += 1,
            Some(RunOutcome::Failed) => self.failed += 1,
            Some(RunOutcome::Discarded) => self.discarded += 1,
            None => {}
        }
        if run.timed_out {
            self.timeouts += 1;
        }
        match run.reply_source {
            Some(ReplySource::Local) => self.local_replies += 1,
            Some(ReplySource::Remote) => self.remote_replies += 1,
            None => {}
        }
        self.follow_ups += u64::from(run.follow_ups);
        self.last_latency_ms = run.latency_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, secs)
            .unwrap()
    }

    #[test]
    fn test_happy_path() {
        use PipelineEvent as E;
        let mut state = PipelineState::Idle;
        for event in [
            E::WakeWord,
            E::SpeechStarted,
            E::PhraseComplete,
            E::Transcript,
            E::NoMatch,
            E::Response,
            E::Done,
        ] {
            state = state.next(event).unwrap();
        }
        assert_eq!(state, PipelineState::Idle);
    }

    #[test]
    fn test_invalid_transition() {
        let err = PipelineState::Idle.next(PipelineEvent::Response).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(PipelineState::Routing.next(PipelineEvent::Discard).is_err());
    }

    #[test]
    fn test_abort_from_anywhere() {
        for state in [
            PipelineState::Listening,
            PipelineState::Transcribing,
            PipelineState::RemoteReply,
            PipelineState::Speaking,
        ] {
            assert_eq!(state.next(PipelineEvent::Abort).unwrap(), PipelineState::Idle);
        }
    }

    #[test]
    fn test_follow_up_returns_to_listening() {
        assert_eq!(
            PipelineState::Speaking.next(PipelineEvent::FollowUp).unwrap(),
            PipelineState::Listening
        );
    }

    #[test]
    fn test_metrics_record_interrupted() {
        let mut run = AssistRun::new("hey hearth", Route::Llm, at(0));
        run.advance(PipelineEvent::WakeWord, at(0)).unwrap();
        run.advance(PipelineEvent::PhraseComplete, at(1)).unwrap();
        run.finish(RunOutcome::Interrupted, at(3));

        let mut metrics = Metrics::default();
        metrics.record(&run);
        assert_eq!(metrics.turns, 1);
        assert_eq!(metrics.interrupted, 1);
        assert_eq!(metrics.completed, 0);
        assert_eq!(metrics.last_latency_ms, 3000);
    }
}
