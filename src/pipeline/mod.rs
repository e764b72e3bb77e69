//! Voice pipeline
//!
//! The orchestrator owns the turn state machine and talks to the outside
//! world only through the collaborator traits in [`clients`]. Wake phrases
//! map to routes through an ordered table; trigger sensitivity is shared
//! state maintained by a media poller. The [`Ringer`] makes ringing entities
//! audible.

pub mod clients;
mod orchestrator;
mod ringer;
mod sensitivity;
mod state;
mod wake;

pub use clients::{
    AssistClient, AssistReply, AudioSink, Captured, Clip, Exchange, Heard, LlmClient, LlmReply,
    Phrase, PhraseSource, SpeechClient, Tone,
};
pub use orchestrator::{PipelineOrchestrator, PipelineParts, PipelineSettings};
pub use ringer::{Ringer, TONE_GAP};
pub use sensitivity::Sensitivity;
pub use state::{AssistRun, Metrics, PipelineEvent, PipelineState, ReplySource, RunOutcome, StageMark};
pub use wake::{Route, WakeMatch, WakeModel, WakeRouter};
