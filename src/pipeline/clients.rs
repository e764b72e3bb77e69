//! Collaborator seams for the orchestrator
//!
//! Each external interaction is a plain async call returning `Result`; the
//! orchestrator puts its own deadline around every one of them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// A captured speech segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Phrase {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Phrase {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Result of waiting for speech onset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heard {
    Speech,
    /// The wait expired without speech
    Silence,
}

/// Result of capturing after speech onset
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Phrase(Phrase),
    /// Speech ended before the minimum phrase length
    TooShort,
}

/// Segmented microphone input
#[async_trait]
pub trait PhraseSource: Send {
    /// Wait for speech onset, up to `within` (forever when `None`)
    async fn listen(&mut self, within: Option<std::time::Duration>) -> Result<Heard>;

    /// Capture until trailing silence or the phrase length cap
    async fn capture(&mut self) -> Result<Captured>;

    /// Drop any partially captured audio
    fn discard(&mut self);
}

/// Something the speaker can play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clip {
    /// Encoded speech (MP3)
    Speech(Vec<u8>),
    /// Locally generated earcon
    Tone(Tone),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Wake acknowledged
    Listening,
    /// Nothing could be spoken
    Error,
    /// Something is ringing; repeated until acknowledged
    Alarm,
}

/// Speaker output
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play a clip to completion
    async fn play(&self, clip: Clip) -> Result<()>;

    /// Cut off whatever is playing
    fn stop(&self);
}

/// Speech recognition and synthesis
#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Transcribe WAV bytes
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;

    /// Synthesize text to MP3 bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// One prior exchange, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Structured LLM reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmReply {
    pub response: String,
    /// Command objects in the inbound-command shape
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub expects_reply: bool,
}

/// Prompt in, `{response, actions[]}` out
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn reply(&self, prompt: &str, history: &[Exchange]) -> Result<LlmReply>;
}

/// Reply from the Assist conversation pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistReply {
    pub speech: String,
    pub conversation_id: Option<String>,
    pub continue_conversation: bool,
}

/// Home Assistant Assist conversation
#[async_trait]
pub trait AssistClient: Send + Sync {
    async fn converse(&self, text: &str, conversation_id: Option<&str>) -> Result<AssistReply>;
}
