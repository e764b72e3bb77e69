//! Media player control surface
//!
//! The assistant pauses the household player while it listens, resumes it
//! afterwards, maps music shortcuts to player commands, and watches the
//! player state to raise wake-word sensitivity while music is playing.

mod home_assistant;

pub use home_assistant::HomeAssistantPlayer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Coarse state of the tracked player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Playing,
    Paused,
    Idle,
    Off,
    Unavailable,
}

impl PlayerState {
    /// Map a Home Assistant state string
    #[must_use]
    pub fn from_ha(state: &str) -> Self {
        match state {
            "playing" | "buffering" => Self::Playing,
            "paused" => Self::Paused,
            "idle" | "standby" | "on" => Self::Idle,
            "off" => Self::Off,
            _ => Self::Unavailable,
        }
    }

    #[must_use]
    pub const fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Command sent to the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCommand {
    Pause,
    Resume,
    Stop,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    /// Start playing a source (URI, playlist, or search phrase)
    Play(String),
}

impl MediaCommand {
    /// Short spoken confirmation
    #[must_use]
    pub fn confirmation(&self) -> String {
        match self {
            Self::Pause => "Paused.".to_string(),
            Self::Resume => "Resuming.".to_string(),
            Self::Stop => "Stopped.".to_string(),
            Self::Next => "Skipping ahead.".to_string(),
            Self::Previous => "Going back.".to_string(),
            Self::VolumeUp => "Turning it up.".to_string(),
            Self::VolumeDown => "Turning it down.".to_string(),
            Self::Play(source) => format!("Playing {source}."),
        }
    }
}

/// A controllable media player
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Current player state
    ///
    /// # Errors
    ///
    /// Returns error if the player cannot be reached
    async fn state(&self) -> Result<PlayerState>;

    /// Send a command
    ///
    /// # Errors
    ///
    /// Returns error if the player rejects the command or cannot be reached
    async fn command(&self, command: MediaCommand) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert!(PlayerState::from_ha("playing").is_playing());
        assert!(PlayerState::from_ha("buffering").is_playing());
        assert_eq!(PlayerState::from_ha("paused"), PlayerState::Paused);
        assert_eq!(PlayerState::from_ha("unknown"), PlayerState::Unavailable);
    }
}
