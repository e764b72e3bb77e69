//! TOML configuration file loading
//!
//! Supports `~/.config/hearth/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HearthConfigFile {
    /// Data directory override
    #[serde(default)]
    pub data_dir: Option<String>,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub remote: RemoteFileConfig,

    #[serde(default)]
    pub schedule: ScheduleFileConfig,

    #[serde(default)]
    pub calendar: CalendarFileConfig,

    #[serde(default)]
    pub media: MediaFileConfig,

    #[serde(default)]
    pub info: InfoFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Voice pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable the voice pipeline
    pub enabled: Option<bool>,

    /// Wake phrases and the route each one selects
    pub wake_words: Option<Vec<WakeWordFileConfig>>,

    /// Wake match score required normally (0.0 to 1.0)
    pub trigger_level: Option<f32>,

    /// Wake match score required while our own media is playing
    pub elevated_trigger_level: Option<f32>,

    /// RMS energy that counts as speech
    pub energy_threshold: Option<f32>,

    pub silence_ms: Option<u64>,
    pub min_phrase_ms: Option<u64>,
    pub max_phrase_secs: Option<u64>,
    pub listen_timeout_secs: Option<u64>,
    pub max_follow_ups: Option<u32>,
    pub follow_up_timeout_secs: Option<u64>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,
}

/// One wake phrase
#[derive(Debug, Deserialize)]
pub struct WakeWordFileConfig {
    pub phrase: String,
    /// "llm" or "assist"
    #[serde(default)]
    pub route: Option<String>,
}

/// Remote backends (speech, LLM, Assist)
#[derive(Debug, Default, Deserialize)]
pub struct RemoteFileConfig {
    /// OpenAI-compatible base URL for speech and chat
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub llm_model: Option<String>,
    pub system_prompt: Option<String>,
    /// Home Assistant base URL for the Assist pipeline
    pub assist_url: Option<String>,
    pub assist_token: Option<String>,
    pub assist_agent_id: Option<String>,
    /// Deadline for every STT/LLM/TTS/Assist call
    pub timeout_secs: Option<u64>,
}

/// Scheduler tunables
#[derive(Debug, Default, Deserialize)]
pub struct ScheduleFileConfig {
    pub tick_ms: Option<u64>,
    pub ring_timeout_secs: Option<i64>,
    pub default_snooze_mins: Option<i64>,
    /// ISO dates on which alarms never ring
    pub skip_dates: Option<Vec<String>>,
    /// Weekday names on which alarms never ring
    pub skip_weekdays: Option<Vec<String>>,
}

/// Calendar feeds
#[derive(Debug, Default, Deserialize)]
pub struct CalendarFileConfig {
    pub feeds: Option<Vec<CalendarFeedFileConfig>>,
    pub interval_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    /// Minutes before start used when an event carries no alarm
    pub default_offsets_mins: Option<Vec<i64>>,
    pub owner_emails: Option<Vec<String>>,
    pub out_of_office_marker: Option<String>,
    pub hide_declined: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarFeedFileConfig {
    pub name: String,
    pub url: String,
}

/// Media player control surface
#[derive(Debug, Default, Deserialize)]
pub struct MediaFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub entity_id: Option<String>,
    pub poll_secs: Option<u64>,
    pub resume_delay_ms: Option<u64>,
}

/// Real-time info providers
#[derive(Debug, Default, Deserialize)]
pub struct InfoFileConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub weather_url: Option<String>,
    pub news_url: Option<String>,
    pub sports_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
}

/// HTTP/WebSocket server
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    /// Per-device topic namespace
    pub namespace: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HearthConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HearthConfigFile {
    match config_file_path() {
        Some(path) => load_config_file_from(&path),
        None => HearthConfigFile::default(),
    }
}

/// Load a TOML config file from an explicit path
pub fn load_config_file_from(path: &Path) -> HearthConfigFile {
    if !path.exists() {
        return HearthConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HearthConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HearthConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hearth/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hearth").join("config.toml"))
}
