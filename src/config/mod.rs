//! Configuration management for the Hearth assistant
//!
//! Every field resolves env > toml > default.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, TimeDelta, Weekday};
use secrecy::SecretString;

use crate::pipeline::{Route, WakeModel};
use crate::schedule::parse::{parse_date, parse_weekday};
use crate::schedule::{SkipPolicy, StoreSettings};
use crate::{Error, Result};

use file::HearthConfigFile;

/// Hearth assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (persisted schedules)
    pub data_dir: PathBuf,

    /// Voice pipeline configuration
    pub voice: VoiceConfig,

    /// Speech, LLM, and Assist backends
    pub remote: RemoteConfig,

    /// Scheduler configuration
    pub schedule: ScheduleConfig,

    /// Calendar feeds
    pub calendar: CalendarConfig,

    /// Media player control
    pub media: MediaConfig,

    /// Real-time info providers
    pub info: InfoConfig,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,
}

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input
    pub enabled: bool,

    /// Wake phrases, each mapped to a route
    pub wake_words: Vec<WakeModel>,

    /// Wake match score required normally
    pub trigger_level: f32,

    /// Wake match score required while our own media plays
    pub elevated_trigger_level: f32,

    /// RMS energy that counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that ends a phrase
    pub silence: Duration,

    /// Phrases shorter than this are discarded
    pub min_phrase: Duration,

    /// Hard cap on one phrase
    pub max_phrase: Duration,

    /// Listening without speech for this long abandons the turn
    pub listen_timeout: Duration,

    /// Follow-up turns allowed without a new wake word
    pub max_follow_ups: u32,

    /// How long a follow-up waits for speech
    pub follow_up_timeout: Duration,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_words: vec![WakeModel::new("hey hearth", Route::Llm)],
            trigger_level: 0.75,
            elevated_trigger_level: 0.9,
            energy_threshold: 0.03,
            silence: Duration::from_millis(700),
            min_phrase: Duration::from_millis(300),
            max_phrase: Duration::from_secs(15),
            listen_timeout: Duration::from_secs(8),
            max_follow_ups: 3,
            follow_up_timeout: Duration::from_secs(6),
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// Remote backends
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// OpenAI-compatible base URL for speech and chat completions
    pub base_url: String,

    /// API key for `base_url`
    pub api_key: Option<SecretString>,

    /// Chat model identifier
    pub llm_model: String,

    /// System prompt for the LLM route
    pub system_prompt: String,

    /// Home Assistant base URL for the Assist route
    pub assist_url: Option<String>,

    /// Long-lived Home Assistant token
    pub assist_token: Option<SecretString>,

    /// Conversation agent to use (Home Assistant default if unset)
    pub assist_agent_id: Option<String>,

    /// Deadline for every STT/LLM/TTS/Assist call
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            assist_url: None,
            assist_token: None,
            assist_agent_id: None,
            timeout: Duration::from_secs(10),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are Hearth, a voice assistant on a kitchen display. \
Answer in one or two short spoken sentences. \
Reply with JSON: {\"response\": string, \"actions\": [command objects], \"expects_reply\": bool}.";

/// Scheduler tunables
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Ticker interval
    pub tick: Duration,

    /// Auto-stop for unattended ringing
    pub ring_timeout: TimeDelta,

    /// Snooze length when none is given
    pub default_snooze: TimeDelta,

    /// Dates on which alarms never ring
    pub skip_dates: Vec<NaiveDate>,

    /// Weekdays on which alarms never ring
    pub skip_weekdays: Vec<Weekday>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            ring_timeout: TimeDelta::minutes(10),
            default_snooze: TimeDelta::minutes(9),
            skip_dates: Vec::new(),
            skip_weekdays: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    /// Store settings derived from this config
    #[must_use]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            ring_timeout: self.ring_timeout,
            default_snooze: self.default_snooze,
            skip: SkipPolicy {
                dates: self.skip_dates.iter().copied().collect(),
                weekdays: self.skip_weekdays.clone(),
            },
        }
    }
}

/// One calendar feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarFeed {
    pub name: String,
    /// `http(s)://` or `webcal://` URL, or local file path, of an ICS document
    pub url: String,
}

/// Calendar sync configuration
#[derive(Debug, Clone)]
pub struct CalendarConfig {
    pub feeds: Vec<CalendarFeed>,

    /// Poll interval
    pub interval: Duration,

    /// Deadline for one feed fetch
    pub fetch_timeout: Duration,

    /// Minutes before start used when an event carries no alarm
    pub default_offsets_mins: Vec<i64>,

    /// Addresses that identify the device owner among attendees
    pub owner_emails: Vec<String>,

    /// Summary text marking an all-day out-of-office event
    pub out_of_office_marker: String,

    /// Drop declined events entirely instead of showing them
    pub hide_declined: bool,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(15),
            default_offsets_mins: vec![10],
            owner_emails: Vec::new(),
            out_of_office_marker: "out of office".to_string(),
            hide_declined: false,
        }
    }
}

/// Media player control configuration
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Home Assistant base URL (media control disabled if unset)
    pub url: Option<String>,

    /// Long-lived Home Assistant token
    pub token: Option<SecretString>,

    /// Media player entity to track and control
    pub entity_id: Option<String>,

    /// How often the player state is polled
    pub poll_interval: Duration,

    /// Delay before resuming paused media after speaking
    pub resume_delay: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            entity_id: None,
            poll_interval: Duration::from_secs(2),
            resume_delay: Duration::from_millis(1500),
        }
    }
}

/// Real-time info provider configuration
#[derive(Debug, Clone)]
pub struct InfoConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// Open-Meteo compatible forecast endpoint
    pub weather_url: String,

    /// RSS feed for headlines
    pub news_url: String,

    /// ESPN-style scoreboard endpoint
    pub sports_url: String,

    /// Fast deadline so failures still get a spoken reply
    pub timeout: Duration,

    /// How long a provider reply is reused
    pub cache_ttl: Duration,
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            weather_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            news_url: "https://feeds.bbci.co.uk/news/rss.xml".to_string(),
            sports_url: "https://site.api.espn.com/apis/site/v2/sports/football/nfl/scoreboard"
                .to_string(),
            timeout: Duration::from_secs(3),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Per-device topic namespace
    pub namespace: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 18790,
            namespace: "hearth".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            voice: VoiceConfig::default(),
            remote: RemoteConfig::default(),
            schedule: ScheduleConfig::default(),
            calendar: CalendarConfig::default(),
            media: MediaConfig::default(),
            info: InfoConfig::default(),
            api_server: ApiServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or unparsable
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Resolve configuration from a parsed file, overlaying environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range or unparsable
    #[allow(clippy::too_many_lines)]
    pub fn from_file(fc: HearthConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let dv = defaults.voice;

        // Voice config (env > toml > default)
        let wake_words = match std::env::var("HEARTH_WAKE_WORDS").ok() {
            Some(raw) => parse_wake_words_env(&raw)?,
            None => match fc.voice.wake_words {
                Some(words) => words
                    .into_iter()
                    .map(|w| {
                        let route = w.route.as_deref().map_or(Ok(Route::Llm), Route::from_str)?;
                        Ok(WakeModel::new(&w.phrase, route))
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => dv.wake_words,
            },
        };
        let voice = VoiceConfig {
            enabled: env_bool("HEARTH_VOICE_ENABLED")
                .or(fc.voice.enabled)
                .unwrap_or(dv.enabled),
            wake_words,
            trigger_level: env_parse("HEARTH_TRIGGER_LEVEL")
                .or(fc.voice.trigger_level)
                .unwrap_or(dv.trigger_level),
            elevated_trigger_level: env_parse("HEARTH_ELEVATED_TRIGGER_LEVEL")
                .or(fc.voice.elevated_trigger_level)
                .unwrap_or(dv.elevated_trigger_level),
            energy_threshold: fc.voice.energy_threshold.unwrap_or(dv.energy_threshold),
            silence: fc.voice.silence_ms.map_or(dv.silence, Duration::from_millis),
            min_phrase: fc.voice.min_phrase_ms.map_or(dv.min_phrase, Duration::from_millis),
            max_phrase: fc.voice.max_phrase_secs.map_or(dv.max_phrase, Duration::from_secs),
            listen_timeout: fc
                .voice
                .listen_timeout_secs
                .map_or(dv.listen_timeout, Duration::from_secs),
            max_follow_ups: fc.voice.max_follow_ups.unwrap_or(dv.max_follow_ups),
            follow_up_timeout: fc
                .voice
                .follow_up_timeout_secs
                .map_or(dv.follow_up_timeout, Duration::from_secs),
            stt_model: std::env::var("HEARTH_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or(dv.stt_model),
            tts_model: std::env::var("HEARTH_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .unwrap_or(dv.tts_model),
            tts_voice: std::env::var("HEARTH_TTS_VOICE")
                .ok()
                .or(fc.voice.tts_voice)
                .unwrap_or(dv.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(dv.tts_speed),
        };

        // Remote backends (env > toml > default)
        let dr = defaults.remote;
        let remote = RemoteConfig {
            base_url: std::env::var("HEARTH_REMOTE_URL")
                .ok()
                .or(fc.remote.base_url)
                .unwrap_or(dr.base_url),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(fc.remote.api_key)
                .map(SecretString::from),
            llm_model: std::env::var("HEARTH_LLM_MODEL")
                .ok()
                .or(fc.remote.llm_model)
                .unwrap_or(dr.llm_model),
            system_prompt: fc.remote.system_prompt.unwrap_or(dr.system_prompt),
            assist_url: std::env::var("HEARTH_ASSIST_URL").ok().or(fc.remote.assist_url),
            assist_token: std::env::var("HEARTH_ASSIST_TOKEN")
                .ok()
                .or(fc.remote.assist_token)
                .map(SecretString::from),
            assist_agent_id: fc.remote.assist_agent_id,
            timeout: env_parse("HEARTH_REMOTE_TIMEOUT_SECS")
                .or(fc.remote.timeout_secs)
                .map_or(dr.timeout, Duration::from_secs),
        };

        // Scheduler (toml > default)
        let ds = defaults.schedule;
        let schedule = ScheduleConfig {
            tick: fc.schedule.tick_ms.map_or(ds.tick, Duration::from_millis),
            ring_timeout: match fc.schedule.ring_timeout_secs {
                Some(secs) => TimeDelta::try_seconds(secs)
                    .ok_or_else(|| Error::Config(format!("schedule.ring_timeout_secs out of range: {secs}")))?,
                None => ds.ring_timeout,
            },
            default_snooze: match fc.schedule.default_snooze_mins {
                Some(mins) => TimeDelta::try_minutes(mins)
                    .ok_or_else(|| Error::Config(format!("schedule.default_snooze_mins out of range: {mins}")))?,
                None => ds.default_snooze,
            },
            skip_dates: fc
                .schedule
                .skip_dates
                .unwrap_or_default()
                .iter()
                .map(|d| parse_date(d))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| Error::Config(format!("schedule.skip_dates: {e}")))?,
            skip_weekdays: fc
                .schedule
                .skip_weekdays
                .unwrap_or_default()
                .iter()
                .map(|d| {
                    parse_weekday(d)
                        .ok_or_else(|| Error::Config(format!("schedule.skip_weekdays: unknown day {d}")))
                })
                .collect::<Result<Vec<_>>>()?,
        };

        // Calendar (env > toml > default)
        let dc = defaults.calendar;
        let feeds = match std::env::var("HEARTH_CALENDAR_FEEDS").ok() {
            Some(raw) => parse_feeds_env(&raw)?,
            None => fc
                .calendar
                .feeds
                .unwrap_or_default()
                .into_iter()
                .map(|f| CalendarFeed {
                    name: f.name,
                    url: f.url,
                })
                .collect(),
        };
        let calendar = CalendarConfig {
            feeds,
            interval: fc
                .calendar
                .interval_secs
                .map_or(dc.interval, Duration::from_secs),
            fetch_timeout: fc
                .calendar
                .fetch_timeout_secs
                .map_or(dc.fetch_timeout, Duration::from_secs),
            default_offsets_mins: fc
                .calendar
                .default_offsets_mins
                .unwrap_or(dc.default_offsets_mins),
            owner_emails: env_list("HEARTH_OWNER_EMAILS")
                .or(fc.calendar.owner_emails)
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            out_of_office_marker: fc
                .calendar
                .out_of_office_marker
                .unwrap_or(dc.out_of_office_marker)
                .to_lowercase(),
            hide_declined: fc.calendar.hide_declined.unwrap_or(dc.hide_declined),
        };

        // Media player (env > toml > default)
        let dm = defaults.media;
        let media = MediaConfig {
            url: std::env::var("HEARTH_MEDIA_URL").ok().or(fc.media.url),
            token: std::env::var("HEARTH_MEDIA_TOKEN")
                .ok()
                .or(fc.media.token)
                .map(SecretString::from),
            entity_id: std::env::var("HEARTH_MEDIA_ENTITY").ok().or(fc.media.entity_id),
            poll_interval: fc.media.poll_secs.map_or(dm.poll_interval, Duration::from_secs),
            resume_delay: fc
                .media
                .resume_delay_ms
                .map_or(dm.resume_delay, Duration::from_millis),
        };

        // Info providers (env > toml > default)
        let di = defaults.info;
        let info = InfoConfig {
            latitude: env_parse("HEARTH_LATITUDE").or(fc.info.latitude),
            longitude: env_parse("HEARTH_LONGITUDE").or(fc.info.longitude),
            weather_url: fc.info.weather_url.unwrap_or(di.weather_url),
            news_url: std::env::var("HEARTH_NEWS_URL")
                .ok()
                .or(fc.info.news_url)
                .unwrap_or(di.news_url),
            sports_url: std::env::var("HEARTH_SPORTS_URL")
                .ok()
                .or(fc.info.sports_url)
                .unwrap_or(di.sports_url),
            timeout: fc.info.timeout_secs.map_or(di.timeout, Duration::from_secs),
            cache_ttl: fc.info.cache_ttl_secs.map_or(di.cache_ttl, Duration::from_secs),
        };

        // API server config (env > toml > default)
        let api_server = ApiServerConfig {
            port: std::env::var("HEARTH_API_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(defaults.api_server.port),
            namespace: std::env::var("HEARTH_NAMESPACE")
                .ok()
                .or(fc.server.namespace)
                .unwrap_or(defaults.api_server.namespace),
        };

        // Determine data directory (~/.local/share/hearth on Linux)
        let data_dir = std::env::var("HEARTH_DATA_DIR")
            .ok()
            .or(fc.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);

        let config = Self {
            data_dir,
            voice,
            remote,
            schedule,
            calendar,
            media,
            info,
            api_server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field
    pub fn validate(&self) -> Result<()> {
        for (name, level) in [
            ("trigger_level", self.voice.trigger_level),
            ("elevated_trigger_level", self.voice.elevated_trigger_level),
        ] {
            if !(0.0..=1.0).contains(&level) {
                return Err(Error::Config(format!("voice.{name} must be within 0.0..=1.0")));
            }
        }
        if self.voice.elevated_trigger_level < self.voice.trigger_level {
            return Err(Error::Config(
                "voice.elevated_trigger_level must not be below voice.trigger_level".to_string(),
            ));
        }
        if self.voice.wake_words.is_empty() {
            return Err(Error::Config("voice.wake_words must not be empty".to_string()));
        }
        if self
            .voice
            .wake_words
            .iter()
            .any(|w| w.route == Route::Assist)
            && self.remote.assist_url.is_none()
        {
            return Err(Error::Config(
                "an assist wake word requires remote.assist_url".to_string(),
            ));
        }
        if self.schedule.tick.is_zero() {
            return Err(Error::Config("schedule.tick_ms must be positive".to_string()));
        }
        if self.api_server.namespace.trim().is_empty() || self.api_server.namespace.contains('#') {
            return Err(Error::Config("server.namespace is invalid".to_string()));
        }
        Ok(())
    }

    /// Path of the persisted schedule file
    #[must_use]
    pub fn schedules_path(&self) -> PathBuf {
        self.data_dir.join("schedules.json")
    }
}

/// Default data directory: `~/.local/share/hearth`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/hearth"),
        |d| d.data_dir().join("hearth"),
    )
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    })
}

/// `hey hearth=llm,okay house=assist`
fn parse_wake_words_env(raw: &str) -> Result<Vec<WakeModel>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((phrase, route)) => Ok(WakeModel::new(phrase, Route::from_str(route)?)),
            None => Ok(WakeModel::new(entry, Route::Llm)),
        })
        .collect()
}

/// `work=https://…/work.ics,family=/srv/family.ics`
fn parse_feeds_env(raw: &str) -> Result<Vec<CalendarFeed>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (name, url) = entry
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("calendar feed needs name=url: {entry}")))?;
            Ok(CalendarFeed {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect()
}
