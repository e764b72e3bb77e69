//! Real-time info providers: weather, news, sports
//!
//! Each provider is called directly with a short deadline. Failures never
//! propagate: the caller always gets something to say, either the answer or
//! a short degraded reply. Successful answers are cached for a few minutes.

use std::sync::LazyLock;

use mini_moka::sync::Cache;
use regex::Regex;
use serde::Deserialize;

use crate::config::InfoConfig;
use crate::error::with_timeout;
use crate::{Error, Result};

static RSS_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<item\b.*?<title>(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?</title>").expect("valid regex")
});

const HEADLINES: usize = 3;
const GAMES: usize = 3;

/// Kind of real-time info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoTopic {
    Weather,
    News,
    Sports,
}

impl InfoTopic {
    const fn noun(self) -> &'static str {
        match self {
            Self::Weather => "the weather",
            Self::News => "the news",
            Self::Sports => "the scores",
        }
    }
}

/// Spoken answer plus an optional card for the display
#[derive(Debug, Clone, PartialEq)]
pub struct InfoAnswer {
    pub speech: String,
    pub title: String,
    pub lines: Vec<String>,
    /// Provider failed and this is the fallback reply
    pub degraded: bool,
}

impl InfoAnswer {
    fn degraded(topic: InfoTopic) -> Self {
        Self {
            speech: format!("Sorry, I couldn't get {} right now.", topic.noun()),
            title: String::new(),
            lines: Vec::new(),
            degraded: true,
        }
    }
}

/// Calls the configured providers and caches their answers
pub struct InfoProviders {
    client: reqwest::Client,
    config: InfoConfig,
    cache: Cache<InfoTopic, InfoAnswer>,
}

impl InfoProviders {
    #[must_use]
    pub fn new(config: InfoConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            client: reqwest::Client::new(),
            config,
            cache,
        }
    }

    /// Answer a topic; never fails
    pub async fn answer(&self, topic: InfoTopic) -> InfoAnswer {
        if let Some(cached) = self.cache.get(&topic) {
            tracing::debug!(?topic, "info answer from cache");
            return cached;
        }

        let result = with_timeout("info", self.config.timeout, self.fetch(topic)).await;
        match result {
            Ok(answer) => {
                self.cache.insert(topic, answer.clone());
                answer
            }
            Err(e) => {
                tracing::warn!(?topic, error = %e, "info provider failed");
                InfoAnswer::degraded(topic)
            }
        }
    }

    async fn fetch(&self, topic: InfoTopic) -> Result<InfoAnswer> {
        match topic {
            InfoTopic::Weather => self.weather().await,
            InfoTopic::News => self.news().await,
            InfoTopic::Sports => self.sports().await,
        }
    }

    async fn get(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Provider(format!("provider returned {}", response.status())));
        }
        Ok(response)
    }

    async fn weather(&self) -> Result<InfoAnswer> {
        let (Some(lat), Some(lon)) = (self.config.latitude, self.config.longitude) else {
            return Err(Error::Provider("weather location not configured".to_string()));
        };

        let request = self.client.get(&self.config.weather_url).query(&[
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("current", "temperature_2m,weather_code".to_string()),
            ("daily", "temperature_2m_max,temperature_2m_min".to_string()),
            ("timezone", "auto".to_string()),
            ("forecast_days", "1".to_string()),
        ]);
        let forecast: Forecast = self.get(request).await?.json().await?;
        Ok(describe_forecast(&forecast))
    }

    async fn news(&self) -> Result<InfoAnswer> {
        let body = self.get(self.client.get(&self.config.news_url)).await?.text().await?;
        let titles = rss_titles(&body, HEADLINES);
        if titles.is_empty() {
            return Err(Error::Provider("feed has no headlines".to_string()));
        }
        Ok(InfoAnswer {
            speech: format!("Here are the headlines. {}", titles.join(". ")),
            title: "Headlines".to_string(),
            lines: titles,
            degraded: false,
        })
    }

    async fn sports(&self) -> Result<InfoAnswer> {
        let board: Scoreboard = self
            .get(self.client.get(&self.config.sports_url))
            .await?
            .json()
            .await?;
        Ok(describe_scoreboard(&board))
    }
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current: CurrentWeather,
    #[serde(default)]
    daily: Option<DailyWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    weather_code: u32,
}

#[derive(Debug, Deserialize)]
struct DailyWeather {
    #[serde(default)]
    temperature_2m_max: Vec<f64>,
    #[serde(default)]
    temperature_2m_min: Vec<f64>,
}

fn describe_forecast(forecast: &Forecast) -> InfoAnswer {
    let now = &forecast.current;
    let condition = weather_condition(now.weather_code);
    let mut speech = format!("It's {:.0} degrees and {condition}.", now.temperature_2m);
    let mut lines = vec![format!("{:.0}° {condition}", now.temperature_2m)];

    let range = forecast.daily.as_ref().and_then(|d| {
        Some((*d.temperature_2m_max.first()?, *d.temperature_2m_min.first()?))
    });
    if let Some((high, low)) = range {
        speech.push_str(&format!(" Today's high is {high:.0}, low {low:.0}."));
        lines.push(format!("High {high:.0}° / Low {low:.0}°"));
    }

    InfoAnswer {
        speech,
        title: "Weather".to_string(),
        lines,
        degraded: false,
    }
}

/// WMO weather interpretation codes
const fn weather_condition(code: u32) -> &'static str {
    match code {
        0 => "clear",
        1 | 2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "foggy",
        51..=57 => "drizzly",
        61..=67 | 80..=82 => "raining",
        71..=77 | 85 | 86 => "snowing",
        95..=99 => "stormy",
        _ => "unsettled",
    }
}

fn rss_titles(body: &str, limit: usize) -> Vec<String> {
    RSS_TITLE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape_xml(m.as_str().trim()))
        .filter(|t| !t.is_empty())
        .take(limit)
        .collect()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(default)]
    events: Vec<SportsEvent>,
}

#[derive(Debug, Deserialize)]
struct SportsEvent {
    #[serde(default)]
    competitions: Vec<Competition>,
    #[serde(default)]
    status: Option<EventStatus>,
}

#[derive(Debug, Deserialize)]
struct Competition {
    #[serde(default)]
    competitors: Vec<Competitor>,
}

#[derive(Debug, Deserialize)]
struct Competitor {
    team: Team,
    #[serde(default)]
    score: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Team {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct EventStatus {
    #[serde(rename = "type")]
    kind: StatusType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusType {
    #[serde(default)]
    short_detail: String,
}

fn describe_scoreboard(board: &Scoreboard) -> InfoAnswer {
    let lines: Vec<String> = board
        .events
        .iter()
        .filter_map(|event| {
            let competition = event.competitions.first()?;
            let [a, b] = competition.competitors.as_slice() else {
                return None;
            };
            let detail = event
                .status
                .as_ref()
                .map(|s| s.kind.short_detail.as_str())
                .unwrap_or_default();
            let score = |c: &Competitor| c.score.clone().unwrap_or_else(|| "0".to_string());
            Some(
                format!(
                    "{} {}, {} {} {detail}",
                    a.team.display_name,
                    score(a),
                    b.team.display_name,
                    score(b)
                )
                .trim_end()
                .to_string(),
            )
        })
        .take(GAMES)
        .collect();

    let speech = if lines.is_empty() {
        "There are no games on the scoreboard right now.".to_string()
    } else {
        format!("{}.", lines.join(". "))
    };

    InfoAnswer {
        speech,
        title: "Scores".to_string(),
        lines,
        degraded: false,
    }
}
