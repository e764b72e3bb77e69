//! Wake phrase matching and per-model routing
//!
//! Speech segments are transcribed and compared against each configured wake
//! phrase. The match score is a normalized edit-distance similarity over a
//! word window, so "hey heart" still wakes a "hey hearth" model. Whatever
//! follows the phrase in the same segment is kept as the command.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// How far into a segment the wake phrase may start (in words)
const MAX_LEAD_WORDS: usize = 2;

/// Backend a wake phrase sends its turn to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Local pipeline: shortcuts, then the LLM
    Llm,
    /// Home Assistant Assist conversation pipeline
    Assist,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Llm => "llm",
            Self::Assist => "assist",
        })
    }
}

impl FromStr for Route {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" | "local" => Ok(Self::Llm),
            "assist" | "remote" => Ok(Self::Assist),
            other => Err(Error::Config(format!("unknown route: {other}"))),
        }
    }
}

/// A wake phrase and the route it selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeModel {
    pub phrase: String,
    pub route: Route,
}

impl WakeModel {
    #[must_use]
    pub fn new(phrase: &str, route: Route) -> Self {
        Self {
            phrase: normalize(phrase),
            route,
        }
    }
}

/// A detected wake phrase
#[derive(Debug, Clone, PartialEq)]
pub struct WakeMatch {
    pub phrase: String,
    pub route: Route,
    pub score: f32,
    /// Command spoken in the same breath, if any
    pub trailing: Option<String>,
}

/// Ordered wake phrase table
#[derive(Debug, Clone)]
pub struct WakeRouter {
    models: Vec<WakeModel>,
}

impl WakeRouter {
    #[must_use]
    pub const fn new(models: Vec<WakeModel>) -> Self {
        Self { models }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Best-scoring model at or above `trigger_level`
    #[must_use]
    pub fn detect(&self, transcript: &str, trigger_level: f32) -> Option<WakeMatch> {
        let text = normalize(transcript);
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }

        let mut best: Option<WakeMatch> = None;
        for model in &self.models {
            let Some((score, end)) = best_window(&model.phrase, &words) else {
                continue;
            };
            tracing::trace!(phrase = %model.phrase, score, "wake score");
            if score < trigger_level || best.as_ref().is_some_and(|b| b.score >= score) {
                continue;
            }
            let trailing = words[end..].join(" ");
            best = Some(WakeMatch {
                phrase: model.phrase.clone(),
                route: model.route,
                score,
                trailing: Some(trailing).filter(|t| !t.is_empty()),
            });
        }

        if let Some(m) = &best {
            tracing::info!(phrase = %m.phrase, route = %m.route, score = m.score, "wake word detected");
        }
        best
    }
}

/// Highest similarity of `phrase` against word windows near the start, with the window end
fn best_window(phrase: &str, words: &[&str]) -> Option<(f32, usize)> {
    let len = phrase.split_whitespace().count().max(1);
    let mut best: Option<(f32, usize)> = None;
    for start in 0..=MAX_LEAD_WORDS {
        // Windows of one word fewer or more tolerate split/merged words ("hey hearth" vs "hearth")
        for width in [len, len + 1, len.saturating_sub(1)] {
            if width == 0 || start + width > words.len() {
                continue;
            }
            let window = words[start..start + width].join(" ");
            let score = similarity(phrase, &window);
            if best.is_none_or(|(s, _)| score > s) {
                best = Some((score, start + width));
            }
        }
    }
    best
}

/// `1 - levenshtein / max_len`, in `0.0..=1.0`
#[allow(clippy::cast_precision_loss)]
fn similarity(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    1.0 - previous[b.len()] as f32 / longest as f32
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> WakeRouter {
        WakeRouter::new(vec![
            WakeModel::new("hey hearth", Route::Llm),
            WakeModel::new("okay house", Route::Assist),
        ])
    }

    #[test]
    fn test_exact_match_with_trailing_command() {
        let m = router().detect("Hey Hearth, set a five minute timer.", 0.75).unwrap();
        assert_eq!(m.route, Route::Llm);
        assert!((m.score - 1.0).abs() < f32::EPSILON);
        assert_eq!(m.trailing.as_deref(), Some("set a five minute timer"));
    }

    #[test]
    fn test_fuzzy_match_selects_route() {
        let m = router().detect("okay hous turn on the lights", 0.75).unwrap();
        assert_eq!(m.route, Route::Assist);
        assert_eq!(m.trailing.as_deref(), Some("turn on the lights"));
    }

    #[test]
    fn test_trigger_level_gates_detection() {
        assert!(router().detect("hey heart", 0.75).is_some());
        assert!(router().detect("hey heart", 0.95).is_none());
        assert!(router().detect("what a lovely day", 0.75).is_none());
    }

    #[test]
    fn test_lead_words_tolerated() {
        let m = router().detect("um hey hearth", 0.75).unwrap();
        assert_eq!(m.trailing, None);
    }

    #[test]
    fn test_route_from_str() {
        assert_eq!("local".parse::<Route>().unwrap(), Route::Llm);
        assert_eq!("Assist".parse::<Route>().unwrap(), Route::Assist);
        assert!("cloud".parse::<Route>().is_err());
    }
}
