//! Local shortcuts
//!
//! Transcripts are classified against an ordered table before anything goes
//! to a remote backend. A match is executed on-device; no match falls
//! through to the LLM or Assist reply.

mod executor;
pub mod info;
pub mod intents;

pub use executor::{LocalReply, ShortcutExecutor};
pub use info::{InfoAnswer, InfoProviders, InfoTopic};
pub use intents::{CLASSIFIERS, Classifier, Intent, clean};

use chrono::NaiveDateTime;

/// Ordered transcript classifier
pub struct ShortcutRouter {
    table: &'static [(&'static str, Classifier)],
}

impl Default for ShortcutRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortcutRouter {
    #[must_use]
    pub const fn new() -> Self {
        Self { table: CLASSIFIERS }
    }

    /// First matching intent, or `None` to fall through to the remote reply
    #[must_use]
    pub fn classify(&self, transcript: &str, now: NaiveDateTime) -> Option<Intent> {
        let text = clean(transcript);
        if text.is_empty() {
            return None;
        }
        self.table.iter().find_map(|(name, classify)| {
            let intent = classify(&text, now)?;
            tracing::debug!(classifier = name, intent = intent.name(), "shortcut matched");
            Some(intent)
        })
    }

    /// Classify only interrupt intents (stop, snooze)
    #[must_use]
    pub fn interrupt(&self, transcript: &str, now: NaiveDateTime) -> Option<Intent> {
        self.classify(transcript, now).filter(Intent::is_interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_table_order_stop_before_music() {
        let router = ShortcutRouter::new();
        assert_eq!(router.classify("stop", now()), Some(Intent::Stop { kind: None }));
        assert!(matches!(
            router.classify("pause the music", now()),
            Some(Intent::Music(_))
        ));
    }

    #[test]
    fn test_fall_through() {
        let router = ShortcutRouter::new();
        assert_eq!(router.classify("tell me a joke about penguins", now()), None);
        assert_eq!(router.classify("  ", now()), None);
    }

    #[test]
    fn test_interrupt_only() {
        let router = ShortcutRouter::new();
        assert!(router.interrupt("snooze", now()).is_some());
        assert!(router.interrupt("set a five minute timer", now()).is_none());
    }
}
