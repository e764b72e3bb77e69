//! Calendar feed synchronization
//!
//! Polls each configured ICS feed, decodes it, and merges the read-only
//! events into the schedule store. A feed that fails keeps its previous
//! snapshot and is retried on the next interval.

pub mod ics;
pub mod triggers;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{CalendarConfig, CalendarFeed};
use crate::error::with_timeout;
use crate::schedule::{CalendarMerge, ScheduleStore};
use crate::{Error, Result};

pub use ics::DecodeOptions;
pub use triggers::{TriggerPolicy, derive_triggers, out_of_office_dates, visible_events};

/// Fetches, decodes, and merges calendar feeds
pub struct CalendarSyncWorker {
    store: Arc<ScheduleStore>,
    client: reqwest::Client,
    config: CalendarConfig,
    decode: DecodeOptions,
    policy: TriggerPolicy,
}

impl CalendarSyncWorker {
    #[must_use]
    pub fn new(store: Arc<ScheduleStore>, config: CalendarConfig) -> Self {
        let decode = DecodeOptions {
            owner_emails: config.owner_emails.clone(),
            out_of_office_marker: config.out_of_office_marker.clone(),
        };
        let policy = TriggerPolicy::from_minutes_before(&config.default_offsets_mins, config.hide_declined);

        Self {
            store,
            client: reqwest::Client::new(),
            config,
            decode,
            policy,
        }
    }

    /// Fetch, decode, and merge one feed
    ///
    /// # Errors
    ///
    /// Returns a feed sync error if the fetch times out, the server answers
    /// with a failure status, or the body is not a calendar. The store is
    /// left untouched for this feed in that case.
    pub async fn sync_feed(&self, feed: &CalendarFeed) -> Result<CalendarMerge> {
        let body = with_timeout("calendar", self.config.fetch_timeout, self.fetch(feed))
            .await
            .map_err(|e| match e {
                Error::FeedSync { .. } => e,
                other => Error::FeedSync {
                    feed: feed.name.clone(),
                    message: other.to_string(),
                },
            })?;

        let events = ics::decode(&feed.name, &body, &self.decode)?;
        let triggers = derive_triggers(&events, &self.policy);
        let out_of_office = out_of_office_dates(&events);
        let events = visible_events(events, &self.policy);

        let merge = self
            .store
            .apply_calendar_sync(&feed.name, events, triggers, out_of_office)?;

        tracing::info!(
            feed = %feed.name,
            newly_armed = merge.newly_armed.len(),
            retained = merge.retained,
            missed = merge.missed,
            dropped = merge.dropped,
            "calendar synced"
        );
        Ok(merge)
    }

    /// Sync every feed; one feed failing never disturbs the others
    pub async fn sync_all(&self) {
        for feed in &self.config.feeds {
            if let Err(e) = self.sync_feed(feed).await {
                tracing::warn!(feed = %feed.name, error = %e, "calendar sync failed, keeping previous snapshot");
            }
        }
    }

    /// Run `sync_all` now and then on every interval
    pub fn spawn(self) -> JoinHandle<()> {
        tracing::info!(
            feeds = self.config.feeds.len(),
            interval_secs = self.config.interval.as_secs(),
            "calendar sync enabled"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sync_all().await;
            }
        })
    }

    async fn fetch(&self, feed: &CalendarFeed) -> Result<String> {
        let url = match FeedSource::parse(&feed.url) {
            FeedSource::File(path) => return Ok(tokio::fs::read_to_string(path).await?),
            FeedSource::Http(url) => url,
        };

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::FeedSync {
                feed: feed.name.clone(),
                message: format!("HTTP {status}"),
            });
        }
        Ok(response.text().await?)
    }
}

/// Where a feed's document is read from
#[derive(Debug, PartialEq, Eq)]
enum FeedSource<'a> {
    Http(String),
    File(&'a str),
}

impl<'a> FeedSource<'a> {
    /// `webcal://` is served over https; anything without a web scheme is a path
    fn parse(url: &'a str) -> Self {
        let url = url.trim();
        if let Some(rest) = strip_scheme(url, "webcal://") {
            return Self::Http(format!("https://{rest}"));
        }
        if strip_scheme(url, "http://").is_some() || strip_scheme(url, "https://").is_some() {
            return Self::Http(url.to_string());
        }
        Self::File(strip_scheme(url, "file://").unwrap_or(url))
    }
}

fn strip_scheme<'a>(url: &'a str, scheme: &str) -> Option<&'a str> {
    url.get(..scheme.len())
        .filter(|head| head.eq_ignore_ascii_case(scheme))
        .map(|_| &url[scheme.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ManualClock, StoreSettings};
    use chrono::NaiveDate;
    use std::io::Write;

    const ICS: &str = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:dentist\nSUMMARY:Dentist\nDTSTART:20260302T150000\nDTEND:20260302T160000\nEND:VEVENT\nEND:VCALENDAR\n";

    fn worker(feeds: Vec<CalendarFeed>) -> (Arc<ScheduleStore>, CalendarSyncWorker) {
        let now = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let store = Arc::new(ScheduleStore::new(
            Arc::new(ManualClock::new(now)),
            StoreSettings::default(),
        ));
        let config = CalendarConfig {
            feeds,
            ..CalendarConfig::default()
        };
        (store.clone(), CalendarSyncWorker::new(store, config))
    }

    #[tokio::test]
    async fn test_sync_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ICS.as_bytes()).unwrap();
        let feed = CalendarFeed {
            name: "family".to_string(),
            url: file.path().display().to_string(),
        };
        let (store, worker) = worker(vec![feed.clone()]);

        let merge = worker.sync_feed(&feed).await.unwrap();
        assert_eq!(merge.newly_armed.len(), 1);
        assert_eq!(store.calendar_events().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_feed_keeps_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ICS.as_bytes()).unwrap();
        let good = CalendarFeed {
            name: "family".to_string(),
            url: file.path().display().to_string(),
        };
        let (store, worker) = worker(vec![good.clone()]);
        worker.sync_feed(&good).await.unwrap();

        let broken = CalendarFeed {
            name: "family".to_string(),
            url: "/nonexistent/family.ics".to_string(),
        };
        let err = worker.sync_feed(&broken).await.unwrap_err();
        assert!(matches!(err, Error::FeedSync { .. }));
        assert_eq!(store.calendar_events().len(), 1);
    }

    #[test]
    fn test_feed_sources() {
        assert_eq!(
            FeedSource::parse("webcal://calendar.example.com/family.ics"),
            FeedSource::Http("https://calendar.example.com/family.ics".to_string())
        );
        assert_eq!(
            FeedSource::parse(" WEBCAL://example.com/a.ics"),
            FeedSource::Http("https://example.com/a.ics".to_string())
        );
        assert_eq!(
            FeedSource::parse("http://127.0.0.1:8080/work.ics"),
            FeedSource::Http("http://127.0.0.1:8080/work.ics".to_string())
        );
        assert_eq!(FeedSource::parse("file:///srv/cal.ics"), FeedSource::File("/srv/cal.ics"));
        assert_eq!(FeedSource::parse("/srv/cal.ics"), FeedSource::File("/srv/cal.ics"));
    }
}
