//! Debounced persistence of the schedule snapshot
//!
//! Rapid toggling produces a burst of snapshots; only the last one is written,
//! once the burst has been quiet for the configured delay.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::schedule::Snapshot;
use crate::Result;

/// Delay before a pending snapshot is written
pub const PERSIST_DELAY: Duration = Duration::from_secs(2);

/// First retry after a failed write; doubles per consecutive failure
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(60);

/// Holds the latest unsaved payload and when it becomes due
#[derive(Debug)]
pub struct DebouncedWriter {
    path: PathBuf,
    delay: Duration,
    pending: Option<String>,
    due: Option<Instant>,
    writes: u64,
    failures: u32,
}

impl DebouncedWriter {
    #[must_use]
    pub fn new(path: PathBuf, delay: Duration) -> Self {
        Self {
            path,
            delay,
            pending: None,
            due: None,
            writes: 0,
            failures: 0,
        }
    }

    /// Replace the pending payload and push the deadline out
    pub fn schedule(&mut self, payload: String) {
        self.pending = Some(payload);
        self.due = Some(Instant::now() + self.delay);
    }

    /// When the pending payload should be written, if any
    #[must_use]
    pub const fn due(&self) -> Option<Instant> {
        self.due
    }

    /// Number of completed writes
    #[must_use]
    pub const fn writes(&self) -> u64 {
        self.writes
    }

    /// Whether a payload is waiting to be written
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn retry_delay(&self) -> Duration {
        let doublings = self.failures.saturating_sub(1).min(6);
        RETRY_BASE.saturating_mul(1 << doublings).min(RETRY_CAP)
    }

    /// Write the pending payload, if any
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written; the payload
    /// stays pending and is due again after a backoff
    pub async fn flush(&mut self) -> Result<()> {
        self.due = None;
        let Some(payload) = self.pending.take() else {
            return Ok(());
        };

        if let Err(e) = write_atomic(&self.path, &payload).await {
            self.pending = Some(payload);
            self.failures = self.failures.saturating_add(1);
            let retry = self.retry_delay();
            tracing::debug!(failures = self.failures, retry_ms = retry.as_millis(), "persist retry scheduled");
            self.due = Some(Instant::now() + retry);
            return Err(e);
        }
        self.failures = 0;
        self.writes += 1;
        tracing::debug!(path = %self.path.display(), "schedules persisted");
        Ok(())
    }
}

async fn write_atomic(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Load a previously persisted snapshot
///
/// Returns `None` if no file exists yet.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}
