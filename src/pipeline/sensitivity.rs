//! Self-audio suppression
//!
//! While the household player is playing, the wake trigger level is raised so
//! the device's own output is less likely to wake it. The level is read at
//! each wake detection.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::media::{MediaPlayer, PlayerState};

#[derive(Debug)]
struct Levels {
    normal: f32,
    elevated: f32,
    playing: bool,
}

/// Shared wake trigger level
#[derive(Debug, Clone)]
pub struct Sensitivity {
    inner: Arc<RwLock<Levels>>,
}

impl Sensitivity {
    #[must_use]
    pub fn new(normal: f32, elevated: f32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Levels {
                normal,
                elevated,
                playing: false,
            })),
        }
    }

    /// Current trigger level
    #[must_use]
    pub fn level(&self) -> f32 {
        let levels = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if levels.playing {
            levels.elevated
        } else {
            levels.normal
        }
    }

    #[must_use]
    pub fn is_elevated(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).playing
    }

    /// Record the player state; returns whether the level changed
    pub fn observe(&self, state: PlayerState) -> bool {
        let playing = state.is_playing();
        let mut levels = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if levels.playing == playing {
            return false;
        }
        levels.playing = playing;
        let level = if playing { levels.elevated } else { levels.normal };
        tracing::debug!(playing, level, "wake sensitivity changed");
        true
    }

    /// Poll the player and keep the level in step with it
    ///
    /// A failed poll keeps the previous level.
    pub fn spawn_poller(&self, player: Arc<dyn MediaPlayer>, every: Duration) -> JoinHandle<()> {
        let sensitivity = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match player.state().await {
                    Ok(state) => {
                        sensitivity.observe(state);
                    }
                    Err(e) => tracing::debug!(error = %e, "media state poll failed"),
                }
            }
        })
    }
}
