//! Display overlay surface

use std::sync::Arc;

use serde::Serialize;

use super::SyncBus;
use crate::schedule::{EventKind, ScheduleEvent};

/// Payload pushed to the display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "overlay", rename_all = "snake_case")]
pub enum Overlay {
    /// Full-screen ringing card
    Ringing { event: ScheduleEvent },
    /// Dismiss the ringing card for a kind
    Idle { kind: EventKind },
    /// Transient card for a spoken answer (weather, news, scores)
    Info { title: String, lines: Vec<String> },
}

/// Something that can show overlays on the idle display
pub trait DisplaySurface: Send + Sync {
    fn show(&self, overlay: Overlay);
}

/// Display surface that publishes overlays on the bus for the kiosk page
pub struct BusDisplay {
    bus: Arc<SyncBus>,
}

impl BusDisplay {
    #[must_use]
    pub const fn new(bus: Arc<SyncBus>) -> Self {
        Self { bus }
    }
}

impl DisplaySurface for BusDisplay {
    fn show(&self, overlay: Overlay) {
        if let Err(e) = self.bus.publish_json("display/overlay", &overlay, false) {
            tracing::warn!(error = %e, "failed to publish overlay");
        }
    }
}
