//! Hearth - on-device voice assistant for a kitchen display
//!
//! This library provides:
//! - A voice pipeline: wake phrase routing, segmentation, STT, local
//!   shortcuts, LLM or Assist replies, TTS, bounded follow-ups
//! - A schedule store for alarms, timers and reminders with recurrence,
//!   snooze, pause days and calendar-derived reminders
//! - A sync contract (retained topics over HTTP/WebSocket) for displays
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Microphone │ Speaker │ Display / companion (WS)     │
//! └──────┬──────────────┬─────────────────┬──────────────┘
//!        │              │                 │
//! ┌──────▼──────────────▼──────┐   ┌──────▼──────────────┐
//! │  PipelineOrchestrator      │   │  StatePublisher     │
//! │  wake → STT → shortcut/LLM │   │  snapshots, ringing │
//! │  → TTS → follow-up         │   │  inbound commands   │
//! └──────┬─────────────────────┘   └──────┬──────────────┘
//!        │                                │
//! ┌──────▼────────────────────────────────▼──────────────┐
//! │  ScheduleStore  ←  ticker, CalendarSyncWorker        │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod calendar;
pub mod config;
pub mod daemon;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod publisher;
pub mod remote;
pub mod schedule;
pub mod shortcuts;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
