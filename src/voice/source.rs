//! Microphone phrase source

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::capture::AudioCapture;
use super::segmenter::{Segment, Segmenter, SegmenterSettings};
use crate::Result;
use crate::config::VoiceConfig;
use crate::pipeline::{Captured, Heard, Phrase, PhraseSource};

/// How often the capture buffer is drained
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Segments live microphone audio into phrases
pub struct MicrophoneSource {
    capture: AudioCapture,
    segmenter: Segmenter,
}

impl MicrophoneSource {
    #[must_use]
    pub fn new(capture: AudioCapture, voice: &VoiceConfig) -> Self {
        let segmenter = Segmenter::new(SegmenterSettings {
            energy_threshold: voice.energy_threshold,
            silence: voice.silence,
            min_phrase: voice.min_phrase,
            max_phrase: voice.max_phrase,
            sample_rate: capture.sample_rate(),
        });
        Self { capture, segmenter }
    }
}

#[async_trait]
impl PhraseSource for MicrophoneSource {
    async fn listen(&mut self, within: Option<Duration>) -> Result<Heard> {
        if self.segmenter.is_speaking() {
            return Ok(Heard::Speech);
        }
        let deadline = within.map(|d| {
            // Anything buffered while the assistant was talking is its own voice
            self.capture.clear_buffer();
            Instant::now() + d
        });

        loop {
            let chunk = self.capture.take_buffer();
            if self.segmenter.push(&chunk) == Segment::SpeechStarted {
                return Ok(Heard::Speech);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(Heard::Silence);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn capture(&mut self) -> Result<Captured> {
        let sample_rate = self.capture.sample_rate();
        loop {
            let chunk = self.capture.take_buffer();
            match self.segmenter.push(&chunk) {
                Segment::Phrase(samples) => {
                    return Ok(Captured::Phrase(Phrase {
                        samples,
                        sample_rate,
                    }));
                }
                Segment::TooShort => return Ok(Captured::TooShort),
                Segment::Pending | Segment::SpeechStarted => {}
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn discard(&mut self) {
        self.segmenter.reset();
        self.capture.clear_buffer();
    }
}
