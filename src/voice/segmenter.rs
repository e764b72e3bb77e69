//! Energy-based speech segmentation
//!
//! Splits the microphone stream into phrases: speech starts when a chunk's
//! RMS energy crosses the threshold and ends after a run of trailing
//! silence, or when the phrase hits its length cap.

use std::time::Duration;

/// Segmenter tunables
#[derive(Debug, Clone, Copy)]
pub struct SegmenterSettings {
    pub energy_threshold: f32,
    pub silence: Duration,
    pub min_phrase: Duration,
    pub max_phrase: Duration,
    pub sample_rate: u32,
}

/// What a pushed chunk produced
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Nothing to report yet
    Pending,
    SpeechStarted,
    /// A complete phrase, trailing silence included
    Phrase(Vec<f32>),
    /// Speech ended before the minimum phrase length
    TooShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Speaking,
}

/// Turns sample chunks into phrase boundaries
#[derive(Debug)]
pub struct Segmenter {
    threshold: f32,
    silence_samples: usize,
    min_samples: usize,
    max_samples: usize,
    state: State,
    buffer: Vec<f32>,
    silence_counter: usize,
}

impl Segmenter {
    #[must_use]
    pub fn new(settings: SegmenterSettings) -> Self {
        let samples = |d: Duration| {
            usize::try_from(d.as_millis() * u128::from(settings.sample_rate) / 1000).unwrap_or(usize::MAX)
        };
        Self {
            threshold: settings.energy_threshold,
            silence_samples: samples(settings.silence),
            min_samples: samples(settings.min_phrase),
            max_samples: samples(settings.max_phrase),
            state: State::Waiting,
            buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed a chunk of samples
    pub fn push(&mut self, samples: &[f32]) -> Segment {
        if samples.is_empty() {
            return Segment::Pending;
        }
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            State::Waiting => {
                if is_speech {
                    self.state = State::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                    return Segment::SpeechStarted;
                }
                Segment::Pending
            }
            State::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter >= self.silence_samples {
                    let spoken = self.buffer.len().saturating_sub(self.silence_counter);
                    let phrase = std::mem::take(&mut self.buffer);
                    self.reset();
                    if spoken < self.min_samples {
                        tracing::trace!(samples = spoken, "phrase too short");
                        return Segment::TooShort;
                    }
                    tracing::debug!(samples = phrase.len(), "phrase complete");
                    return Segment::Phrase(phrase);
                }

                if self.buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.buffer.len(), "phrase hit length cap");
                    let phrase = std::mem::take(&mut self.buffer);
                    self.reset();
                    return Segment::Phrase(phrase);
                }
                Segment::Pending
            }
        }
    }

    /// Whether speech has started and not yet ended
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == State::Speaking
    }

    /// Drop any partial phrase
    pub fn reset(&mut self) {
        self.state = State::Waiting;
        self.buffer.clear();
        self.silence_counter = 0;
    }
}

/// RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
