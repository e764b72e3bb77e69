//! Audio playback to speakers

use std::f32::consts::TAU;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::pipeline::{AudioSink, Clip, Tone};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays clips on the default output device
///
/// Each clip gets its own output stream on a blocking thread; `stop` cuts the
/// current one short.
pub struct SpeakerSink {
    config: StreamConfig,
    stop: Arc<AtomicBool>,
}

impl SpeakerSink {
    /// Probe the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |channels: u16| {
            move |c: &cpal::SupportedStreamConfigRange| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            }
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(supports(1))
            .or_else(|| device.supported_output_configs().ok()?.find(supports(2)))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn play(&self, clip: Clip) -> Result<()> {
        let samples = match clip {
            Clip::Speech(mp3) => decode_mp3(&mp3)?,
            Clip::Tone(tone) => tone_samples(tone, PLAYBACK_SAMPLE_RATE),
        };
        self.stop.store(false, Ordering::Relaxed);

        let config = self.config.clone();
        let stop = Arc::clone(&self.stop);
        tokio::task::spawn_blocking(move || play_blocking(&config, samples, &stop))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Play samples until done or stopped
fn play_blocking(config: &StreamConfig, samples: Vec<f32>, stop: &AtomicBool) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let finished = Arc::clone(&finished);
        let mut position = 0usize;
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        });
                        frame.fill(sample);
                        position = (position + 1).min(samples.len());
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("playback stopped early");
            return Ok(());
        }
        if Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device drain its last period
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) if frame.channels == 2 => {
                samples.extend(frame.data.chunks(2).map(|pair| {
                    let left = f32::from(pair[0]) / 32768.0;
                    let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                    f32::midpoint(left, right)
                }));
            }
            Ok(frame) => samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0)),
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

/// Short sine earcons
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn tone_samples(tone: Tone, sample_rate: u32) -> Vec<f32> {
    // (frequency Hz, duration ms) per note
    let notes: &[(f32, u32)] = match tone {
        Tone::Listening => &[(660.0, 90), (880.0, 120)],
        Tone::Error => &[(440.0, 150), (330.0, 220)],
        Tone::Alarm => &[(880.0, 180), (0.0, 80), (880.0, 180), (0.0, 80), (880.0, 180)],
    };

    let rate = sample_rate as f32;
    let mut samples = Vec::new();
    for &(freq, ms) in notes {
        let len = (sample_rate * ms / 1000) as usize;
        let fade = (len / 10).max(1);
        samples.extend((0..len).map(|i| {
            let envelope = (i.min(len - i) as f32 / fade as f32).min(1.0);
            (TAU * freq * i as f32 / rate).sin() * 0.3 * envelope
        }));
    }
    samples
}
