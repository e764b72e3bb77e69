//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Captures audio from the default input device
///
/// The cpal stream lives on its own thread for the lifetime of the capture,
/// so the handle itself can move between tasks.
pub struct AudioCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = {
            let buffer = Arc::clone(&buffer);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("hearth-capture".to_string())
                .spawn(move || {
                    let stream = match build_stream(buffer) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    while running.load(Ordering::Relaxed) {
                        std::thread::park_timeout(Duration::from_millis(250));
                    }
                    drop(stream);
                    tracing::debug!("audio capture stopped");
                })?
        };

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        Ok(Self {
            buffer,
            running,
            worker: Some(worker),
        })
    }

    /// Get captured audio buffer and clear it
    ///
    /// Returns the audio samples captured since last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
    }
}

fn build_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(data);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture started"
    );
    Ok(stream)
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
