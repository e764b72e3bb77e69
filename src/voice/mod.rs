//! Voice I/O
//!
//! Microphone capture and segmentation, speaker playback, and the speech
//! recognition/synthesis client.

mod capture;
mod playback;
mod segmenter;
mod source;
mod speech;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::SpeakerSink;
pub use segmenter::{Segment, Segmenter, SegmenterSettings};
pub use source::MicrophoneSource;
pub use speech::OpenAiSpeech;
