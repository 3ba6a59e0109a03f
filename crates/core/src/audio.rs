//! Audio frame types exchanged with the room and the speech providers

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 16kHz - speech recognition input
    #[default]
    Hz16000,
    /// 24kHz - typical synthesis output
    Hz24000,
    /// 48kHz - room media tracks
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Get frame size for a 20ms chunk
    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }
}

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Audio frame with metadata
///
/// Samples are f32 normalized to [-1.0, 1.0]. The buffer is shared so frames
/// can be cloned cheaply between the synthesis stage and the room output.
#[derive(Clone)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Frame sequence number for ordering
    pub sequence: u64,
    pub duration: Duration,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new audio frame from f32 samples
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, channels: Channels, sequence: u64) -> Self {
        let duration = Duration::from_secs_f64(
            samples.len() as f64 / (sample_rate.as_u32() as f64 * channels.count() as f64),
        );

        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
            duration,
        }
    }

    /// A 20ms mono frame of silence
    pub fn silence(sample_rate: SampleRate, sequence: u64) -> Self {
        Self::new(
            vec![0.0; sample_rate.frame_size_20ms()],
            sample_rate,
            Channels::Mono,
            sequence,
        )
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
