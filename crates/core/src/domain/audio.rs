//! Audio data model shared by the engine
//!
//! The engine never decodes files itself: a decoding collaborator hands it a
//! fully decoded, interleaved `f32` buffer together with its sample rate and
//! channel count. This module defines that buffer and the error type used
//! throughout the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the equalizer engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected input (empty buffer, bad sample rate, out-of-range band index...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested preset does not exist
    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    /// The audio thread has not drained its command queue yet
    #[error("Command queue full: {0}")]
    QueueFull(String),

    /// Spectrum analysis could not run on the given block
    #[error("Spectrum error: {0}")]
    Spectrum(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz22050,
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            22050 => SampleRate::Hz22050,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Nyquist frequency in Hz
    pub fn nyquist(&self) -> f64 {
        f64::from(self.hz()) / 2.0
    }
}

/// Number of interleaved audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }

    pub fn from_count(n: u16) -> Self {
        match n {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

/// A decoded track: interleaved frames at a fixed sample rate
///
/// Immutable once built. A new load replaces the whole buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: SampleRate,
    channels: ChannelCount,
}

impl SampleBuffer {
    /// Wrap decoded samples
    ///
    /// # Errors
    /// `InvalidInput` if the buffer is empty, the sample rate or channel
    /// count is zero, or the sample count is not a whole number of frames.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 {
            return Err(EngineError::InvalidInput(
                "sample rate must be positive".to_string(),
            ));
        }
        if channels == 0 {
            return Err(EngineError::InvalidInput(
                "channel count must be positive".to_string(),
            ));
        }
        if samples.is_empty() {
            return Err(EngineError::InvalidInput("sample buffer is empty".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(EngineError::InvalidInput(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            sample_rate: SampleRate::from_hz(sample_rate),
            channels: ChannelCount::from_count(channels),
        })
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn channels(&self) -> ChannelCount {
        self.channels
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.count() as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate.hz())
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Interleaved samples of `count` frames starting at frame `start`,
    /// or `None` if that range runs past the end of the buffer.
    pub fn frames_at(&self, start: usize, count: usize) -> Option<&[f32]> {
        let channels = self.channels.count() as usize;
        let end = start.checked_add(count)?;
        if end > self.frames() {
            return None;
        }
        Some(&self.samples[start * channels..end * channels])
    }
}
