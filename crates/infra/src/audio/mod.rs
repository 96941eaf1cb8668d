//! Platform audio through CPAL and WAV decoding through hound
//!
//! CPAL abstracts the platform APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod decode;
pub mod output;

pub use decode::{decode_wav, decode_wav_reader};
pub use output::{OutputConfig, OutputStream};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the device and decoding collaborators
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No default output device available")]
    NoDefaultDevice,

    #[error("Failed to build stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start stream: {0}")]
    StreamPlay(String),

    #[error("Failed to decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, DeviceError>;
