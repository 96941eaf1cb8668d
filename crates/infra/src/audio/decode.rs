//! WAV decoding into engine sample buffers
//!
//! Integer PCM of any bit depth and 32-bit float are supported. Integer
//! samples are scaled to [-1, 1) by `2^(bits - 1)`.

use super::{DeviceError, Result};
use cybertune_core::domain::SampleBuffer;
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Decode the WAV file at `path`
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn decode_wav<P: AsRef<Path>>(path: P) -> Result<SampleBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path).map_err(|e| decode_error(path, e))?;
    let buffer = read_all(reader).map_err(|reason| DeviceError::Decode {
        path: path.to_path_buf(),
        reason,
    })?;

    info!(
        frames = buffer.frames(),
        sample_rate = buffer.sample_rate().hz(),
        channels = buffer.channels().count(),
        "Decoded WAV file"
    );
    Ok(buffer)
}

/// Decode a WAV stream already in memory or behind any reader
pub fn decode_wav_reader<R: Read>(reader: R) -> Result<SampleBuffer> {
    let label = Path::new("<reader>");
    let reader = WavReader::new(reader).map_err(|e| decode_error(label, e))?;
    read_all(reader).map_err(|reason| DeviceError::Decode {
        path: label.to_path_buf(),
        reason,
    })
}

fn read_all<R: Read>(mut reader: WavReader<R>) -> std::result::Result<SampleBuffer, String> {
    let spec = reader.spec();
    debug!(
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        float = spec.sample_format == SampleFormat::Float,
        "Reading WAV samples"
    );

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(format!("unsupported bit depth {}", spec.bits_per_sample));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?
        }
    };

    SampleBuffer::new(samples, spec.sample_rate, spec.channels).map_err(|e| e.to_string())
}

fn decode_error(path: &Path, error: hound::Error) -> DeviceError {
    DeviceError::Decode {
        path: PathBuf::from(path),
        reason: error.to_string(),
    }
}
