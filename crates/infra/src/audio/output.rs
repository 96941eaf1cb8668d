//! Real-time output stream
//!
//! Opens the default output device at the track's sample rate and channel
//! count, with a fixed buffer of one engine block, and hands every device
//! callback straight to the `BlockProcessor`. No locks, no channels: the
//! processor is moved into the callback and owns everything it touches.

use super::{DeviceError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig as CpalStreamConfig};
use cybertune_core::domain::{BlockProcessor, SampleBuffer};
use tracing::{debug, error, info};

/// Shape of the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device callback
    pub buffer_size: u32,
}

impl OutputConfig {
    /// Stream matching `track`, one engine block per callback
    pub fn for_track(track: &SampleBuffer, block_size: usize) -> Self {
        Self {
            sample_rate: track.sample_rate().hz(),
            channels: track.channels().count(),
            buffer_size: u32::try_from(block_size).unwrap_or(u32::MAX),
        }
    }

    fn to_cpal(self) -> CpalStreamConfig {
        CpalStreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(self.buffer_size),
        }
    }
}

/// A running output stream. Dropping it closes the device.
pub struct OutputStream {
    stream: Stream,
    config: OutputConfig,
    device_name: String,
}

impl OutputStream {
    /// Open the default output device and start pulling blocks from `processor`
    pub fn open_default(config: OutputConfig, mut processor: BlockProcessor) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(DeviceError::NoDefaultDevice)?;

        #[allow(deprecated)]
        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        info!(
            device = %device_name,
            sample_rate = config.sample_rate,
            channels = config.channels,
            buffer_size = config.buffer_size,
            "Creating output stream"
        );

        if config.buffer_size as usize > processor.block_size() {
            debug!(
                block_size = processor.block_size(),
                "Device buffer larger than engine block, oversized callbacks will be silent"
            );
        }

        let channels = usize::from(config.channels);
        let stream = device
            .build_output_stream(
                &config.to_cpal(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    processor.process(data, channels);
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| DeviceError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::StreamPlay(e.to_string()))?;

        info!(device = %device_name, "Output stream started");
        Ok(Self {
            stream,
            config,
            device_name,
        })
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop pulling blocks. The processor keeps its state.
    pub fn stop(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| DeviceError::StreamPlay(e.to_string()))?;
        info!(device = %self.device_name, "Output stream stopped");
        Ok(())
    }
}
