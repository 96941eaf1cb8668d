//! Domain entities and engine rules

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod equalizer;
pub mod preset;
pub mod spectrum;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{ChannelCount, EngineError, SampleBuffer, SampleRate};
pub use config::{
    ConfigError, EngineConfig, EngineSettings, EqualizerSettings, SpectrumSettings,
};
pub use dsp::{added_gain, Band, FilterBank, BAND_CENTERS_HZ, BAND_COUNT};
pub use engine::{BlockProcessor, EngineHandle, EngineParts, PlaybackCursor};
pub use equalizer::{EqualizerParams, EqualizerState};
pub use preset::{PresetBank, PresetGains, BUILTIN_PRESETS};
pub use spectrum::{SpectrumAnalyzer, SpectrumFeed, SpectrumSnapshot, SpectrumWorker};
