//! CyberTune infrastructure: output device and file decoding
//!
//! The engine in `cybertune-core` never touches a device or a file. This
//! crate provides both collaborators: a cpal output stream that calls
//! `BlockProcessor::process` on every callback, and a WAV decoder producing
//! `SampleBuffer`s.

pub mod audio;
