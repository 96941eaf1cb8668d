//! CyberTune core: ten-band equalizer engine
//!
//! Everything lives under [`domain`]. Device I/O and file decoding are in
//! `cybertune-infra`.

pub mod domain;
