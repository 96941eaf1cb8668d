//! Equalizer control parameters
//!
//! Every parameter is an independent atomic scalar. The control surface
//! writes them at any time; the audio thread takes one [`EqualizerParams`]
//! snapshot per block, loading each field exactly once. Nothing here ever
//! blocks.
//!
//! `f32` values are stored as their bit patterns in `AtomicU32`.

use crate::domain::audio::{EngineError, Result};
use crate::domain::dsp::BAND_COUNT;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{trace, warn};

/// Parameter ranges
pub mod params {
    pub const BAND_GAIN_MIN_DB: f32 = -15.0;
    pub const BAND_GAIN_MAX_DB: f32 = 15.0;

    pub const BOOST_MIN_DB: f32 = 0.0;
    pub const BOOST_MAX_DB: f32 = 15.0;

    pub const PREAMP_MIN: f32 = 0.0;
    pub const PREAMP_MAX: f32 = 2.0;

    pub const VOLUME_MIN: f32 = 0.0;
    pub const VOLUME_MAX: f32 = 1.0;

    /// Extra gain the booster adds to the bass bands
    pub const BOOSTER_GAIN_DB: f32 = 8.0;
}

/// Bands affected by the bass boost and the booster
pub const BASS_BANDS: [usize; 3] = [0, 1, 2];
/// Bands affected by the treble boost
pub const TREBLE_BANDS: [usize; 3] = [7, 8, 9];

/// Lock-free `f32` cell
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Plain copy of every parameter, taken once per block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerParams {
    pub band_gains_db: [f32; BAND_COUNT],
    pub preamp: f32,
    pub bass_boost_db: f32,
    pub treble_boost_db: f32,
    pub booster_active: bool,
    pub booster_gain_db: f32,
    pub master_volume: f32,
}

impl Default for EqualizerParams {
    fn default() -> Self {
        Self {
            band_gains_db: [0.0; BAND_COUNT],
            preamp: 1.0,
            bass_boost_db: 0.0,
            treble_boost_db: 0.0,
            booster_active: false,
            booster_gain_db: params::BOOSTER_GAIN_DB,
            master_volume: 0.8,
        }
    }
}

impl EqualizerParams {
    /// Total gain of band `index` in dB: band gain plus bass boost and
    /// booster on the bass bands, plus treble boost on the treble bands.
    pub fn total_gain_db(&self, index: usize) -> f32 {
        let mut total = self.band_gains_db[index];
        if BASS_BANDS.contains(&index) {
            total += self.bass_boost_db;
            if self.booster_active {
                total += self.booster_gain_db;
            }
        }
        if TREBLE_BANDS.contains(&index) {
            total += self.treble_boost_db;
        }
        total
    }

    /// True when no band would be filtered
    pub fn is_flat(&self) -> bool {
        (0..BAND_COUNT).all(|i| self.total_gain_db(i) == 0.0)
    }
}

/// Shared, independently updatable equalizer parameters
#[derive(Debug)]
pub struct EqualizerState {
    band_gains_db: [AtomicF32; BAND_COUNT],
    preamp: AtomicF32,
    bass_boost_db: AtomicF32,
    treble_boost_db: AtomicF32,
    booster_active: AtomicBool,
    booster_gain_db: AtomicF32,
    master_volume: AtomicF32,
}

impl Default for EqualizerState {
    fn default() -> Self {
        Self::new(EqualizerParams::default())
    }
}

impl EqualizerState {
    /// Create state holding `initial` (values are clamped to their ranges)
    pub fn new(initial: EqualizerParams) -> Self {
        let state = Self {
            band_gains_db: std::array::from_fn(|_| AtomicF32::new(0.0)),
            preamp: AtomicF32::new(1.0),
            bass_boost_db: AtomicF32::new(0.0),
            treble_boost_db: AtomicF32::new(0.0),
            booster_active: AtomicBool::new(initial.booster_active),
            booster_gain_db: AtomicF32::new(params::BOOSTER_GAIN_DB),
            master_volume: AtomicF32::new(0.8),
        };
        state.apply_gains(&initial.band_gains_db);
        state.set_preamp(initial.preamp);
        state.set_bass_boost(initial.bass_boost_db);
        state.set_treble_boost(initial.treble_boost_db);
        state.set_booster_gain(initial.booster_gain_db);
        state.set_master_volume(initial.master_volume);
        state
    }

    /// Read every field once. Called by the audio thread at block start.
    #[inline]
    pub fn snapshot(&self) -> EqualizerParams {
        EqualizerParams {
            band_gains_db: std::array::from_fn(|i| self.band_gains_db[i].load()),
            preamp: self.preamp.load(),
            bass_boost_db: self.bass_boost_db.load(),
            treble_boost_db: self.treble_boost_db.load(),
            booster_active: self.booster_active.load(Ordering::Relaxed),
            booster_gain_db: self.booster_gain_db.load(),
            master_volume: self.master_volume.load(),
        }
    }

    /// Set the gain of band `index` in dB (clamped to ±15 dB)
    ///
    /// # Errors
    /// `InvalidInput` if `index` is not a band.
    pub fn set_band_gain(&self, index: usize, db: f32) -> Result<()> {
        let cell = self.band_gains_db.get(index).ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "band index {index} out of range 0..{BAND_COUNT}"
            ))
        })?;
        if let Some(db) = sanitize("band gain", db, params::BAND_GAIN_MIN_DB, params::BAND_GAIN_MAX_DB) {
            cell.store(db);
            trace!(band = index, db, "Band gain set");
        }
        Ok(())
    }

    pub fn band_gain(&self, index: usize) -> Option<f32> {
        self.band_gains_db.get(index).map(AtomicF32::load)
    }

    pub fn band_gains(&self) -> [f32; BAND_COUNT] {
        std::array::from_fn(|i| self.band_gains_db[i].load())
    }

    /// Set all ten band gains. Each store is atomic on its own; the audio
    /// thread reads each band once per block.
    pub fn apply_gains(&self, gains_db: &[f32; BAND_COUNT]) {
        for (cell, &db) in self.band_gains_db.iter().zip(gains_db.iter()) {
            if let Some(db) =
                sanitize("band gain", db, params::BAND_GAIN_MIN_DB, params::BAND_GAIN_MAX_DB)
            {
                cell.store(db);
            }
        }
        trace!(?gains_db, "Band gains applied");
    }

    /// Set the linear pre-amp factor (0.0 - 2.0)
    pub fn set_preamp(&self, factor: f32) {
        if let Some(factor) = sanitize("preamp", factor, params::PREAMP_MIN, params::PREAMP_MAX) {
            self.preamp.store(factor);
        }
    }

    pub fn preamp(&self) -> f32 {
        self.preamp.load()
    }

    /// Set the linear master volume (0.0 - 1.0)
    pub fn set_master_volume(&self, volume: f32) {
        if let Some(volume) =
            sanitize("master volume", volume, params::VOLUME_MIN, params::VOLUME_MAX)
        {
            self.master_volume.store(volume);
        }
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume.load()
    }

    /// Set the bass shelf boost in dB (0 - 15)
    pub fn set_bass_boost(&self, db: f32) {
        if let Some(db) = sanitize("bass boost", db, params::BOOST_MIN_DB, params::BOOST_MAX_DB) {
            self.bass_boost_db.store(db);
        }
    }

    pub fn bass_boost(&self) -> f32 {
        self.bass_boost_db.load()
    }

    /// Set the treble shelf boost in dB (0 - 15)
    pub fn set_treble_boost(&self, db: f32) {
        if let Some(db) = sanitize("treble boost", db, params::BOOST_MIN_DB, params::BOOST_MAX_DB)
        {
            self.treble_boost_db.store(db);
        }
    }

    pub fn treble_boost(&self) -> f32 {
        self.treble_boost_db.load()
    }

    pub fn set_booster_active(&self, active: bool) {
        self.booster_active.store(active, Ordering::Relaxed);
        trace!(active, "Booster toggled");
    }

    pub fn booster_active(&self) -> bool {
        self.booster_active.load(Ordering::Relaxed)
    }

    /// Extra bass gain applied while the booster is on
    pub fn set_booster_gain(&self, db: f32) {
        if let Some(db) = sanitize("booster gain", db, params::BOOST_MIN_DB, params::BOOST_MAX_DB) {
            self.booster_gain_db.store(db);
        }
    }

    pub fn booster_gain(&self) -> f32 {
        self.booster_gain_db.load()
    }
}

/// Clamp `value` into `[min, max]`; reject NaN and infinities
fn sanitize(what: &str, value: f32, min: f32, max: f32) -> Option<f32> {
    if value.is_finite() {
        Some(value.clamp(min, max))
    } else {
        warn!(parameter = what, value, "Ignoring non-finite parameter value");
        None
    }
}
