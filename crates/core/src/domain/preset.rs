//! Equalizer presets
//!
//! A preset is a name mapped to ten band gains in dB. The built-in table is
//! always available; user presets from the config file are layered on top
//! and replace built-ins of the same name.

use crate::domain::audio::{EngineError, Result};
use crate::domain::dsp::BAND_COUNT;
use std::collections::BTreeMap;
use tracing::debug;

/// Band gains of one preset
pub type PresetGains = [f32; BAND_COUNT];

/// Factory presets, in display order
pub const BUILTIN_PRESETS: [(&str, PresetGains); 7] = [
    ("Flat", [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("Rock", [5.0, 4.0, 3.0, 0.0, -1.0, -1.0, 0.0, 3.0, 4.0, 5.0]),
    ("Pop", [-2.0, -1.0, 0.0, 2.0, 4.0, 4.0, 2.0, 0.0, -1.0, -2.0]),
    ("Jazz", [4.0, 3.0, 1.0, 2.0, -2.0, -2.0, 0.0, 1.0, 3.0, 4.0]),
    ("Classical", [5.0, 4.0, 3.0, 2.0, -1.0, -1.0, 0.0, 2.0, 4.0, 5.0]),
    ("Electronic", [6.0, 5.0, 0.0, -2.0, 2.0, 0.0, 4.0, 5.0, 6.0, 6.0]),
    ("Vocal", [-3.0, -2.0, -1.0, 1.0, 3.0, 4.0, 4.0, 3.0, 1.0, -1.0]),
];

/// Name → gains lookup (case-insensitive)
#[derive(Debug, Clone)]
pub struct PresetBank {
    /// Display names in order: built-ins first, then user presets sorted by name
    names: Vec<String>,
    /// Keyed by lowercase name
    gains: BTreeMap<String, PresetGains>,
}

impl Default for PresetBank {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetBank {
    /// Only the factory presets
    pub fn builtin() -> Self {
        let mut bank = Self {
            names: Vec::with_capacity(BUILTIN_PRESETS.len()),
            gains: BTreeMap::new(),
        };
        for (name, gains) in BUILTIN_PRESETS {
            bank.insert(name, gains);
        }
        bank
    }

    /// Factory presets plus `user` presets (user wins on a name clash)
    pub fn with_user_presets<'a, I>(user: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a PresetGains)>,
    {
        let mut user: Vec<_> = user.into_iter().collect();
        user.sort_by(|a, b| a.0.cmp(b.0));

        let mut bank = Self::builtin();
        for (name, gains) in user {
            bank.insert(name, *gains);
        }
        debug!(count = bank.len(), "Preset bank ready");
        bank
    }

    /// Add or replace a preset
    pub fn insert(&mut self, name: &str, gains: PresetGains) {
        let key = name.to_lowercase();
        if self.gains.insert(key, gains).is_none() {
            self.names.push(name.to_string());
        }
    }

    /// Look up a preset by name, ignoring case
    ///
    /// # Errors
    /// `PresetNotFound` if no preset has that name.
    pub fn get(&self, name: &str) -> Result<&PresetGains> {
        self.gains
            .get(&name.to_lowercase())
            .ok_or_else(|| EngineError::PresetNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gains.contains_key(&name.to_lowercase())
    }

    /// Preset names in display order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
