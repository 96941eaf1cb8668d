//! Configuration management for CyberTune
//!
//! The engine reads one TOML file with four sections:
//! - `[engine]` block size and queue sizing
//! - `[equalizer]` initial pre-amp, master volume, booster gain and preset
//! - `[spectrum]` visual resolution and buffer pool
//! - `[presets]` user presets, name → ten band gains in dB
//!
//! Every field has a default, so a partial (or missing) file is fine.

use crate::domain::dsp::BAND_COUNT;
use crate::domain::preset::{PresetBank, PresetGains};
use crate::domain::spectrum::DEFAULT_BINS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Frames per processed block (and per device callback)
    pub block_size: usize,

    /// Tracks with more channels than this are rejected on load
    pub max_channels: u16,

    /// Pending load/restart commands the audio thread has not picked up yet
    pub command_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_size: 2048,
            max_channels: 8,
            command_queue_capacity: 16,
        }
    }
}

/// `[equalizer]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerSettings {
    /// Linear pre-amp factor (0.0 - 2.0)
    pub preamp: f32,

    /// Linear master volume (0.0 - 1.0)
    pub master_volume: f32,

    /// Extra dB the booster adds to the bass bands
    pub booster_gain_db: f32,

    /// Preset applied at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

impl Default for EqualizerSettings {
    fn default() -> Self {
        Self {
            preamp: 1.0,
            master_volume: 0.8,
            booster_gain_db: 8.0,
            preset: None,
        }
    }
}

/// `[spectrum]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumSettings {
    /// Magnitude values per snapshot
    pub bins: usize,

    /// Pre-allocated block buffers shared by the audio thread and the worker
    pub pool_size: usize,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BINS,
            pool_size: 4,
        }
    }
}

/// Complete CyberTune configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub equalizer: EqualizerSettings,
    pub spectrum: SpectrumSettings,
    /// User presets; a name matching a built-in replaces it
    pub presets: BTreeMap<String, Vec<f32>>,
}

impl EngineConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!(presets = config.presets.len(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Load `path`, falling back to defaults if it is missing or unusable
    #[instrument(skip(path))]
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if fs::metadata(path).await.is_err() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Self::default();
        }

        match Self::load_from_file(path).await {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Default config file location
    ///
    /// `~/.config/cybertune/config.toml` on Linux,
    /// `%APPDATA%\cybertune\config.toml` on Windows
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("cybertune").join("config.toml"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    /// Check ranges and preset shapes
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.block_size == 0 {
            return Err(ConfigError::Invalid("engine.block_size must be positive".to_string()));
        }
        if engine.max_channels == 0 {
            return Err(ConfigError::Invalid("engine.max_channels must be positive".to_string()));
        }
        if engine.command_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "engine.command_queue_capacity must be positive".to_string(),
            ));
        }

        let spectrum = &self.spectrum;
        if spectrum.bins == 0 || spectrum.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "spectrum.bins and spectrum.pool_size must be positive".to_string(),
            ));
        }
        if spectrum.bins >= engine.block_size / 2 + 1 {
            return Err(ConfigError::Invalid(format!(
                "spectrum.bins ({}) must be smaller than the {} magnitudes of a {}-frame block",
                spectrum.bins,
                engine.block_size / 2 + 1,
                engine.block_size
            )));
        }

        let eq = &self.equalizer;
        for (name, value) in [
            ("preamp", eq.preamp),
            ("master_volume", eq.master_volume),
            ("booster_gain_db", eq.booster_gain_db),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!("equalizer.{name} is not a number")));
            }
        }

        let bank = self.preset_bank()?;
        if let Some(name) = &eq.preset {
            if !bank.contains(name) {
                return Err(ConfigError::Invalid(format!("unknown preset '{name}'")));
            }
        }

        Ok(())
    }

    /// Built-in presets overlaid with the ones from `[presets]`
    pub fn preset_bank(&self) -> Result<PresetBank> {
        let user = self
            .presets
            .iter()
            .map(|(name, values)| {
                let gains = PresetGains::try_from(values.as_slice()).map_err(|_| {
                    ConfigError::Invalid(format!(
                        "preset '{name}' has {} values, expected {BAND_COUNT}",
                        values.len()
                    ))
                })?;
                if gains.iter().any(|g| !g.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "preset '{name}' contains a non-finite gain"
                    )));
                }
                Ok((name.clone(), gains))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PresetBank::with_user_presets(
            user.iter().map(|(name, gains)| (name, gains)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.block_size, 2048);
        assert_eq!(config.engine.command_queue_capacity, 16);
        assert_eq!(config.equalizer.preamp, 1.0);
        assert_eq!(config.equalizer.master_volume, 0.8);
        assert_eq!(config.equalizer.booster_gain_db, 8.0);
        assert_eq!(config.spectrum.bins, 60);
        assert!(config.presets.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = EngineConfig::default();
        config.equalizer.preset = Some("Jazz".to_string());
        config
            .presets
            .insert("Late Night".to_string(), vec![2.0; BAND_COUNT]);

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            [engine]
            block_size = 1024

            [presets]
            Bright = [0, 0, 0, 0, 0, 1, 2, 3, 4, 5]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.engine.block_size, 1024);
        assert_eq!(parsed.engine.max_channels, 8);
        assert_eq!(parsed.equalizer, EqualizerSettings::default());
        assert_eq!(parsed.spectrum, SpectrumSettings::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let mut config = EngineConfig::default();
        config.engine.block_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_too_many_bins() {
        let mut config = EngineConfig::default();
        config.engine.block_size = 64;
        config.spectrum.bins = 60;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_short_preset() {
        let mut config = EngineConfig::default();
        config.presets.insert("Broken".to_string(), vec![1.0; 9]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn test_validate_rejects_nan_gain() {
        let mut config = EngineConfig::default();
        let mut gains = vec![0.0; BAND_COUNT];
        gains[3] = f32::NAN;
        config.presets.insert("Weird".to_string(), gains);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.equalizer.preamp = f32::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_checks_initial_preset() {
        let mut config = EngineConfig::default();
        config.equalizer.preset = Some("rock".to_string());
        assert!(config.validate().is_ok());

        config.equalizer.preset = Some("Polka".to_string());
        assert!(config.validate().is_err());

        config.presets.insert("Polka".to_string(), vec![1.0; BAND_COUNT]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_preset_bank_overrides_builtin() {
        let mut config = EngineConfig::default();
        config.presets.insert("Rock".to_string(), vec![1.0; BAND_COUNT]);

        let bank = config.preset_bank().unwrap();
        assert_eq!(bank.get("rock").unwrap(), &[1.0; BAND_COUNT]);
        assert!(bank.contains("Vocal"));
    }

    #[test]
    fn test_default_path() {
        if let Ok(path) = EngineConfig::default_path() {
            assert!(path.ends_with("cybertune/config.toml"));
        }
    }

    #[tokio::test]
    async fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::default();
        config.engine.block_size = 512;
        config.equalizer.master_volume = 0.5;
        config.save_to_file(&config_path).await.unwrap();

        assert!(config_path.exists());

        let loaded = EngineConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, "[engine]\nblock_size = 0\n")
            .await
            .unwrap();

        let result = EngineConfig::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(temp_dir.path().join("absent.toml")).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_load_or_default_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, "this is = = not toml")
            .await
            .unwrap();

        let config = EngineConfig::load_or_default(&config_path).await;
        assert_eq!(config, EngineConfig::default());
    }
}
