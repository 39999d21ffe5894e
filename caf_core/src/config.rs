//! Configuration file support for hfcf.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/hfcf/config.toml`.
//! Every field is optional; missing values fall back to the defaults below.

use crate::decay::DecayParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub decay: DecayConfig,

    #[serde(default)]
    pub dose: DoseConfig,

    #[serde(default)]
    pub ticker: TickerConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Half-life model parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Caffeine half-life. Commonly quoted values sit between 5 and 6 hours.
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,

    /// Doses whose remaining amount drops below this are removed on the next tick.
    #[serde(default = "default_cutoff_mg")]
    pub cutoff_mg: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_hours: default_half_life_hours(),
            cutoff_mg: default_cutoff_mg(),
        }
    }
}

/// Dose logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoseConfig {
    #[serde(default = "default_dose_size_mg")]
    pub size_mg: f64,
}

impl Default for DoseConfig {
    fn default() -> Self {
        Self {
            size_mg: default_dose_size_mg(),
        }
    }
}

/// Periodic recomputation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl TickerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local/share")
    });
    base.join("hfcf")
}

fn default_half_life_hours() -> f64 {
    5.0
}

fn default_cutoff_mg() -> f64 {
    1.0
}

fn default_dose_size_mg() -> f64 {
    50.0
}

fn default_interval_ms() -> u64 {
    3000
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path and validate it
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("hfcf").join("config.toml")
    }

    /// Reject values the decay model cannot work with
    pub fn validate(&self) -> Result<()> {
        let half_life = self.decay.half_life_hours;
        if !half_life.is_finite() || half_life <= 0.0 {
            return Err(Error::Config(format!(
                "decay.half_life_hours must be a positive number, got {}",
                half_life
            )));
        }

        let cutoff = self.decay.cutoff_mg;
        if !cutoff.is_finite() || cutoff <= 0.0 {
            return Err(Error::Config(format!(
                "decay.cutoff_mg must be a positive number, got {}",
                cutoff
            )));
        }

        let size = self.dose.size_mg;
        if !size.is_finite() || size <= 0.0 {
            return Err(Error::Config(format!(
                "dose.size_mg must be a positive number, got {}",
                size
            )));
        }

        if self.ticker.interval_ms == 0 {
            return Err(Error::Config("ticker.interval_ms must be at least 1".into()));
        }

        Ok(())
    }

    /// Decay parameters for the tracker
    pub fn decay_params(&self) -> DecayParams {
        DecayParams {
            half_life_hours: self.decay.half_life_hours,
            cutoff_mg: self.decay.cutoff_mg,
        }
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.decay.half_life_hours, 5.0);
        assert_eq!(config.decay.cutoff_mg, 1.0);
        assert_eq!(config.dose.size_mg, 50.0);
        assert_eq!(config.ticker.interval(), Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.decay.half_life_hours = 5.6;
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.decay.half_life_hours, 5.6);
        assert_eq!(parsed.dose.size_mg, config.dose.size_mg);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[dose]
size_mg = 80.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dose.size_mg, 80.0);
        assert_eq!(config.decay.half_life_hours, 5.0); // default
        assert_eq!(config.ticker.interval_ms, 3000); // default
    }

    #[test]
    fn test_rejects_non_positive_half_life() {
        let mut config = Config::default();
        config.decay.half_life_hours = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.decay.half_life_hours = -5.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_cutoff_that_never_drops_doses() {
        let mut config = Config::default();
        config.decay.cutoff_mg = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.decay.cutoff_mg = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.decay.cutoff_mg = 0.01;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_bad_dose() {
        let mut config = Config::default();
        config.ticker.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dose.size_mg = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[decay]\nhalf_life_hours = -1.0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
