//! Engine configuration loaded from TOML.
//!
//! The baseline values are embedded from `config/default.toml`. Override
//! files only need the keys they change; everything else falls back to the
//! defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wind_siting_land_models::{Landuse, ThresholdKey};

/// Embedded baseline configuration.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Errors produced while loading or validating a [`SitingConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML could not be parsed.
    #[error("Invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// The values parsed but are unusable.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Bounded retry settings for store writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
        }
    }
}

/// All tunables of the admissibility and aggregation stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SitingConfig {
    /// Minimum distance (km) to any restricting node for a node to be
    /// buildable.
    pub min_allowable_distance_km: f64,
    /// Half-width of the restriction prefilter box, degrees.
    pub bbox_half_width_deg: f64,
    /// Distance recorded when the prefilter box holds no restriction.
    pub sentinel_distance_km: f64,
    /// MW per km² of admissible area.
    pub power_density_mw_per_km2: f64,
    /// Distance thresholds the aggregator computes summaries for, km.
    pub distance_thresholds_km: Vec<f64>,
    /// Per-way minimum power thresholds, MW.
    pub min_power_thresholds_mw: Vec<u32>,
    /// Land uses whose nodes are buildability candidates.
    pub allowable_landuse: Vec<Landuse>,
    /// Land uses whose nodes restrict nearby candidates.
    pub restricting_landuse: Vec<Landuse>,
    /// Regions processed at the same time.
    pub max_concurrent_regions: usize,
    /// Wall-clock budget for a single region.
    pub region_deadline_secs: u64,
    /// Store write retry policy.
    pub retry: RetryConfig,
}

impl Default for SitingConfig {
    fn default() -> Self {
        Self {
            min_allowable_distance_km: 0.5,
            bbox_half_width_deg: wind_siting_spatial::DEFAULT_BBOX_HALF_WIDTH_DEG,
            sentinel_distance_km: 4.0,
            power_density_mw_per_km2: 19.8,
            distance_thresholds_km: vec![0.5, 0.75, 1.0, 1.25, 1.5],
            min_power_thresholds_mw: vec![0],
            allowable_landuse: Landuse::ALLOWABLE.to_vec(),
            restricting_landuse: Landuse::RESTRICTING.to_vec(),
            max_concurrent_regions: 4,
            region_deadline_secs: 600,
            retry: RetryConfig::default(),
        }
    }
}

impl SitingConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or fails
    /// [`SitingConfig::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded baseline configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded file is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_CONFIG_TOML)
    }

    /// Loads a config file, or the embedded baseline when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Self::embedded();
        };

        log::info!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks that thresholds are positive and the landuse sets usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if !(self.min_allowable_distance_km.is_finite() && self.min_allowable_distance_km > 0.0) {
            return invalid(format!(
                "min_allowable_distance_km must be positive, got {}",
                self.min_allowable_distance_km
            ));
        }
        if !(self.bbox_half_width_deg.is_finite() && self.bbox_half_width_deg > 0.0) {
            return invalid(format!(
                "bbox_half_width_deg must be positive, got {}",
                self.bbox_half_width_deg
            ));
        }
        if !(self.sentinel_distance_km.is_finite()
            && self.sentinel_distance_km >= self.min_allowable_distance_km)
        {
            return invalid(format!(
                "sentinel_distance_km ({}) must be at least min_allowable_distance_km ({})",
                self.sentinel_distance_km, self.min_allowable_distance_km
            ));
        }
        if !(self.power_density_mw_per_km2.is_finite() && self.power_density_mw_per_km2 > 0.0) {
            return invalid(format!(
                "power_density_mw_per_km2 must be positive, got {}",
                self.power_density_mw_per_km2
            ));
        }
        if self.distance_thresholds_km.is_empty() || self.min_power_thresholds_mw.is_empty() {
            return invalid("threshold lists must not be empty".to_string());
        }
        if let Some(bad) = self
            .distance_thresholds_km
            .iter()
            .find(|d| !(d.is_finite() && **d > 0.0))
        {
            return invalid(format!("distance threshold {bad} must be positive"));
        }
        if self.allowable_landuse.is_empty() || self.restricting_landuse.is_empty() {
            return invalid("landuse sets must not be empty".to_string());
        }
        if let Some(shared) = self
            .allowable_landuse
            .iter()
            .find(|l| self.restricting_landuse.contains(l))
        {
            return invalid(format!("landuse {shared} is both allowable and restricting"));
        }
        if self.max_concurrent_regions == 0 {
            return invalid("max_concurrent_regions must be at least 1".to_string());
        }
        if self.region_deadline_secs == 0 {
            return invalid("region_deadline_secs must be at least 1".to_string());
        }

        Ok(())
    }

    /// Every `(distance, power)` pair to aggregate, distance-major.
    #[must_use]
    pub fn threshold_keys(&self) -> Vec<ThresholdKey> {
        self.distance_thresholds_km
            .iter()
            .flat_map(|&km| {
                self.min_power_thresholds_mw
                    .iter()
                    .map(move |&mw| ThresholdKey::from_km(km, mw))
            })
            .collect()
    }

    /// Per-region deadline as a [`Duration`].
    #[must_use]
    pub const fn region_deadline(&self) -> Duration {
        Duration::from_secs(self.region_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_config_matches_defaults() {
        let embedded = SitingConfig::embedded().unwrap();
        assert_eq!(embedded, SitingConfig::default());
    }

    #[test]
    fn partial_override_falls_back_to_defaults() {
        let config = SitingConfig::from_toml_str(
            "min_allowable_distance_km = 1.0\n\n[retry]\nmax_retries = 0\n",
        )
        .unwrap();

        assert!((config.min_allowable_distance_km - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.distance_thresholds_km.len(), 5);
    }

    #[test]
    fn threshold_keys_cover_every_pair() {
        let config = SitingConfig {
            distance_thresholds_km: vec![0.5, 1.0],
            min_power_thresholds_mw: vec![0, 10],
            ..SitingConfig::default()
        };

        assert_eq!(
            config.threshold_keys(),
            vec![
                ThresholdKey::new(500, 0),
                ThresholdKey::new(500, 10),
                ThresholdKey::new(1000, 0),
                ThresholdKey::new(1000, 10),
            ]
        );
    }

    #[test]
    fn rejects_overlapping_landuse_sets() {
        let err = SitingConfig::from_toml_str(
            "allowable_landuse = [\"farmland\", \"military\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("military"), "{err}");
    }

    #[test]
    fn rejects_non_positive_distance() {
        assert!(SitingConfig::from_toml_str("min_allowable_distance_km = 0.0\n").is_err());
    }

    #[test]
    fn rejects_sentinel_below_min_distance() {
        let err = SitingConfig::from_toml_str("sentinel_distance_km = 0.1\n").unwrap_err();
        assert!(err.to_string().contains("sentinel_distance_km"), "{err}");

        assert!(
            SitingConfig::from_toml_str(
                "min_allowable_distance_km = 1.0\nsentinel_distance_km = 1.0\n"
            )
            .is_ok()
        );
    }

    #[test]
    fn rejects_zero_distance_threshold() {
        let err =
            SitingConfig::from_toml_str("distance_thresholds_km = [0.0, 0.5]\n").unwrap_err();
        assert!(err.to_string().contains("must be positive"), "{err}");
    }

    #[test]
    fn rejects_unknown_landuse() {
        assert!(matches!(
            SitingConfig::from_toml_str("restricting_landuse = [\"forest\"]\n"),
            Err(ConfigError::Toml(_))
        ));
    }
}
