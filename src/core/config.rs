use crate::core::smoother::{SmootherConfig, SmoothingFilter};
use crate::models::pose::PoseConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Motion capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MocapConfig {
    /// Minimum pose score to start a detection after a gap (0.0-1.0)
    pub min_detection_confidence: f32,
    /// Minimum pose score to keep tracking (0.0-1.0)
    pub min_tracking_confidence: f32,
    /// Smoothing window in frames, odd and at least 1
    pub smoothing_window: usize,
    /// Smoothing filter: exponential (causal) or savitzky_golay (centered)
    pub smoothing_filter: SmoothingFilter,
    /// Also smooth landmark visibility
    pub smooth_confidence: bool,
    /// Longest gap (in frames) filled by interpolation
    pub max_gap_frames: usize,
    /// Skeleton units per normalized landmark unit for root translation
    pub unit_scale: f64,
    /// Frames submitted to the estimator concurrently
    pub max_frames_in_flight: usize,
    /// Skeleton definition file; the bundled reference skeleton when unset
    pub skeleton_path: Option<PathBuf>,
    /// Where estimator models are cached
    pub model_cache_dir: PathBuf,
}

impl Default for MocapConfig {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());

        let mut model_cache_dir = PathBuf::from(home);
        model_cache_dir.push(".mocap");
        model_cache_dir.push("models");

        Self {
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            smoothing_window: 3,
            smoothing_filter: SmoothingFilter::Exponential,
            smooth_confidence: false,
            max_gap_frames: 5,
            unit_scale: 1.0,
            max_frames_in_flight: 4,
            skeleton_path: None,
            model_cache_dir,
        }
    }
}

impl MocapConfig {
    /// Load configuration from the default location, creating it with defaults if missing
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: MocapConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(0.0..=1.0).contains(&self.min_detection_confidence) {
            return Err(format!(
                "Invalid detection confidence: {}. Must be between 0.0 and 1.0",
                self.min_detection_confidence
            )
            .into());
        }

        if !(0.0..=1.0).contains(&self.min_tracking_confidence) {
            return Err(format!(
                "Invalid tracking confidence: {}. Must be between 0.0 and 1.0",
                self.min_tracking_confidence
            )
            .into());
        }

        // Centered filters need a middle sample
        if self.smoothing_window == 0 || self.smoothing_window % 2 == 0 {
            return Err(format!(
                "Invalid smoothing window: {}. Must be an odd number of at least 1",
                self.smoothing_window
            )
            .into());
        }

        if !(self.unit_scale.is_finite() && self.unit_scale > 0.0) {
            return Err(format!(
                "Invalid unit scale: {}. Must be a positive number",
                self.unit_scale
            )
            .into());
        }

        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > 64 {
            return Err(format!(
                "Invalid frames in flight: {}. Must be between 1 and 64",
                self.max_frames_in_flight
            )
            .into());
        }

        Ok(())
    }

    /// Reset to default configuration
    pub fn reset() -> Result<Self, Box<dyn std::error::Error>> {
        Self::reset_at(&Self::get_config_path()?)
    }

    /// Overwrite the file at `path` with the defaults
    pub fn reset_at(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn pose_config(&self) -> PoseConfig {
        PoseConfig {
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
            ..PoseConfig::default()
        }
    }

    pub fn smoother_config(&self) -> SmootherConfig {
        SmootherConfig {
            window: self.smoothing_window,
            filter: self.smoothing_filter,
            smooth_confidence: self.smooth_confidence,
            max_gap_frames: self.max_gap_frames,
        }
    }

    /// Get the configuration file path
    fn get_config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| "Could not determine home directory")?;

        let mut path = PathBuf::from(home);
        path.push(".mocap");
        path.push("config");
        path.push("settings.json");

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MocapConfig::default();
        assert_eq!(config.min_detection_confidence, 0.5);
        assert_eq!(config.min_tracking_confidence, 0.5);
        assert_eq!(config.smoothing_window, 3);
        assert_eq!(config.smoothing_filter, SmoothingFilter::Exponential);
        assert_eq!(config.max_gap_frames, 5);
        assert_eq!(config.unit_scale, 1.0);
        assert_eq!(config.max_frames_in_flight, 4);
        assert!(config.skeleton_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MocapConfig::default();

        config.min_detection_confidence = 1.5;
        assert!(config.validate().is_err());
        config.min_detection_confidence = 0.5;

        config.smoothing_window = 4;
        assert!(config.validate().is_err());
        config.smoothing_window = 0;
        assert!(config.validate().is_err());
        config.smoothing_window = 1;
        assert!(config.validate().is_ok());

        config.unit_scale = 0.0;
        assert!(config.validate().is_err());
        config.unit_scale = f64::NAN;
        assert!(config.validate().is_err());
        config.unit_scale = 100.0;

        config.max_frames_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.json");

        let mut config = MocapConfig::default();
        config.max_gap_frames = 8;
        config.smoothing_filter = SmoothingFilter::SavitzkyGolay;
        config.save_to(&path).unwrap();

        let loaded = MocapConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "unit_scale": 100.0 }"#).unwrap();

        let loaded = MocapConfig::load_from(&path).unwrap();
        assert_eq!(loaded.unit_scale, 100.0);
        assert_eq!(loaded.smoothing_window, 3);
    }

    #[test]
    fn test_reset_overwrites_saved_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut config = MocapConfig::default();
        config.max_gap_frames = 12;
        config.save_to(&path).unwrap();

        let reset = MocapConfig::reset_at(&path).unwrap();
        assert_eq!(reset, MocapConfig::default());
        assert_eq!(MocapConfig::load_from(&path).unwrap().max_gap_frames, 5);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "smoothing_window": 2 }"#).unwrap();
        assert!(MocapConfig::load_from(&path).is_err());
    }
}
