//! Run configuration, loadable from YAML.

use crate::camera::CameraModelKind;
use crate::error::{CalibrationError, IoError};
use crate::initializer::RansacParams;
use crate::optimization::BundleAdjustmentOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    pub camera_model: CameraModelKind,
    /// Refine the board points after the view stages.
    pub optimize_board_points: bool,
    pub min_num_views: usize,
    /// Minimum distance between accepted camera positions, in board units.
    pub grid_size: f64,
    pub ransac: RansacParams,
    pub bundle_adjustment: BundleAdjustmentOptions,
    pub prune_threshold_coarse: f64,
    pub prune_threshold_fine: f64,
    pub verbose: bool,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        CalibratorConfig {
            camera_model: CameraModelKind::DivisionUndistortion,
            optimize_board_points: false,
            min_num_views: 10,
            grid_size: 0.05,
            ransac: RansacParams::default(),
            bundle_adjustment: BundleAdjustmentOptions::default(),
            prune_threshold_coarse: 5.0,
            prune_threshold_fine: 2.0,
            verbose: false,
        }
    }
}

impl CalibratorConfig {
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let invalid = |msg: &str| Err(CalibrationError::InvalidConfig(msg.to_string()));
        if self.min_num_views == 0 {
            return invalid("min_num_views must be at least 1");
        }
        if !(self.grid_size >= 0.0) {
            return invalid("grid_size must be non-negative");
        }
        let p = self.ransac.failure_probability;
        if !(p > 0.0 && p < 1.0) {
            return invalid("ransac.failure_probability must lie in (0, 1)");
        }
        if self.ransac.max_iterations == 0 {
            return invalid("ransac.max_iterations must be positive");
        }
        if !(0.0..=1.0).contains(&self.ransac.min_inlier_ratio) {
            return invalid("ransac.min_inlier_ratio must lie in [0, 1]");
        }
        if !(self.bundle_adjustment.loss_width > 0.0) {
            return invalid("bundle_adjustment.loss_width must be positive");
        }
        if !(self.prune_threshold_coarse > 0.0 && self.prune_threshold_fine > 0.0) {
            return invalid("prune thresholds must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CalibratorConfig::default();
        assert_eq!(config.min_num_views, 10);
        assert_eq!(config.grid_size, 0.05);
        assert_eq!(config.ransac.failure_probability, 0.001);
        assert_eq!(config.ransac.max_iterations, 1000);
        assert_eq!(config.ransac.min_iterations, 5);
        assert!(config.ransac.use_mle);
        assert_eq!(config.bundle_adjustment.loss_width, 1.345);
        assert_eq!(config.prune_threshold_coarse, 5.0);
        assert_eq!(config.prune_threshold_fine, 2.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "camera_model: DOUBLE_SPHERE\noptimize_board_points: true\nransac:\n  seed: 9\n";
        let config: CalibratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.camera_model, CameraModelKind::DoubleSphere);
        assert!(config.optimize_board_points);
        assert_eq!(config.ransac.seed, 9);
        assert_eq!(config.ransac.max_iterations, 1000);
        assert_eq!(config.min_num_views, 10);
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let path = std::env::temp_dir().join(format!("calibrator_config_{}.yaml", std::process::id()));
        let config = CalibratorConfig {
            camera_model: CameraModelKind::Fisheye,
            min_num_views: 4,
            ..Default::default()
        };
        config.save_yaml(&path).unwrap();
        let loaded = CalibratorConfig::load_yaml(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = CalibratorConfig {
            min_num_views: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CalibrationError::InvalidConfig(_))));

        let mut config = CalibratorConfig::default();
        config.ransac.failure_probability = 1.0;
        assert!(config.validate().is_err());
    }
}
