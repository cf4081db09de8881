//! Error types shared across the calibration pipeline.

use crate::camera::CameraModelError;

/// Why a single frame could not be given an initial pose.
///
/// These never abort a run: the frame is skipped and counted.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InitializationFailure {
    #[error("frame has {found} correspondences, at least {required} are needed")]
    TooFewCorrespondences { found: usize, required: usize },
    #[error("no consensus pose: {inliers} of {total} correspondences agree")]
    NoConsensus { inliers: usize, total: usize },
    #[error("degenerate geometry: {0}")]
    Degenerate(String),
}

/// Errors raised while reading or writing calibration artifacts.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid scene: {0}")]
    InvalidScene(String),
    #[error("invalid calibration file: {0}")]
    InvalidCalibration(String),
}

/// Fatal errors of a calibration run.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("{stage}: {found} views remain, at least {required} are required")]
    InsufficientViews {
        stage: String,
        found: usize,
        required: usize,
    },
    #[error("optimization failed: {0}")]
    Optimization(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Camera(#[from] CameraModelError),
    #[error("failed to persist results: {0}")]
    Persistence(#[from] IoError),
}
