//! Camera Calibrator Library
//!
//! Intrinsic calibration of a single camera from views of a known
//! calibration board. Each frame is given an initial pose by a robust
//! minimal solver, near-duplicate poses are dropped, and a progressive
//! bundle adjustment refines intrinsics and poses while removing views
//! that do not fit.
//!
//! Supported camera models:
//! - Pinhole (with two radial coefficients)
//! - Pinhole with radial-tangential distortion
//! - Division undistortion
//! - Double Sphere
//! - Extended Unified Camera Model (EUCM)
//! - Kannala-Brandt fisheye
//!
//! Optimization runs on the tiny-solver framework.

pub mod calibrator;
pub mod camera;
pub mod config;
pub mod dataset;
pub mod dedup;
pub mod error;
pub mod geometry;
pub mod initializer;
pub mod io;
pub mod optimization;
pub mod pruning;
pub mod synthetic;

// Re-export commonly used types
pub use calibrator::{CalibrationOutcome, CameraCalibrator, Frame, RunStats, Scene};
pub use camera::{CameraModel, CameraModelError, CameraModelKind, Intrinsics, Resolution};
pub use config::CalibratorConfig;
pub use dataset::{CalibrationDataset, CameraPose, TrackId, ViewId};
pub use error::{CalibrationError, InitializationFailure, IoError};
pub use optimization::{BundleAdjustmentOptions, ProgressiveBundleAdjuster, Stage};
