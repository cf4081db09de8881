//! End-to-end calibration run.
//!
//! [`CameraCalibrator`] ties the pipeline together: every frame is
//! initialized independently (in parallel), accepted frames become views in
//! timestamp order after deduplication, and the progressive bundle
//! adjustment refines the dataset. Fatal conditions are returned as
//! [`CalibrationError`]; per-frame failures are only counted.

use crate::camera::{Intrinsics, Resolution};
use crate::config::CalibratorConfig;
use crate::dataset::{CalibrationDataset, CameraPose};
use crate::dedup::PoseDeduplicator;
use crate::error::{CalibrationError, InitializationFailure};
use crate::initializer::{PoseEstimate, PoseInitializer};
use crate::optimization::schedule::{ProgressiveBundleAdjuster, StageReport};
use crate::pruning::{mean_reprojection_error, view_statistics, ViewStatistics};
use log::{debug, info};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;

/// Frames between two progress messages during initialization.
const PROGRESS_INTERVAL: usize = 100;

/// Board observations of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp_us: u64,
    /// `(board point index, pixel)` pairs.
    pub observations: Vec<(usize, Vector2<f64>)>,
}

/// Everything a run consumes: image geometry, the board and the frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub resolution: Resolution,
    pub fps: f64,
    pub board_points: Vec<Vector3<f64>>,
    pub frames: Vec<Frame>,
}

/// Counters collected while building the dataset and refining it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_processed: usize,
    pub initialization_failures: usize,
    pub duplicates_rejected: usize,
    pub views_added: usize,
    pub views_pruned: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub intrinsics: Intrinsics,
    pub fps: f64,
    /// Mean over views of the per-view RMS reprojection error.
    pub mean_reprojection_error: f64,
    pub view_statistics: Vec<ViewStatistics>,
    pub stats: RunStats,
    pub stage_reports: Vec<StageReport>,
    /// Poses right after initialization.
    pub initial_poses: Vec<CameraPose>,
    /// Poses after the last refinement stage.
    pub final_poses: Vec<CameraPose>,
    pub dataset: CalibrationDataset,
}

impl CalibrationOutcome {
    pub fn num_views(&self) -> usize {
        self.dataset.num_views()
    }
}

/// Mutable state scoped to one run.
#[derive(Debug)]
struct CalibrationRun {
    dedup: PoseDeduplicator,
    stats: RunStats,
}

pub struct CameraCalibrator {
    config: CalibratorConfig,
}

impl CameraCalibrator {
    pub fn new(config: CalibratorConfig) -> Result<Self, CalibrationError> {
        config.validate()?;
        Ok(CameraCalibrator { config })
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    pub fn bundle_adjuster(&self) -> ProgressiveBundleAdjuster {
        ProgressiveBundleAdjuster {
            model: self.config.camera_model,
            options: self.config.bundle_adjustment.clone(),
            prune_threshold_coarse: self.config.prune_threshold_coarse,
            prune_threshold_fine: self.config.prune_threshold_fine,
            min_num_views: self.config.min_num_views,
            optimize_board_points: self.config.optimize_board_points,
        }
    }

    fn frame_rng(&self, index: usize) -> StdRng {
        let seed = self
            .config
            .ransac
            .seed
            .wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        StdRng::seed_from_u64(seed)
    }

    /// Initialize every frame and build the dataset from the accepted ones.
    pub fn initialize(&self, scene: &Scene) -> Result<(CalibrationDataset, RunStats), CalibrationError> {
        if scene.resolution.width == 0 || scene.resolution.height == 0 {
            return Err(CalibrationError::InvalidConfig(
                "image size must be positive".to_string(),
            ));
        }
        let model = self.config.camera_model;
        let initializer = PoseInitializer::new(model, scene.resolution, &self.config.ransac);

        let mut frames: Vec<&Frame> = scene.frames.iter().collect();
        frames.sort_by_key(|f| f.timestamp_us);

        let estimates: Vec<Result<PoseEstimate, InitializationFailure>> = frames
            .par_iter()
            .enumerate()
            .map(|(index, frame)| {
                let correspondences: Vec<(Vector3<f64>, Vector2<f64>)> = frame
                    .observations
                    .iter()
                    .filter_map(|(id, pixel)| scene.board_points.get(*id).map(|x| (*x, *pixel)))
                    .collect();
                let mut rng = self.frame_rng(index);
                initializer.estimate(&correspondences, &mut rng)
            })
            .collect();

        let mut dataset = CalibrationDataset::new(model, scene.resolution);
        for point in &scene.board_points {
            dataset.add_track(*point);
        }

        let mut run = CalibrationRun {
            dedup: PoseDeduplicator::new(self.config.grid_size),
            stats: RunStats::default(),
        };
        let total = frames.len();
        for (frame, estimate) in frames.into_iter().zip(estimates) {
            run.stats.frames_processed += 1;
            if run.stats.frames_processed % PROGRESS_INTERVAL == 0 {
                info!(
                    "Initialized {} of {} frames ({} views)",
                    run.stats.frames_processed,
                    total,
                    dataset.num_views()
                );
            }
            let estimate = match estimate {
                Ok(estimate) => estimate,
                Err(failure) => {
                    debug!("frame {}: {}", frame.timestamp_us, failure);
                    run.stats.initialization_failures += 1;
                    continue;
                }
            };
            if !run.dedup.try_accept(&estimate.position) {
                run.stats.duplicates_rejected += 1;
                continue;
            }
            let view = dataset.add_view(frame.timestamp_us, &estimate);
            for (track, pixel) in &frame.observations {
                if *track < scene.board_points.len() && !dataset.add_observation(view, *track, *pixel) {
                    debug!("frame {}: duplicate observation of point {}", frame.timestamp_us, track);
                }
            }
            run.stats.views_added += 1;
        }

        info!(
            "Initialized {} views from {} frames ({} failed, {} duplicates)",
            dataset.num_views(),
            run.stats.frames_processed,
            run.stats.initialization_failures,
            run.stats.duplicates_rejected
        );
        Ok((dataset, run.stats))
    }

    /// Run the full pipeline on `scene`.
    pub fn calibrate(&self, scene: &Scene) -> Result<CalibrationOutcome, CalibrationError> {
        let (mut dataset, mut stats) = self.initialize(scene)?;
        let initial_poses = dataset.poses();

        if dataset.num_views() < self.config.min_num_views {
            return Err(CalibrationError::InsufficientViews {
                stage: "initialization".to_string(),
                found: dataset.num_views(),
                required: self.config.min_num_views,
            });
        }

        let stage_reports = self.bundle_adjuster().run(&mut dataset)?;
        stats.views_pruned = stage_reports.iter().map(|r| r.pruned.len()).sum();

        let intrinsics = dataset.shared_intrinsics().clone();
        intrinsics.validate_params()?;
        let mean_error = mean_reprojection_error(&dataset);
        info!(
            "Calibrated {} from {} views, mean reprojection error {:.4} px",
            intrinsics.model,
            dataset.num_views(),
            mean_error
        );

        Ok(CalibrationOutcome {
            intrinsics,
            fps: scene.fps,
            mean_reprojection_error: mean_error,
            view_statistics: view_statistics(&dataset),
            stats,
            stage_reports,
            initial_poses,
            final_poses: dataset.poses(),
            dataset,
        })
    }

    /// Calibrate and write the artifacts under `output_prefix`.
    ///
    /// Nothing is written when calibration fails. A write failure is
    /// returned as [`CalibrationError::Persistence`].
    pub fn calibrate_and_save(
        &self,
        scene: &Scene,
        output_prefix: impl AsRef<Path>,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let outcome = self.calibrate(scene)?;
        crate::io::write_outputs(output_prefix, &outcome)?;
        Ok(outcome)
    }
}
