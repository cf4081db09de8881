//! Bundle adjustment of calibration datasets.
//!
//! Problems are assembled for `tiny_solver` from the current state of a
//! [`CalibrationDataset`]: one residual block per view (or per track when
//! board points are refined), a Huber loss on every block, and only the
//! parameter blocks selected for the current stage as variables. The solver
//! runs inside a dedicated `rayon` pool so the thread count is configurable.
//!
//! The staged schedule built on top of these calls lives in [`schedule`].

use crate::camera::{CameraModelKind, ParameterCategory, ASPECT_RATIO, FOCAL_LENGTH};
use crate::camera::{PRINCIPAL_POINT_X, PRINCIPAL_POINT_Y};
use crate::dataset::CalibrationDataset;
use crate::error::CalibrationError;
use log::{debug, warn};
use nalgebra::{DVector, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};
use tiny_solver::loss_functions::HuberLoss;
use tiny_solver::optimizer::OptimizerOptions;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

pub mod factors;
pub mod schedule;

pub use factors::{TrackObservation, TrackReprojectionFactor, ViewReprojectionFactor};
pub use schedule::{ProgressiveBundleAdjuster, Stage};

/// Summary statistics of a set of reprojection errors, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl ProjectionError {
    /// Statistics of `errors`; all fields are infinite for an empty set.
    pub fn from_errors(errors: &[f64]) -> Self {
        if errors.is_empty() {
            return ProjectionError {
                rmse: f64::INFINITY,
                min: f64::INFINITY,
                max: f64::INFINITY,
                mean: f64::INFINITY,
                stddev: f64::INFINITY,
                median: f64::INFINITY,
            };
        }
        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
        let variance = errors.iter().map(|e| (e - mean) * (e - mean)).sum::<f64>() / n;

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            0.5 * (sorted[mid - 1] + sorted[mid])
        } else {
            sorted[mid]
        };

        ProjectionError {
            rmse,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            stddev: variance.sqrt(),
            median,
        }
    }
}

/// Set of intrinsic parameter groups to refine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeIntrinsics(u8);

impl OptimizeIntrinsics {
    pub const NONE: OptimizeIntrinsics = OptimizeIntrinsics(0);
    pub const FOCAL_LENGTH: OptimizeIntrinsics = OptimizeIntrinsics(1);
    pub const ASPECT_RATIO: OptimizeIntrinsics = OptimizeIntrinsics(1 << 1);
    pub const PRINCIPAL_POINTS: OptimizeIntrinsics = OptimizeIntrinsics(1 << 2);
    pub const RADIAL_DISTORTION: OptimizeIntrinsics = OptimizeIntrinsics(1 << 3);
    pub const TANGENTIAL_DISTORTION: OptimizeIntrinsics = OptimizeIntrinsics(1 << 4);

    pub fn contains(self, other: OptimizeIntrinsics) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Indices into the intrinsics vector of `model` selected by this mask,
    /// in ascending order.
    pub fn free_indices(self, model: CameraModelKind) -> Vec<usize> {
        let mut indices = Vec::new();
        if self.contains(Self::FOCAL_LENGTH) {
            indices.push(FOCAL_LENGTH);
        }
        if self.contains(Self::ASPECT_RATIO) {
            indices.push(ASPECT_RATIO);
        }
        if self.contains(Self::PRINCIPAL_POINTS) {
            indices.push(PRINCIPAL_POINT_X);
            indices.push(PRINCIPAL_POINT_Y);
        }
        if self.contains(Self::RADIAL_DISTORTION) {
            indices.extend(model.indices_of(ParameterCategory::Radial));
        }
        if self.contains(Self::TANGENTIAL_DISTORTION) {
            indices.extend(model.indices_of(ParameterCategory::Tangential));
        }
        indices.sort_unstable();
        indices
    }
}

impl BitOr for OptimizeIntrinsics {
    type Output = OptimizeIntrinsics;

    fn bitor(self, rhs: OptimizeIntrinsics) -> OptimizeIntrinsics {
        OptimizeIntrinsics(self.0 | rhs.0)
    }
}

impl BitOrAssign for OptimizeIntrinsics {
    fn bitor_assign(&mut self, rhs: OptimizeIntrinsics) {
        self.0 |= rhs.0;
    }
}

/// Solver settings shared by every bundle-adjustment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleAdjustmentOptions {
    /// Width of the Huber loss, in pixels.
    pub loss_width: f64,
    /// Worker threads; 0 uses the available hardware concurrency.
    pub num_threads: usize,
    pub max_iterations: usize,
}

impl Default for BundleAdjustmentOptions {
    fn default() -> Self {
        BundleAdjustmentOptions {
            loss_width: 1.345,
            num_threads: 0,
            max_iterations: 100,
        }
    }
}

/// What a single bundle adjustment call changed.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleAdjustmentSummary {
    pub num_residual_blocks: usize,
    pub num_residuals: usize,
}

/// Parameter blocks by name, as returned by the solver.
type SolverValues = HashMap<String, DVector<f64>>;
type PoolResult = Result<(BundleAdjustmentSummary, SolverValues), CalibrationError>;

fn rotation_key(view: usize) -> String {
    format!("rotation_{}", view)
}

fn position_key(view: usize) -> String {
    format!("position_{}", view)
}

fn intrinsics_key(group: usize) -> String {
    format!("intrinsics_{}", group)
}

fn track_key(track: usize) -> String {
    format!("track_{}", track)
}

fn run_in_pool<R: Send>(
    num_threads: usize,
    job: impl FnOnce() -> R + Send,
) -> Result<R, CalibrationError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| CalibrationError::Optimization(format!("thread pool: {}", e)))?;
    Ok(pool.install(job))
}

fn solve(
    problem: &tiny_solver::Problem,
    initial_values: &HashMap<String, DVector<f64>>,
    options: &BundleAdjustmentOptions,
) -> Result<HashMap<String, DVector<f64>>, CalibrationError> {
    let optimizer = LevenbergMarquardtOptimizer::default();
    let solver_options = OptimizerOptions {
        max_iteration: options.max_iterations,
        ..Default::default()
    };
    optimizer
        .optimize(problem, initial_values, Some(solver_options))
        .ok_or_else(|| CalibrationError::Optimization("Levenberg-Marquardt failed".to_string()))
}

/// Refine view poses and the selected intrinsics with all tracks held fixed.
pub fn bundle_adjust_views(
    dataset: &mut CalibrationDataset,
    options: &BundleAdjustmentOptions,
    intrinsics_to_optimize: OptimizeIntrinsics,
    pose_free: bool,
) -> Result<BundleAdjustmentSummary, CalibrationError> {
    let model = dataset.model();
    let free_intrinsics = intrinsics_to_optimize.free_indices(model);
    if free_intrinsics.is_empty() && !pose_free {
        return Ok(BundleAdjustmentSummary {
            num_residual_blocks: 0,
            num_residuals: 0,
        });
    }

    let snapshot: &CalibrationDataset = dataset;
    let outcome = run_in_pool(options.num_threads, || -> PoolResult {
        let mut problem = tiny_solver::Problem::new();
        let mut initial_values = HashMap::new();
        let mut summary = BundleAdjustmentSummary {
            num_residual_blocks: 0,
            num_residuals: 0,
        };

        for view in snapshot.views() {
            let Some(intrinsics) = snapshot.intrinsics(view.intrinsics_group) else {
                warn!("view {} has no intrinsics group {}", view.id, view.intrinsics_group);
                continue;
            };
            let mut points = Vec::new();
            let mut observed = Vec::new();
            for (track, pixel) in snapshot.observations_of(view.id) {
                if let Some(t) = snapshot.track(track) {
                    points.push(t.point);
                    observed.push(*pixel);
                }
            }
            if observed.is_empty() {
                continue;
            }

            let mut keys = Vec::new();
            if pose_free {
                keys.push(rotation_key(view.id));
                keys.push(position_key(view.id));
                initial_values.insert(
                    rotation_key(view.id),
                    DVector::from_column_slice(view.rotation.as_slice()),
                );
                initial_values.insert(
                    position_key(view.id),
                    DVector::from_column_slice(view.position.as_slice()),
                );
            }
            if !free_intrinsics.is_empty() {
                keys.push(intrinsics_key(view.intrinsics_group));
                initial_values.insert(
                    intrinsics_key(view.intrinsics_group),
                    DVector::from_iterator(
                        free_intrinsics.len(),
                        free_intrinsics.iter().map(|&i| intrinsics.parameters[i]),
                    ),
                );
            }

            let factor = ViewReprojectionFactor {
                model,
                rotation: view.rotation,
                position: view.position,
                intrinsics: intrinsics.parameters.clone(),
                free_intrinsics: free_intrinsics.clone(),
                pose_free,
                points,
                observed,
            };
            let num_residuals = factor.num_residuals();
            let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            problem.add_residual_block(
                num_residuals,
                &key_refs,
                Box::new(factor),
                Some(Box::new(HuberLoss::new(options.loss_width))),
            );
            summary.num_residual_blocks += 1;
            summary.num_residuals += num_residuals;
        }

        if summary.num_residual_blocks == 0 {
            return Ok((summary, HashMap::new()));
        }
        debug!(
            "bundle adjusting {} views ({} residuals, {} free intrinsics, pose {})",
            summary.num_residual_blocks,
            summary.num_residuals,
            free_intrinsics.len(),
            if pose_free { "free" } else { "fixed" }
        );
        let result = solve(&problem, &initial_values, options)?;
        Ok((summary, result))
    })?;
    let (summary, result) = outcome?;

    for id in dataset.view_ids() {
        let group = match dataset.view(id) {
            Some(view) => view.intrinsics_group,
            None => continue,
        };
        if pose_free {
            if let (Some(r), Some(p)) = (
                result.get(&rotation_key(id)),
                result.get(&position_key(id)),
            ) {
                if let Some(view) = dataset.view_mut(id) {
                    view.rotation = Vector3::new(r[0], r[1], r[2]);
                    view.position = Vector3::new(p[0], p[1], p[2]);
                }
            }
        }
        if let (Some(values), Some(intrinsics)) = (
            result.get(&intrinsics_key(group)),
            dataset.intrinsics_mut(group),
        ) {
            for (slot, &index) in free_intrinsics.iter().enumerate() {
                intrinsics.parameters[index] = values[slot];
            }
        }
    }

    Ok(summary)
}

/// Refine the homogeneous board points with all views held fixed.
///
/// Each refined point is rescaled to unit norm with a non-negative last
/// coordinate.
pub fn bundle_adjust_tracks(
    dataset: &mut CalibrationDataset,
    options: &BundleAdjustmentOptions,
) -> Result<BundleAdjustmentSummary, CalibrationError> {
    let model = dataset.model();
    let snapshot: &CalibrationDataset = dataset;
    let outcome = run_in_pool(options.num_threads, || -> PoolResult {
        let mut problem = tiny_solver::Problem::new();
        let mut initial_values = HashMap::new();
        let mut summary = BundleAdjustmentSummary {
            num_residual_blocks: 0,
            num_residuals: 0,
        };

        for track in snapshot.tracks() {
            let observations: Vec<TrackObservation> = snapshot
                .observations_of_track(track.id)
                .into_iter()
                .filter_map(|(view_id, pixel)| {
                    let view = snapshot.view(view_id)?;
                    let intrinsics = snapshot.intrinsics(view.intrinsics_group)?;
                    Some(TrackObservation {
                        rotation: view.rotation,
                        position: view.position,
                        intrinsics: intrinsics.parameters.clone(),
                        observed: pixel,
                    })
                })
                .collect();
            if observations.is_empty() {
                continue;
            }
            let factor = TrackReprojectionFactor {
                model,
                observations,
            };
            let num_residuals = factor.num_residuals();
            let key = track_key(track.id);
            problem.add_residual_block(
                num_residuals,
                &[key.as_str()],
                Box::new(factor),
                Some(Box::new(HuberLoss::new(options.loss_width))),
            );
            initial_values.insert(key, DVector::from_column_slice(track.point.as_slice()));
            summary.num_residual_blocks += 1;
            summary.num_residuals += num_residuals;
        }

        if summary.num_residual_blocks == 0 {
            return Ok((summary, HashMap::new()));
        }
        debug!(
            "bundle adjusting {} tracks ({} residuals)",
            summary.num_residual_blocks, summary.num_residuals
        );
        let result = solve(&problem, &initial_values, options)?;
        Ok((summary, result))
    })?;
    let (summary, result) = outcome?;

    for id in dataset.track_ids() {
        let Some(values) = result.get(&track_key(id)) else {
            continue;
        };
        let mut point = Vector4::new(values[0], values[1], values[2], values[3]);
        let norm = point.norm();
        if !(norm > f64::EPSILON) || !norm.is_finite() {
            warn!("track {} degenerated during refinement, keeping previous value", id);
            continue;
        }
        point /= norm;
        if point.w < 0.0 {
            point = -point;
        }
        if let Some(track) = dataset.track_mut(id) {
            track.point = point;
        }
    }

    Ok(summary)
}
