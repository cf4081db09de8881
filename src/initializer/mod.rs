//! Robust per-frame initialization of camera pose and focal length.
//!
//! Every frame is handled on its own: the board correspondences are centred
//! on the image centre, a model-dependent minimal solver runs inside RANSAC,
//! and the best hypothesis is optionally polished on its inliers.
//!
//! The plain pinhole models use [`UncalibratedPoseEstimator`]. All other
//! models use [`RadialPoseEstimator`], which additionally returns a division
//! distortion coefficient that seeds the division model and is ignored by the
//! rest.

use crate::camera::{CameraModelKind, Resolution};
use crate::error::InitializationFailure;
use crate::geometry::{angle_axis_from_matrix, camera_center, project_to_so3, rotation_matrix};
use crate::geometry::plane::PlaneFrame;
use crate::optimization::ViewReprojectionFactor;
use log::debug;
use nalgebra::{DVector, Vector2, Vector3};
use rand::rngs::StdRng;
use std::collections::HashMap;
use tiny_solver::optimizer::OptimizerOptions;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

pub mod ransac;
pub mod solvers;

pub use ransac::{ransac, Estimator, RansacParams, RansacSummary};
pub use solvers::{Correspondence, PoseHypothesis, RadialPoseEstimator, UncalibratedPoseEstimator};

/// Fraction of the image height used as the inlier threshold.
pub const ERROR_THRESH_IMAGE_FRACTION: f64 = 0.003;

/// Relative out-of-plane tolerance below which a board counts as planar.
const PLANARITY_TOLERANCE: f64 = 1e-6;

/// Initial pose of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Angle-axis rotation from the world into the camera frame.
    pub rotation: Vector3<f64>,
    /// Camera centre in the world frame.
    pub position: Vector3<f64>,
    pub focal_length: f64,
    /// Division coefficient, only produced by the radial solver.
    pub radial_distortion: Option<f64>,
    pub num_inliers: usize,
}

/// Which minimal solver a camera model is initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Uncalibrated,
    Radial,
}

impl SolverKind {
    pub fn for_model(model: CameraModelKind) -> Self {
        match model {
            CameraModelKind::Pinhole | CameraModelKind::PinholeRadialTangential => {
                SolverKind::Uncalibrated
            }
            CameraModelKind::DivisionUndistortion
            | CameraModelKind::DoubleSphere
            | CameraModelKind::ExtendedUnified
            | CameraModelKind::Fisheye => SolverKind::Radial,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoseInitializer {
    model: CameraModelKind,
    resolution: Resolution,
    params: RansacParams,
}

impl PoseInitializer {
    /// The inlier threshold of `params` is replaced by 0.3 % of the image
    /// height.
    pub fn new(model: CameraModelKind, resolution: Resolution, params: &RansacParams) -> Self {
        let mut params = params.clone();
        params.error_thresh = ERROR_THRESH_IMAGE_FRACTION * resolution.height as f64;
        PoseInitializer {
            model,
            resolution,
            params,
        }
    }

    pub fn params(&self) -> &RansacParams {
        &self.params
    }

    pub fn solver(&self) -> SolverKind {
        SolverKind::for_model(self.model)
    }

    fn image_center(&self) -> Vector2<f64> {
        Vector2::new(
            self.resolution.width as f64 / 2.0,
            self.resolution.height as f64 / 2.0,
        )
    }

    /// Estimate the pose of a frame from `(board point, pixel)` pairs.
    pub fn estimate(
        &self,
        observations: &[(Vector3<f64>, Vector2<f64>)],
        rng: &mut StdRng,
    ) -> Result<PoseEstimate, InitializationFailure> {
        let center = self.image_center();
        let data: Vec<Correspondence> = observations
            .iter()
            .map(|(world, pixel)| Correspondence {
                world: *world,
                pixel: pixel - center,
            })
            .collect();
        let worlds: Vec<Vector3<f64>> = data.iter().map(|c| c.world).collect();
        let plane = PlaneFrame::fit(&worlds, PLANARITY_TOLERANCE);

        match (self.solver(), plane) {
            (SolverKind::Radial, Some(plane)) => {
                self.run(&RadialPoseEstimator::new(plane), &data, true, rng)
            }
            (SolverKind::Radial, None) => {
                debug!("board is not planar, initializing without distortion");
                self.run(&UncalibratedPoseEstimator::new(None), &data, false, rng)
            }
            (SolverKind::Uncalibrated, plane) => {
                self.run(&UncalibratedPoseEstimator::new(plane), &data, false, rng)
            }
        }
    }

    fn run<E>(
        &self,
        estimator: &E,
        data: &[Correspondence],
        estimates_distortion: bool,
        rng: &mut StdRng,
    ) -> Result<PoseEstimate, InitializationFailure>
    where
        E: Estimator<Datum = Correspondence, Model = PoseHypothesis>,
    {
        let required = estimator.sample_size();
        if data.len() < required {
            return Err(InitializationFailure::TooFewCorrespondences {
                found: data.len(),
                required,
            });
        }

        let summary = ransac(estimator, data, &self.params, rng);
        let Some(mut hypothesis) = summary.model else {
            return Err(InitializationFailure::NoConsensus {
                inliers: 0,
                total: data.len(),
            });
        };
        let ratio = summary.inliers.len() as f64 / data.len() as f64;
        if summary.inliers.len() < required || ratio < self.params.min_inlier_ratio {
            return Err(InitializationFailure::NoConsensus {
                inliers: summary.inliers.len(),
                total: data.len(),
            });
        }

        if self.params.use_mle {
            let inliers: Vec<Correspondence> =
                summary.inliers.iter().map(|&i| data[i].clone()).collect();
            if let Some(refined) = refine_hypothesis(&hypothesis, &inliers, estimates_distortion) {
                if inlier_rms(&refined, &inliers) <= inlier_rms(&hypothesis, &inliers) {
                    hypothesis = refined;
                }
            }
        }

        if !(hypothesis.focal_length > 0.0) || !hypothesis.focal_length.is_finite() {
            return Err(InitializationFailure::Degenerate(format!(
                "focal length {}",
                hypothesis.focal_length
            )));
        }
        let rotation = project_to_so3(&hypothesis.rotation)
            .ok_or_else(|| InitializationFailure::Degenerate("rotation".to_string()))?;

        Ok(PoseEstimate {
            rotation: angle_axis_from_matrix(&rotation),
            position: camera_center(&rotation, &hypothesis.translation),
            focal_length: hypothesis.focal_length,
            radial_distortion: estimates_distortion.then_some(hypothesis.radial_distortion),
            num_inliers: summary.inliers.len(),
        })
    }
}

fn inlier_rms(hypothesis: &PoseHypothesis, inliers: &[Correspondence]) -> f64 {
    let sum: f64 = inliers
        .iter()
        .map(|c| hypothesis.reprojection_error(c).powi(2))
        .sum();
    (sum / inliers.len().max(1) as f64).sqrt()
}

/// Least-squares polish of pose, focal length and optionally distortion on
/// the inlier set.
fn refine_hypothesis(
    hypothesis: &PoseHypothesis,
    inliers: &[Correspondence],
    estimates_distortion: bool,
) -> Option<PoseHypothesis> {
    let rotation = angle_axis_from_matrix(&project_to_so3(&hypothesis.rotation)?);
    let position = camera_center(&rotation_matrix(&rotation), &hypothesis.translation);
    let intrinsics = vec![
        hypothesis.focal_length,
        1.0,
        0.0,
        0.0,
        hypothesis.radial_distortion,
    ];
    let free_intrinsics = if estimates_distortion { vec![0, 4] } else { vec![0] };

    let factor = ViewReprojectionFactor {
        model: CameraModelKind::DivisionUndistortion,
        rotation,
        position,
        intrinsics,
        free_intrinsics: free_intrinsics.clone(),
        pose_free: true,
        points: inliers.iter().map(|c| c.world.push(1.0)).collect(),
        observed: inliers.iter().map(|c| c.pixel).collect(),
    };
    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(
        factor.num_residuals(),
        &["rotation", "position", "intrinsics"],
        Box::new(factor),
        None,
    );

    let mut initial_values = HashMap::new();
    initial_values.insert(
        "rotation".to_string(),
        DVector::from_column_slice(rotation.as_slice()),
    );
    initial_values.insert(
        "position".to_string(),
        DVector::from_column_slice(position.as_slice()),
    );
    initial_values.insert(
        "intrinsics".to_string(),
        DVector::from_iterator(
            free_intrinsics.len(),
            free_intrinsics.iter().map(|&i| {
                if i == 0 {
                    hypothesis.focal_length
                } else {
                    hypothesis.radial_distortion
                }
            }),
        ),
    );

    let options = OptimizerOptions {
        max_iteration: 50,
        ..Default::default()
    };
    let result = LevenbergMarquardtOptimizer::default().optimize(&problem, &initial_values, Some(options))?;
    let r = result.get("rotation")?;
    let p = result.get("position")?;
    let k = result.get("intrinsics")?;

    let rotation = rotation_matrix(&Vector3::new(r[0], r[1], r[2]));
    let position = Vector3::new(p[0], p[1], p[2]);
    let refined = PoseHypothesis {
        rotation,
        translation: -(rotation * position),
        focal_length: k[0],
        radial_distortion: if estimates_distortion { k[1] } else { 0.0 },
    };
    let finite = refined.focal_length.is_finite()
        && refined.radial_distortion.is_finite()
        && refined.translation.iter().all(|v| v.is_finite());
    finite.then_some(refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use crate::geometry::world_to_camera;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn vga() -> Resolution {
        Resolution {
            width: 640,
            height: 480,
        }
    }

    fn board() -> Vec<Vector3<f64>> {
        (0..63)
            .map(|i| Vector3::new((i % 9) as f64 * 0.04, (i / 9) as f64 * 0.04, 0.0))
            .collect()
    }

    fn frame(
        intrinsics: &Intrinsics,
        rotation: &Vector3<f64>,
        position: &Vector3<f64>,
    ) -> Vec<(Vector3<f64>, Vector2<f64>)> {
        board()
            .into_iter()
            .map(|x| {
                let pixel = intrinsics
                    .project(&world_to_camera(rotation, position, &x))
                    .unwrap();
                (x, pixel)
            })
            .collect()
    }

    #[test]
    fn test_threshold_scales_with_image_height() {
        let initializer =
            PoseInitializer::new(CameraModelKind::Pinhole, vga(), &RansacParams::default());
        assert_relative_eq!(initializer.params().error_thresh, 1.44, epsilon = 1e-12);
    }

    #[test]
    fn test_solver_dispatch() {
        assert_eq!(SolverKind::for_model(CameraModelKind::Pinhole), SolverKind::Uncalibrated);
        assert_eq!(
            SolverKind::for_model(CameraModelKind::PinholeRadialTangential),
            SolverKind::Uncalibrated
        );
        for model in [
            CameraModelKind::DivisionUndistortion,
            CameraModelKind::DoubleSphere,
            CameraModelKind::ExtendedUnified,
            CameraModelKind::Fisheye,
        ] {
            assert_eq!(SolverKind::for_model(model), SolverKind::Radial);
        }
    }

    #[test]
    fn test_pinhole_pose_with_outliers() {
        let truth = Intrinsics::new(CameraModelKind::Pinhole, vga(), 800.0);
        let rotation = Vector3::new(0.25, -0.2, 0.05);
        let position = Vector3::new(0.1, 0.05, -0.7);
        let mut observations = frame(&truth, &rotation, &position);
        for (i, obs) in observations.iter_mut().enumerate().step_by(9) {
            obs.1 += Vector2::new(25.0 + i as f64, -30.0);
        }

        let initializer =
            PoseInitializer::new(CameraModelKind::Pinhole, vga(), &RansacParams::default());
        let mut rng = StdRng::seed_from_u64(3);
        let estimate = initializer.estimate(&observations, &mut rng).unwrap();

        assert_eq!(estimate.num_inliers, 56);
        assert_relative_eq!(estimate.focal_length, 800.0, max_relative = 1e-4);
        assert_relative_eq!(estimate.rotation, rotation, epsilon = 1e-4);
        assert_relative_eq!(estimate.position, position, epsilon = 1e-4);
        assert!(estimate.radial_distortion.is_none());
    }

    #[test]
    fn test_division_model_pose_and_distortion() {
        let mut truth = Intrinsics::new(CameraModelKind::DivisionUndistortion, vga(), 500.0);
        truth.set_parameter("k", -0.1).unwrap();
        let rotation = Vector3::new(-0.2, 0.3, 0.0);
        let position = Vector3::new(0.2, 0.1, -0.5);
        let observations = frame(&truth, &rotation, &position);

        let initializer = PoseInitializer::new(
            CameraModelKind::DivisionUndistortion,
            vga(),
            &RansacParams::default(),
        );
        let mut rng = StdRng::seed_from_u64(11);
        let estimate = initializer.estimate(&observations, &mut rng).unwrap();

        assert_relative_eq!(estimate.focal_length, 500.0, max_relative = 1e-4);
        assert_relative_eq!(estimate.radial_distortion.unwrap(), -0.1, epsilon = 1e-4);
        assert_relative_eq!(estimate.position, position, epsilon = 1e-4);
    }

    #[test]
    fn test_too_few_correspondences() {
        let initializer =
            PoseInitializer::new(CameraModelKind::Fisheye, vga(), &RansacParams::default());
        let observations = vec![(Vector3::new(0.0, 0.0, 0.0), Vector2::new(1.0, 2.0)); 3];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            initializer.estimate(&observations, &mut rng),
            Err(InitializationFailure::TooFewCorrespondences { .. })
        ));
    }

    #[test]
    fn test_random_pixels_have_no_consensus() {
        let initializer =
            PoseInitializer::new(CameraModelKind::Pinhole, vga(), &RansacParams::default());
        let observations: Vec<_> = board()
            .into_iter()
            .enumerate()
            .map(|(i, x)| {
                let u = ((i * 7919) % 640) as f64;
                let v = ((i * 104_729) % 480) as f64;
                (x, Vector2::new(u, v))
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(5);
        assert!(initializer.estimate(&observations, &mut rng).is_err());
    }

    #[test]
    fn test_minority_consensus_needs_a_lower_inlier_ratio() {
        let truth = Intrinsics::new(CameraModelKind::Pinhole, vga(), 800.0);
        let rotation = Vector3::new(0.25, -0.2, 0.05);
        let position = Vector3::new(0.1, 0.05, -0.7);
        let mut observations = frame(&truth, &rotation, &position);
        for (i, obs) in observations.iter_mut().enumerate().filter(|(i, _)| i % 7 >= 3) {
            let du = 20.0 + ((i * 7919) % 97) as f64;
            let dv = -20.0 - ((i * 104_729) % 89) as f64;
            obs.1 += Vector2::new(du, dv);
        }

        let strict = PoseInitializer::new(CameraModelKind::Pinhole, vga(), &RansacParams::default());
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(
            strict.estimate(&observations, &mut rng),
            Err(InitializationFailure::NoConsensus { inliers: 27, total: 63 })
        ));

        let params = RansacParams {
            min_inlier_ratio: 0.0,
            ..Default::default()
        };
        let lenient = PoseInitializer::new(CameraModelKind::Pinhole, vga(), &params);
        let mut rng = StdRng::seed_from_u64(3);
        let estimate = lenient.estimate(&observations, &mut rng).unwrap();
        assert_eq!(estimate.num_inliers, 27);
        assert_relative_eq!(estimate.focal_length, 800.0, max_relative = 1e-3);
    }
}
