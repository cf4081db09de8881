//! Minimal solvers for the absolute pose of a camera with unknown focal
//! length.
//!
//! All solvers work on pixel coordinates relative to the principal point
//! and describe the camera as a division model `k` in normalized
//! coordinates with a single focal length. The uncalibrated solver always
//! returns `k = 0`.

use crate::camera::{CameraModel, DivisionUndistortionModel};
use crate::geometry::dlt::{decompose_projection, dlt_projection};
use crate::geometry::homography::{dlt_homography, focal_from_homography, null_vector, pose_from_homography};
use crate::geometry::plane::PlaneFrame;
use crate::initializer::ransac::Estimator;
use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};

/// A board point and where it was seen, relative to the principal point.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    pub world: Vector3<f64>,
    pub pixel: Vector2<f64>,
}

/// Camera hypothesis `p_cam = rotation * X + translation`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseHypothesis {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub focal_length: f64,
    /// Division coefficient in normalized coordinates.
    pub radial_distortion: f64,
}

impl PoseHypothesis {
    pub fn project(&self, world: &Vector3<f64>) -> Option<Vector2<f64>> {
        let p_cam = self.rotation * world + self.translation;
        let m = DivisionUndistortionModel::project_normalized(&[self.radial_distortion], &p_cam)
            .ok()?;
        Some(m * self.focal_length)
    }

    pub fn reprojection_error(&self, correspondence: &Correspondence) -> f64 {
        match self.project(&correspondence.world) {
            Some(p) => (p - correspondence.pixel).norm(),
            None => f64::INFINITY,
        }
    }

    /// Re-express a pose found in plane coordinates in the world frame.
    fn from_plane(
        frame: &PlaneFrame,
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        focal_length: f64,
        radial_distortion: f64,
    ) -> Self {
        let world_rotation = rotation * frame.basis.transpose();
        PoseHypothesis {
            rotation: world_rotation,
            translation: translation - world_rotation * frame.origin,
            focal_length,
            radial_distortion,
        }
    }
}

/// Pose and focal length of an ideal pinhole camera.
///
/// Planar boards are handled through a homography (4 points), other boards
/// through a DLT projection matrix (6 points).
#[derive(Debug, Clone)]
pub struct UncalibratedPoseEstimator {
    plane: Option<PlaneFrame>,
}

impl UncalibratedPoseEstimator {
    pub fn new(plane: Option<PlaneFrame>) -> Self {
        UncalibratedPoseEstimator { plane }
    }
}

impl Estimator for UncalibratedPoseEstimator {
    type Datum = Correspondence;
    type Model = PoseHypothesis;

    fn sample_size(&self) -> usize {
        if self.plane.is_some() {
            4
        } else {
            6
        }
    }

    fn estimate(&self, data: &[Correspondence], sample: &[usize]) -> Vec<PoseHypothesis> {
        match &self.plane {
            Some(frame) => {
                let plane: Vec<Vector2<f64>> =
                    sample.iter().map(|&i| frame.to_plane(&data[i].world)).collect();
                let image: Vec<Vector2<f64>> = sample.iter().map(|&i| data[i].pixel).collect();
                let Some(h) = dlt_homography(&plane, &image) else {
                    return Vec::new();
                };
                let Some(focal_length) = focal_from_homography(&h) else {
                    return Vec::new();
                };
                let Some((rotation, translation)) = pose_from_homography(&h, focal_length) else {
                    return Vec::new();
                };
                vec![PoseHypothesis::from_plane(
                    frame,
                    rotation,
                    translation,
                    focal_length,
                    0.0,
                )]
            }
            None => {
                let world: Vec<Vector3<f64>> = sample.iter().map(|&i| data[i].world).collect();
                let image: Vec<Vector2<f64>> = sample.iter().map(|&i| data[i].pixel).collect();
                let Some(p) = dlt_projection(&world, &image) else {
                    return Vec::new();
                };
                let Some((focal_length, rotation, center)) = decompose_projection(&p) else {
                    return Vec::new();
                };
                vec![PoseHypothesis {
                    rotation,
                    translation: -(rotation * center),
                    focal_length,
                    radial_distortion: 0.0,
                }]
            }
        }
    }

    fn error(&self, model: &PoseHypothesis, datum: &Correspondence) -> f64 {
        model.reprojection_error(datum)
    }
}

/// Pose, focal length and one division coefficient from five points on a
/// planar board.
///
/// Radial distortion preserves the direction of an image point from the
/// distortion centre, so `pixel x (r1 . X + t1, r2 . X + t2) = 0` constrains
/// the first two rows of the pose linearly. Orthonormality completes the
/// rotation up to a sign, after which depth, focal length and distortion
/// follow from a linear least-squares system.
#[derive(Debug, Clone)]
pub struct RadialPoseEstimator {
    plane: PlaneFrame,
}

impl RadialPoseEstimator {
    pub fn new(plane: PlaneFrame) -> Self {
        RadialPoseEstimator { plane }
    }

    fn solve_rows(&self, plane: &[Vector2<f64>], pixels: &[Vector2<f64>]) -> Option<[f64; 6]> {
        let mut a = DMatrix::<f64>::zeros(plane.len(), 6);
        for (i, (q, u)) in plane.iter().zip(pixels.iter()).enumerate() {
            let norm = u.norm();
            if norm <= f64::EPSILON {
                continue;
            }
            let (ux, uy) = (u.x / norm, u.y / norm);
            a[(i, 0)] = uy * q.x;
            a[(i, 1)] = uy * q.y;
            a[(i, 2)] = uy;
            a[(i, 3)] = -ux * q.x;
            a[(i, 4)] = -ux * q.y;
            a[(i, 5)] = -ux;
        }
        let v = null_vector(a)?;
        let mut rows = [0.0; 6];
        rows.copy_from_slice(&v);
        Some(rows)
    }

    /// Complete two scaled, truncated rotation rows into full rotations.
    fn complete_rotations(rows: &[f64; 6]) -> Vec<(Matrix3<f64>, f64, f64)> {
        let a = Vector2::new(rows[0], rows[1]);
        let b = Vector2::new(rows[3], rows[4]);
        let (na, nb, ab) = (a.norm_squared(), b.norm_squared(), a.dot(&b));
        let sum = na + nb;
        let disc = ((na - nb) * (na - nb) + 4.0 * ab * ab).sqrt();
        let scale_sq = 0.5 * (sum + disc);
        if !(scale_sq > f64::EPSILON) {
            return Vec::new();
        }
        let scale = scale_sq.sqrt();
        let (a, b) = (a / scale, b / scale);
        let (t1, t2) = (rows[2] / scale, rows[5] / scale);

        let c1_abs = (1.0 - a.norm_squared()).max(0.0).sqrt();
        let mut candidates = Vec::new();
        for sign in [1.0, -1.0] {
            let (c1, c2) = if c1_abs > 1e-8 {
                let c1 = sign * c1_abs;
                (c1, -a.dot(&b) / c1)
            } else {
                (0.0, sign * (1.0 - b.norm_squared()).max(0.0).sqrt())
            };
            let r1 = Vector3::new(a.x, a.y, c1);
            let r2 = Vector3::new(b.x, b.y, c2);
            let r3 = r1.cross(&r2);
            if r3.norm() < 1e-6 {
                continue;
            }
            let rotation = Matrix3::from_rows(&[r1.transpose(), r2.transpose(), r3.transpose()]);
            candidates.push((rotation, t1, t2));
        }
        candidates
    }

    /// Solve `u * (r3 . X + t3) = x_c * (f + f k' |u|^2)` for `t3`, `f` and `f k'`.
    fn solve_depth_and_focal(
        rotation: &Matrix3<f64>,
        t1: f64,
        t2: f64,
        plane: &[Vector2<f64>],
        pixels: &[Vector2<f64>],
    ) -> Option<(f64, f64, f64)> {
        let n = plane.len();
        let mut a = DMatrix::<f64>::zeros(2 * n, 3);
        let mut rhs = DVector::<f64>::zeros(2 * n);
        for (i, (q, u)) in plane.iter().zip(pixels.iter()).enumerate() {
            let x = Vector3::new(q.x, q.y, 0.0);
            let xc = rotation.row(0).dot(&x.transpose()) + t1;
            let yc = rotation.row(1).dot(&x.transpose()) + t2;
            let zp = rotation.row(2).dot(&x.transpose());
            let rho2 = u.norm_squared();
            a[(2 * i, 0)] = u.x;
            a[(2 * i, 1)] = -xc;
            a[(2 * i, 2)] = -xc * rho2;
            rhs[2 * i] = -u.x * zp;
            a[(2 * i + 1, 0)] = u.y;
            a[(2 * i + 1, 1)] = -yc;
            a[(2 * i + 1, 2)] = -yc * rho2;
            rhs[2 * i + 1] = -u.y * zp;
        }
        // Columns differ by orders of magnitude, so solve in scaled units.
        let mut col_scale = [1.0; 3];
        for (j, s) in col_scale.iter_mut().enumerate() {
            let norm = a.column(j).norm();
            if norm > f64::EPSILON {
                *s = norm;
            }
        }
        for j in 0..3 {
            let s = col_scale[j];
            a.column_mut(j).scale_mut(1.0 / s);
        }
        let solution = a.svd(true, true).solve(&rhs, 1e-12).ok()?;
        let t3 = solution[0] / col_scale[0];
        let focal_length = solution[1] / col_scale[1];
        let focal_k = solution[2] / col_scale[2];
        Some((t3, focal_length, focal_k))
    }
}

impl Estimator for RadialPoseEstimator {
    type Datum = Correspondence;
    type Model = PoseHypothesis;

    fn sample_size(&self) -> usize {
        5
    }

    fn estimate(&self, data: &[Correspondence], sample: &[usize]) -> Vec<PoseHypothesis> {
        let plane: Vec<Vector2<f64>> = sample
            .iter()
            .map(|&i| self.plane.to_plane(&data[i].world))
            .collect();
        let pixels: Vec<Vector2<f64>> = sample.iter().map(|&i| data[i].pixel).collect();
        let Some(mut rows) = self.solve_rows(&plane, &pixels) else {
            return Vec::new();
        };

        // Image points and the first two camera coordinates point the same way.
        let agreement: f64 = plane
            .iter()
            .zip(pixels.iter())
            .map(|(q, u)| {
                let xc = rows[0] * q.x + rows[1] * q.y + rows[2];
                let yc = rows[3] * q.x + rows[4] * q.y + rows[5];
                u.x * xc + u.y * yc
            })
            .sum();
        if agreement < 0.0 {
            rows.iter_mut().for_each(|v| *v = -*v);
        }

        let mut hypotheses = Vec::new();
        for (rotation, t1, t2) in Self::complete_rotations(&rows) {
            let Some((t3, focal_length, focal_k)) =
                Self::solve_depth_and_focal(&rotation, t1, t2, &plane, &pixels)
            else {
                continue;
            };
            if !(focal_length > 0.0) || !focal_length.is_finite() {
                continue;
            }
            let translation = Vector3::new(t1, t2, t3);
            let in_front = plane
                .iter()
                .all(|q| (rotation * Vector3::new(q.x, q.y, 0.0) + translation).z > 0.0);
            if !in_front {
                continue;
            }
            // k' = focal_k / f in pixels, k = k' f^2 in normalized coordinates.
            let radial_distortion = focal_k * focal_length;
            hypotheses.push(PoseHypothesis::from_plane(
                &self.plane,
                rotation,
                translation,
                focal_length,
                radial_distortion,
            ));
        }
        hypotheses
    }

    fn error(&self, model: &PoseHypothesis, datum: &Correspondence) -> f64 {
        model.reprojection_error(datum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rotation_matrix;
    use approx::assert_relative_eq;

    fn board() -> Vec<Vector3<f64>> {
        (0..30)
            .map(|i| Vector3::new((i % 6) as f64 * 0.04, (i / 6) as f64 * 0.04, 0.0))
            .collect()
    }

    fn observe(truth: &PoseHypothesis, world: &[Vector3<f64>]) -> Vec<Correspondence> {
        world
            .iter()
            .map(|x| Correspondence {
                world: *x,
                pixel: truth.project(x).unwrap(),
            })
            .collect()
    }

    fn truth(radial_distortion: f64) -> PoseHypothesis {
        PoseHypothesis {
            rotation: rotation_matrix(&Vector3::new(0.35, -0.25, 0.1)),
            translation: Vector3::new(-0.1, -0.08, 0.6),
            focal_length: 640.0,
            radial_distortion,
        }
    }

    #[test]
    fn test_uncalibrated_planar_solver() {
        let truth = truth(0.0);
        let data = observe(&truth, &board());
        let estimator = UncalibratedPoseEstimator::new(PlaneFrame::fit(
            &data.iter().map(|c| c.world).collect::<Vec<_>>(),
            1e-6,
        ));
        assert_eq!(estimator.sample_size(), 4);
        let models = estimator.estimate(&data, &[0, 5, 24, 29]);
        assert_eq!(models.len(), 1);
        let model = &models[0];
        assert_relative_eq!(model.focal_length, 640.0, max_relative = 1e-6);
        assert_relative_eq!(model.rotation, truth.rotation, epsilon = 1e-6);
        assert_relative_eq!(model.translation, truth.translation, epsilon = 1e-6);
        for c in &data {
            assert!(estimator.error(model, c) < 1e-6);
        }
    }

    #[test]
    fn test_uncalibrated_non_planar_solver() {
        let truth = truth(0.0);
        let world: Vec<Vector3<f64>> = (0..12)
            .map(|i| Vector3::new((i % 3) as f64 * 0.1, ((i / 3) % 2) as f64 * 0.1, (i / 6) as f64 * 0.1))
            .collect();
        let data = observe(&truth, &world);
        let estimator = UncalibratedPoseEstimator::new(None);
        assert_eq!(estimator.sample_size(), 6);
        let all: Vec<usize> = (0..12).collect();
        let models = estimator.estimate(&data, &all);
        assert_eq!(models.len(), 1);
        assert_relative_eq!(models[0].focal_length, 640.0, max_relative = 1e-6);
        assert_relative_eq!(models[0].translation, truth.translation, epsilon = 1e-6);
    }

    #[test]
    fn test_radial_solver_recovers_distortion() {
        let truth = truth(-0.15);
        let data = observe(&truth, &board());
        let frame = PlaneFrame::fit(&board(), 1e-6).unwrap();
        let estimator = RadialPoseEstimator::new(frame);
        let models = estimator.estimate(&data, &[0, 5, 14, 24, 29]);
        let best = models
            .iter()
            .min_by(|a, b| {
                let ea: f64 = data.iter().map(|c| a.reprojection_error(c)).sum();
                let eb: f64 = data.iter().map(|c| b.reprojection_error(c)).sum();
                ea.total_cmp(&eb)
            })
            .unwrap();
        assert_relative_eq!(best.focal_length, 640.0, max_relative = 1e-6);
        assert_relative_eq!(best.radial_distortion, -0.15, epsilon = 1e-6);
        assert_relative_eq!(best.rotation, truth.rotation, epsilon = 1e-6);
        assert_relative_eq!(best.translation, truth.translation, epsilon = 1e-6);
    }

    #[test]
    fn test_point_behind_camera_has_infinite_error() {
        let model = truth(0.0);
        let c = Correspondence {
            world: Vector3::new(0.0, 0.0, -5.0),
            pixel: Vector2::zeros(),
        };
        // rotation * (0, 0, -5) puts the point behind the camera.
        assert!(model.reprojection_error(&c).is_infinite());
    }
}
