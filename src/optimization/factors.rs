//! Reprojection cost functions for `tiny_solver`.
//!
//! Fixed quantities are stored inside the factor as `f64` constants and only
//! the free blocks are passed to the solver as variables. A parameter that
//! is held constant during a stage therefore never appears in the problem.

use crate::camera::{self, CameraModelKind};
use crate::geometry::homogeneous_world_to_camera;
use nalgebra::{DVector, RealField, Vector2, Vector3, Vector4};
use tiny_solver::factors::Factor;

/// Residual assigned to each coordinate of an observation whose projection
/// is undefined under the current parameters.
pub const FAILED_PROJECTION_RESIDUAL: f64 = 1e3;

fn lift<T: RealField>(v: f64) -> T {
    nalgebra::convert(v)
}

fn lift3<T: RealField>(v: &Vector3<f64>) -> Vector3<T> {
    Vector3::new(lift(v.x), lift(v.y), lift(v.z))
}

fn lift4<T: RealField>(v: &Vector4<f64>) -> Vector4<T> {
    Vector4::new(lift(v.x), lift(v.y), lift(v.z), lift(v.w))
}

/// Pixel residual `projection - observed` of one homogeneous point.
pub fn reprojection_residual<T: RealField>(
    model: CameraModelKind,
    intrinsics: &[T],
    rotation: &Vector3<T>,
    position: &Vector3<T>,
    point: &Vector4<T>,
    observed: &Vector2<f64>,
) -> Vector2<T> {
    let p_cam = homogeneous_world_to_camera(rotation, position, point);
    match camera::project(model, intrinsics, &p_cam) {
        Ok(p) => Vector2::new(
            p.x.clone() - lift(observed.x),
            p.y.clone() - lift(observed.y),
        ),
        Err(_) => Vector2::new(
            lift(FAILED_PROJECTION_RESIDUAL),
            lift(FAILED_PROJECTION_RESIDUAL),
        ),
    }
}

/// All observations of one view.
///
/// Variables, in order: `[rotation, position]` when the pose is free, then
/// the vector of free intrinsics when `free_intrinsics` is not empty.
#[derive(Debug, Clone)]
pub struct ViewReprojectionFactor {
    pub model: CameraModelKind,
    pub rotation: Vector3<f64>,
    pub position: Vector3<f64>,
    pub intrinsics: Vec<f64>,
    pub free_intrinsics: Vec<usize>,
    pub pose_free: bool,
    pub points: Vec<Vector4<f64>>,
    pub observed: Vec<Vector2<f64>>,
}

impl ViewReprojectionFactor {
    pub fn num_residuals(&self) -> usize {
        2 * self.observed.len()
    }

    fn assemble_intrinsics<T: RealField>(&self, free: Option<&DVector<T>>) -> Vec<T> {
        let mut values: Vec<T> = self.intrinsics.iter().map(|&v| lift(v)).collect();
        if let Some(free) = free {
            for (slot, &index) in self.free_intrinsics.iter().enumerate() {
                values[index] = free[slot].clone();
            }
        }
        values
    }
}

impl<T: RealField> Factor<T> for ViewReprojectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let (rotation, position) = if self.pose_free {
            (
                Vector3::new(
                    params[0][0].clone(),
                    params[0][1].clone(),
                    params[0][2].clone(),
                ),
                Vector3::new(
                    params[1][0].clone(),
                    params[1][1].clone(),
                    params[1][2].clone(),
                ),
            )
        } else {
            (lift3(&self.rotation), lift3(&self.position))
        };
        let next = if self.pose_free { 2 } else { 0 };
        let free = (!self.free_intrinsics.is_empty()).then(|| &params[next]);
        let intrinsics = self.assemble_intrinsics(free);

        let mut residuals = DVector::zeros(self.num_residuals());
        for (i, (point, observed)) in self.points.iter().zip(self.observed.iter()).enumerate() {
            let r = reprojection_residual(
                self.model,
                &intrinsics,
                &rotation,
                &position,
                &lift4(point),
                observed,
            );
            residuals[2 * i] = r.x.clone();
            residuals[2 * i + 1] = r.y.clone();
        }
        residuals
    }
}

/// One view's pose and camera as seen by a track.
#[derive(Debug, Clone)]
pub struct TrackObservation {
    pub rotation: Vector3<f64>,
    pub position: Vector3<f64>,
    pub intrinsics: Vec<f64>,
    pub observed: Vector2<f64>,
}

/// All observations of one track, with the homogeneous point as the only
/// variable.
#[derive(Debug, Clone)]
pub struct TrackReprojectionFactor {
    pub model: CameraModelKind,
    pub observations: Vec<TrackObservation>,
}

impl TrackReprojectionFactor {
    pub fn num_residuals(&self) -> usize {
        2 * self.observations.len()
    }
}

impl<T: RealField> Factor<T> for TrackReprojectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let point = Vector4::new(
            params[0][0].clone(),
            params[0][1].clone(),
            params[0][2].clone(),
            params[0][3].clone(),
        );
        let mut residuals = DVector::zeros(self.num_residuals());
        for (i, obs) in self.observations.iter().enumerate() {
            let intrinsics: Vec<T> = obs.intrinsics.iter().map(|&v| lift(v)).collect();
            let r = reprojection_residual(
                self.model,
                &intrinsics,
                &lift3(&obs.rotation),
                &lift3(&obs.position),
                &point,
                &obs.observed,
            );
            residuals[2 * i] = r.x.clone();
            residuals[2 * i + 1] = r.y.clone();
        }
        residuals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, Resolution};
    use approx::assert_relative_eq;

    fn camera() -> Intrinsics {
        Intrinsics::new(
            CameraModelKind::Pinhole,
            Resolution {
                width: 640,
                height: 480,
            },
            600.0,
        )
    }

    #[test]
    fn test_view_factor_zero_at_truth() {
        let intrinsics = camera();
        let rotation = Vector3::new(0.05, -0.1, 0.02);
        let position = Vector3::new(0.1, 0.0, -1.0);
        let points: Vec<Vector4<f64>> = (0..6)
            .map(|i| Vector4::new(i as f64 * 0.03, 0.02 * i as f64, 0.0, 1.0))
            .collect();
        let observed: Vec<Vector2<f64>> = points
            .iter()
            .map(|p| {
                let p_cam = homogeneous_world_to_camera(&rotation, &position, p);
                intrinsics.project(&p_cam).unwrap()
            })
            .collect();
        let factor = ViewReprojectionFactor {
            model: CameraModelKind::Pinhole,
            rotation,
            position,
            intrinsics: intrinsics.parameters.clone(),
            free_intrinsics: vec![0, 2, 3],
            pose_free: true,
            points,
            observed,
        };
        let params = vec![
            DVector::from_column_slice(rotation.as_slice()),
            DVector::from_column_slice(position.as_slice()),
            DVector::from_vec(vec![600.0, 320.0, 240.0]),
        ];
        let residuals: DVector<f64> = factor.residual_func(&params);
        assert_eq!(residuals.len(), 12);
        assert_relative_eq!(residuals.norm(), 0.0, epsilon = 1e-9);

        // Moving the free principal point shifts every residual.
        let shifted = vec![
            params[0].clone(),
            params[1].clone(),
            DVector::from_vec(vec![600.0, 322.0, 240.0]),
        ];
        let residuals: DVector<f64> = factor.residual_func(&shifted);
        for i in 0..6 {
            assert_relative_eq!(residuals[2 * i], 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fixed_pose_uses_constants() {
        let intrinsics = camera();
        let factor = ViewReprojectionFactor {
            model: CameraModelKind::Pinhole,
            rotation: Vector3::zeros(),
            position: Vector3::new(0.0, 0.0, -2.0),
            intrinsics: intrinsics.parameters.clone(),
            free_intrinsics: vec![0],
            pose_free: false,
            points: vec![Vector4::new(0.2, 0.0, 0.0, 1.0)],
            observed: vec![Vector2::new(380.0, 240.0)],
        };
        let residuals: DVector<f64> = factor.residual_func(&[DVector::from_vec(vec![600.0])]);
        assert_relative_eq!(residuals[0], 0.0, epsilon = 1e-9);
        let residuals: DVector<f64> = factor.residual_func(&[DVector::from_vec(vec![700.0])]);
        assert_relative_eq!(residuals[0], 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_point_behind_camera_gets_large_residual() {
        let factor = TrackReprojectionFactor {
            model: CameraModelKind::Pinhole,
            observations: vec![TrackObservation {
                rotation: Vector3::zeros(),
                position: Vector3::new(0.0, 0.0, 1.0),
                intrinsics: camera().parameters,
                observed: Vector2::new(320.0, 240.0),
            }],
        };
        let residuals: DVector<f64> =
            factor.residual_func(&[DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0])]);
        assert_eq!(residuals[0], FAILED_PROJECTION_RESIDUAL);
    }
}
