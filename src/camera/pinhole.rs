//! Pinhole camera with two-term polynomial radial distortion.
//!
//! The normalized point `m = (x/z, y/z)` is scaled by
//! `1 + k1 r^2 + k2 r^4`, where `r` is the undistorted radius. With both
//! coefficients at zero this is the ideal pinhole.

use crate::camera::{
    CameraModel, CameraModelError, CameraModelKind, ModelParameter, ParameterCategory,
};
use nalgebra::{RealField, Vector2, Vector3};

/// Smallest depth accepted in front of the camera.
pub(crate) const MIN_DEPTH: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default)]
pub struct PinholeModel;

impl CameraModel for PinholeModel {
    const KIND: CameraModelKind = CameraModelKind::Pinhole;

    const PARAMETERS: &'static [ModelParameter] = &[
        ModelParameter {
            name: "k1",
            category: ParameterCategory::Radial,
            default: 0.0,
        },
        ModelParameter {
            name: "k2",
            category: ParameterCategory::Radial,
            default: 0.0,
        },
    ];

    fn project_normalized<T: RealField>(
        params: &[T],
        point_3d: &Vector3<T>,
    ) -> Result<Vector2<T>, CameraModelError> {
        let z = point_3d.z.clone();
        if z <= nalgebra::convert::<f64, T>(MIN_DEPTH) {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let mx = point_3d.x.clone() / z.clone();
        let my = point_3d.y.clone() / z;
        let r2 = mx.clone() * mx.clone() + my.clone() * my.clone();
        let k1 = params[0].clone();
        let k2 = params[1].clone();
        let radial = T::one() + k1 * r2.clone() + k2 * r2.clone() * r2;
        Ok(Vector2::new(mx * radial.clone(), my * radial))
    }
}
