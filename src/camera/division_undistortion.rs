//! Single-parameter division model.
//!
//! The model describes undistortion as `m_u = m_d / (1 + k |m_d|^2)` in
//! normalized coordinates. Projection inverts that relation in closed form:
//! with `r_u = |m_u|`, the distorted point is `m_d = 2 m_u / (1 + sqrt(1 - 4 k r_u^2))`.

use crate::camera::pinhole::MIN_DEPTH;
use crate::camera::{
    CameraModel, CameraModelError, CameraModelKind, ModelParameter, ParameterCategory,
};
use nalgebra::{RealField, Vector2, Vector3};

#[derive(Debug, Clone, Copy, Default)]
pub struct DivisionUndistortionModel;

impl CameraModel for DivisionUndistortionModel {
    const KIND: CameraModelKind = CameraModelKind::DivisionUndistortion;

    // The seed is overwritten by the initializer's distortion estimate.
    const PARAMETERS: &'static [ModelParameter] = &[ModelParameter {
        name: "k",
        category: ParameterCategory::Radial,
        default: 0.0,
    }];

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

        let four: T = nalgebra::convert(4.0);
        let disc = T::one() - four * params[0].clone() * r2;
        if disc < T::zero() {
            return Err(CameraModelError::PointIsOutSideImage);
        }
        let scale = nalgebra::convert::<f64, T>(2.0) / (T::one() + disc.sqrt());
        Ok(Vector2::new(mx * scale.clone(), my * scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_inverts_undistortion() {
        let k: f64 = -0.2;
        let m = DivisionUndistortionModel::project_normalized(&[k], &Vector3::new(0.4, -0.3, 1.0))
            .unwrap();
        let rd2 = m.norm_squared();
        let undistorted = m / (1.0 + k * rd2);
        assert_relative_eq!(undistorted.x, 0.4, epsilon = 1e-12);
        assert_relative_eq!(undistorted.y, -0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_distortion_is_pinhole() {
        let m = DivisionUndistortionModel::project_normalized(&[0.0], &Vector3::new(1.0, 2.0, 4.0))
            .unwrap();
        assert_relative_eq!(m.x, 0.25, epsilon = 1e-12);
        assert_relative_eq!(m.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_discriminant_fails() {
        let result =
            DivisionUndistortionModel::project_normalized(&[1.0], &Vector3::new(1.0, 0.0, 1.0));
        assert!(matches!(result, Err(CameraModelError::PointIsOutSideImage)));
    }
}
