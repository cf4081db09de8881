//! Pinhole camera with Brown-Conrady radial and tangential distortion.
//!
//! Parameters are stored as `[k1, k2, k3, t1, t2]`. The radial terms are
//! unlocked together with the other radial coefficients during bundle
//! adjustment, the tangential pair only when tangential refinement is asked
//! for.

use crate::camera::pinhole::MIN_DEPTH;
use crate::camera::{
    CameraModel, CameraModelError, CameraModelKind, ModelParameter, ParameterCategory,
};
use nalgebra::{RealField, Vector2, Vector3};

#[derive(Debug, Clone, Copy, Default)]
pub struct RadTanModel;

impl CameraModel for RadTanModel {
    const KIND: CameraModelKind = CameraModelKind::PinholeRadialTangential;

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
        ModelParameter {
            name: "k3",
            category: ParameterCategory::Radial,
            default: 0.0,
        },
        ModelParameter {
            name: "t1",
            category: ParameterCategory::Tangential,
            default: 0.0,
        },
        ModelParameter {
            name: "t2",
            category: ParameterCategory::Tangential,
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
        let x = point_3d.x.clone() / z.clone();
        let y = point_3d.y.clone() / z;

        let k1 = params[0].clone();
        let k2 = params[1].clone();
        let k3 = params[2].clone();
        let t1 = params[3].clone();
        let t2 = params[4].clone();

        let two: T = nalgebra::convert(2.0);
        let x2 = x.clone() * x.clone();
        let y2 = y.clone() * y.clone();
        let xy = x.clone() * y.clone();
        let r2 = x2.clone() + y2.clone();
        let r4 = r2.clone() * r2.clone();
        let r6 = r4.clone() * r2.clone();
        let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;

        let dx = two.clone() * t1.clone() * xy.clone()
            + t2.clone() * (r2.clone() + two.clone() * x2);
        let dy = t1 * (r2 + two.clone() * y2) + two * t2 * xy;

        Ok(Vector2::new(x * radial.clone() + dx, y * radial + dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tangential_terms() {
        let params = [0.0, 0.0, 0.0, 0.01, -0.02];
        let m = RadTanModel::project_normalized(&params, &Vector3::new(0.3, 0.2, 1.0)).unwrap();
        let (x, y) = (0.3, 0.2);
        let r2: f64 = x * x + y * y;
        let ex = x + 2.0 * 0.01 * x * y + (-0.02) * (r2 + 2.0 * x * x);
        let ey = y + 0.01 * (r2 + 2.0 * y * y) + 2.0 * (-0.02) * x * y;
        assert_relative_eq!(m.x, ex, epsilon = 1e-12);
        assert_relative_eq!(m.y, ey, epsilon = 1e-12);
    }

    #[test]
    fn test_third_radial_coefficient() {
        let params = [0.0, 0.0, 0.5, 0.0, 0.0];
        let m = RadTanModel::project_normalized(&params, &Vector3::new(1.0, 0.0, 1.0)).unwrap();
        assert_relative_eq!(m.x, 1.5, epsilon = 1e-12);
    }
}
