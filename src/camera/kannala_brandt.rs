//! Kannala-Brandt equidistant fisheye model, exposed as `FISHEYE`.
//!
//! The incidence angle `theta = atan2(r, z)` is mapped to
//! `theta_d = theta + k1 theta^3 + k2 theta^5 + k3 theta^7 + k4 theta^9`
//! and the normalized point is `theta_d * (x, y) / r`.

use crate::camera::{
    CameraModel, CameraModelError, CameraModelKind, ModelParameter, ParameterCategory,
};
use nalgebra::{RealField, Vector2, Vector3};

#[derive(Debug, Clone, Copy, Default)]
pub struct KannalaBrandtModel;

impl CameraModel for KannalaBrandtModel {
    const KIND: CameraModelKind = CameraModelKind::Fisheye;

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
            name: "k4",
            category: ParameterCategory::Radial,
            default: 0.0,
        },
    ];

    fn project_normalized<T: RealField>(
        params: &[T],
        point_3d: &Vector3<T>,
    ) -> Result<Vector2<T>, CameraModelError> {
        let x = point_3d.x.clone();
        let y = point_3d.y.clone();
        let z = point_3d.z.clone();

        let r_squared = x.clone() * x.clone() + y.clone() * y.clone();
        if r_squared.clone() + z.clone() * z.clone() <= nalgebra::convert::<f64, T>(f64::EPSILON) {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        // On the optical axis the limit of theta_d / r is 1 / z.
        if r_squared <= nalgebra::convert::<f64, T>(f64::EPSILON * f64::EPSILON) {
            if z <= T::zero() {
                return Err(CameraModelError::PointIsOutSideImage);
            }
            return Ok(Vector2::new(x / z.clone(), y / z));
        }

        let r = r_squared.sqrt();
        let theta = r.clone().atan2(z);
        let theta2 = theta.clone() * theta.clone();
        let theta3 = theta2.clone() * theta.clone();
        let theta5 = theta3.clone() * theta2.clone();
        let theta7 = theta5.clone() * theta2.clone();
        let theta9 = theta7.clone() * theta2;

        let theta_d = theta
            + params[0].clone() * theta3
            + params[1].clone() * theta5
            + params[2].clone() * theta7
            + params[3].clone() * theta9;

        Ok(Vector2::new(
            theta_d.clone() * x / r.clone(),
            theta_d * y / r,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_equidistant_mapping() {
        // 45 degrees off-axis with zero coefficients lands at radius pi/4.
        let m = KannalaBrandtModel::project_normalized(&[0.0; 4], &Vector3::new(1.0, 0.0, 1.0))
            .unwrap();
        assert_relative_eq!(m.x, std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(m.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wide_angle_point_projects() {
        // Beyond 90 degrees the equidistant model is still defined.
        let m = KannalaBrandtModel::project_normalized(&[0.0; 4], &Vector3::new(1.0, 0.0, -0.2))
            .unwrap();
        assert!(m.x > std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn test_polynomial_terms() {
        let k = [0.1, 0.0, 0.0, 0.0];
        let m = KannalaBrandtModel::project_normalized(&k, &Vector3::new(0.0, 1.0, 1.0)).unwrap();
        let theta = std::f64::consts::FRAC_PI_4;
        assert_relative_eq!(m.y, theta + 0.1 * theta.powi(3), epsilon = 1e-12);
    }
}
