//! Extended Unified Camera Model (EUCM).
//!
//! Projection divides by `alpha * d + (1 - alpha) * z` with
//! `d = sqrt(beta * (x^2 + y^2) + z^2)`.

use crate::camera::{
    CameraModel, CameraModelError, CameraModelKind, ModelParameter, ParameterCategory,
};
use nalgebra::{RealField, Vector2, Vector3};

const PRECISION: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Default)]
pub struct EucmModel;

impl EucmModel {
    /// Validity of a projection for `alpha > 0.5`, where part of the
    /// back hemisphere leaves the model's domain.
    pub fn check_proj_condition<T: RealField>(z: T, denom: T, alpha: T) -> bool {
        let half: T = nalgebra::convert(0.5);
        if alpha > half {
            let two: T = nalgebra::convert(2.0);
            let c = (alpha.clone() - T::one()) / (two * alpha - T::one());
            if z < denom * c {
                return false;
            }
        }
        true
    }
}

impl CameraModel for EucmModel {
    const KIND: CameraModelKind = CameraModelKind::ExtendedUnified;

    const PARAMETERS: &'static [ModelParameter] = &[
        ModelParameter {
            name: "alpha",
            category: ParameterCategory::Radial,
            default: 0.5,
        },
        ModelParameter {
            name: "beta",
            category: ParameterCategory::Radial,
            default: 1.0,
        },
    ];

    fn project_normalized<T: RealField>(
        params: &[T],
        point_3d: &Vector3<T>,
    ) -> Result<Vector2<T>, CameraModelError> {
        let alpha = params[0].clone();
        let beta = params[1].clone();

        let x = point_3d.x.clone();
        let y = point_3d.y.clone();
        let z = point_3d.z.clone();

        let r_squared = x.clone() * x.clone() + y.clone() * y.clone();
        let d = (beta * r_squared + z.clone() * z.clone()).sqrt();
        let denom = alpha.clone() * d + (T::one() - alpha.clone()) * z.clone();

        if denom < nalgebra::convert::<f64, T>(PRECISION)
            || !Self::check_proj_condition(z, denom.clone(), alpha)
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        Ok(Vector2::new(x / denom.clone(), y / denom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_seed_projection() {
        let p = Vector3::new(0.3, -0.4, 1.0);
        let m = EucmModel::project_normalized(&[0.5, 1.0], &p).unwrap();
        let denom = 0.5 * p.norm() + 0.5 * 1.0;
        assert_relative_eq!(m.x, 0.3 / denom, epsilon = 1e-12);
        assert_relative_eq!(m.y, -0.4 / denom, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_alpha_is_pinhole() {
        let m = EucmModel::project_normalized(&[0.0, 1.0], &Vector3::new(0.2, 0.4, 2.0)).unwrap();
        assert_relative_eq!(m.x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.y, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_condition() {
        assert!(EucmModel::check_proj_condition(1.0, 1.0, 0.4));
        // alpha = 0.75: c = -0.5, so z must not fall below -0.5 * denom.
        assert!(!EucmModel::check_proj_condition(-0.9, 1.0, 0.75));
        assert!(EucmModel::check_proj_condition(-0.1, 1.0, 0.75));
    }
}
