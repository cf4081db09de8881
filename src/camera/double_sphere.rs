//! Double Sphere camera model.
//!
//! A point is projected onto two unit spheres whose centres are shifted by
//! `xi`, then onto an image plane shifted by `alpha / (1 - alpha)`.

use crate::camera::{
    CameraModel, CameraModelError, CameraModelKind, ModelParameter, ParameterCategory,
};
use nalgebra::{RealField, Vector2, Vector3};

const PRECISION: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleSphereModel;

impl CameraModel for DoubleSphereModel {
    const KIND: CameraModelKind = CameraModelKind::DoubleSphere;

    const PARAMETERS: &'static [ModelParameter] = &[
        ModelParameter {
            name: "xi",
            category: ParameterCategory::Radial,
            default: -0.25,
        },
        ModelParameter {
            name: "alpha",
            category: ParameterCategory::Radial,
            default: 0.5,
        },
    ];

    fn project_normalized<T: RealField>(
        params: &[T],
        point_3d: &Vector3<T>,
    ) -> Result<Vector2<T>, CameraModelError> {
        let xi = params[0].clone();
        let alpha = params[1].clone();

        let x = point_3d.x.clone();
        let y = point_3d.y.clone();
        let z = point_3d.z.clone();

        let r_squared = x.clone() * x.clone() + y.clone() * y.clone();
        let d1 = (r_squared.clone() + z.clone() * z.clone()).sqrt();
        let gamma = xi * d1 + z;
        let d2 = (r_squared + gamma.clone() * gamma.clone()).sqrt();

        let denom = alpha.clone() * d2 + (T::one() - alpha) * gamma;
        if denom < nalgebra::convert::<f64, T>(PRECISION) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        Ok(Vector2::new(x / denom.clone(), y / denom))
    }
}
