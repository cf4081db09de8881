//! Camera models supported by the calibrator.
//!
//! Every model shares the same leading intrinsic parameters
//! `[focal_length, aspect_ratio, principal_point_x, principal_point_y]`,
//! followed by a fixed, model-specific block of distortion or shape
//! parameters. The vertical focal length is `focal_length * aspect_ratio`.
//!
//! Projection is written once per model, generic over [`RealField`], so the
//! same code runs on plain `f64` values and on the dual numbers `tiny-solver`
//! uses for automatic differentiation.

use nalgebra::{RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod division_undistortion;
pub mod double_sphere;
pub mod eucm;
pub mod kannala_brandt;
pub mod pinhole;
pub mod rad_tan;

pub use division_undistortion::DivisionUndistortionModel;
pub use double_sphere::DoubleSphereModel;
pub use eucm::EucmModel;
pub use kannala_brandt::KannalaBrandtModel;
pub use pinhole::PinholeModel;
pub use rad_tan::RadTanModel;

/// Index of the focal length in an intrinsics parameter vector.
pub const FOCAL_LENGTH: usize = 0;
/// Index of the aspect ratio (`fy / fx`).
pub const ASPECT_RATIO: usize = 1;
/// Index of the principal point x coordinate.
pub const PRINCIPAL_POINT_X: usize = 2;
/// Index of the principal point y coordinate.
pub const PRINCIPAL_POINT_Y: usize = 3;
/// First index of the model-specific parameter block.
pub const MODEL_PARAMETERS_OFFSET: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Input point is outside the valid projection domain")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Unknown camera model: {0}")]
    UnknownModel(String),
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

/// Optimization category of a model-specific parameter.
///
/// Bundle adjustment unlocks parameters by category, so every distortion or
/// shape parameter is tagged as either radial or tangential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterCategory {
    Radial,
    Tangential,
}

/// Static description of one model-specific parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParameter {
    pub name: &'static str,
    pub category: ParameterCategory,
    /// Value seeded into a freshly created view.
    pub default: f64,
}

/// Strategy implemented by every lens model.
///
/// A model only maps a point in the camera frame to its distorted,
/// normalized image coordinates. Focal length, aspect ratio and principal
/// point are applied uniformly by [`project`].
pub trait CameraModel {
    /// The tag selecting this strategy.
    const KIND: CameraModelKind;

    /// Model-specific parameters, in storage order.
    const PARAMETERS: &'static [ModelParameter];

    /// Project a camera-frame point to distorted normalized coordinates.
    ///
    /// `params` holds exactly the model-specific block described by
    /// [`CameraModel::PARAMETERS`].
    fn project_normalized<T: RealField>(
        params: &[T],
        point_3d: &Vector3<T>,
    ) -> Result<Vector2<T>, CameraModelError>;
}

/// The closed set of camera models a calibration run can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraModelKind {
    Pinhole,
    PinholeRadialTangential,
    DivisionUndistortion,
    DoubleSphere,
    ExtendedUnified,
    Fisheye,
}

impl CameraModelKind {
    pub const ALL: [CameraModelKind; 6] = [
        CameraModelKind::Pinhole,
        CameraModelKind::PinholeRadialTangential,
        CameraModelKind::DivisionUndistortion,
        CameraModelKind::DoubleSphere,
        CameraModelKind::ExtendedUnified,
        CameraModelKind::Fisheye,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CameraModelKind::Pinhole => "PINHOLE",
            CameraModelKind::PinholeRadialTangential => "PINHOLE_RADIAL_TANGENTIAL",
            CameraModelKind::DivisionUndistortion => "DIVISION_UNDISTORTION",
            CameraModelKind::DoubleSphere => "DOUBLE_SPHERE",
            CameraModelKind::ExtendedUnified => "EXTENDED_UNIFIED",
            CameraModelKind::Fisheye => "FISHEYE",
        }
    }

    pub fn parameters(&self) -> &'static [ModelParameter] {
        match self {
            CameraModelKind::Pinhole => PinholeModel::PARAMETERS,
            CameraModelKind::PinholeRadialTangential => RadTanModel::PARAMETERS,
            CameraModelKind::DivisionUndistortion => DivisionUndistortionModel::PARAMETERS,
            CameraModelKind::DoubleSphere => DoubleSphereModel::PARAMETERS,
            CameraModelKind::ExtendedUnified => EucmModel::PARAMETERS,
            CameraModelKind::Fisheye => KannalaBrandtModel::PARAMETERS,
        }
    }

    /// Total length of an intrinsics vector for this model.
    pub fn num_intrinsics(&self) -> usize {
        MODEL_PARAMETERS_OFFSET + self.parameters().len()
    }

    /// Indices into the full intrinsics vector of parameters in `category`.
    pub fn indices_of(&self, category: ParameterCategory) -> Vec<usize> {
        self.parameters()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.category == category)
            .map(|(i, _)| MODEL_PARAMETERS_OFFSET + i)
            .collect()
    }

    pub fn project_normalized<T: RealField>(
        &self,
        params: &[T],
        point_3d: &Vector3<T>,
    ) -> Result<Vector2<T>, CameraModelError> {
        match self {
            CameraModelKind::Pinhole => PinholeModel::project_normalized(params, point_3d),
            CameraModelKind::PinholeRadialTangential => {
                RadTanModel::project_normalized(params, point_3d)
            }
            CameraModelKind::DivisionUndistortion => {
                DivisionUndistortionModel::project_normalized(params, point_3d)
            }
            CameraModelKind::DoubleSphere => DoubleSphereModel::project_normalized(params, point_3d),
            CameraModelKind::ExtendedUnified => EucmModel::project_normalized(params, point_3d),
            CameraModelKind::Fisheye => KannalaBrandtModel::project_normalized(params, point_3d),
        }
    }
}

impl fmt::Display for CameraModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CameraModelKind {
    type Err = CameraModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        CameraModelKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| CameraModelError::UnknownModel(s.to_string()))
    }
}

/// Project a camera-frame point to pixels through a full intrinsics vector.
///
/// `intrinsics` must have the layout described in the module documentation.
pub fn project<T: RealField>(
    kind: CameraModelKind,
    intrinsics: &[T],
    point_3d: &Vector3<T>,
) -> Result<Vector2<T>, CameraModelError> {
    let m = kind.project_normalized(&intrinsics[MODEL_PARAMETERS_OFFSET..], point_3d)?;
    let f = intrinsics[FOCAL_LENGTH].clone();
    let fy = f.clone() * intrinsics[ASPECT_RATIO].clone();
    Ok(Vector2::new(
        f * m.x.clone() + intrinsics[PRINCIPAL_POINT_X].clone(),
        fy * m.y.clone() + intrinsics[PRINCIPAL_POINT_Y].clone(),
    ))
}

/// Intrinsic calibration of one camera: model, image size and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub model: CameraModelKind,
    pub resolution: Resolution,
    /// Full parameter vector, see [`FOCAL_LENGTH`] and friends for the layout.
    pub parameters: Vec<f64>,
}

impl Intrinsics {
    /// Seed intrinsics for `model`: principal point at the image centre,
    /// unit aspect ratio and the model's default parameters.
    pub fn new(model: CameraModelKind, resolution: Resolution, focal_length: f64) -> Self {
        let mut parameters = vec![
            focal_length,
            1.0,
            resolution.width as f64 / 2.0,
            resolution.height as f64 / 2.0,
        ];
        parameters.extend(model.parameters().iter().map(|p| p.default));
        Intrinsics {
            model,
            resolution,
            parameters,
        }
    }

    pub fn focal_length(&self) -> f64 {
        self.parameters[FOCAL_LENGTH]
    }

    pub fn set_focal_length(&mut self, focal_length: f64) {
        self.parameters[FOCAL_LENGTH] = focal_length;
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.parameters[ASPECT_RATIO]
    }

    pub fn principal_point(&self) -> Vector2<f64> {
        Vector2::new(
            self.parameters[PRINCIPAL_POINT_X],
            self.parameters[PRINCIPAL_POINT_Y],
        )
    }

    pub fn set_principal_point(&mut self, x: f64, y: f64) {
        self.parameters[PRINCIPAL_POINT_X] = x;
        self.parameters[PRINCIPAL_POINT_Y] = y;
    }

    /// The model-specific parameter block.
    pub fn model_parameters(&self) -> &[f64] {
        &self.parameters[MODEL_PARAMETERS_OFFSET..]
    }

    /// Look up a model-specific parameter by name, e.g. `"xi"`.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.model
            .parameters()
            .iter()
            .position(|p| p.name == name)
            .map(|i| self.parameters[MODEL_PARAMETERS_OFFSET + i])
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), CameraModelError> {
        let index = self
            .model
            .parameters()
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| {
                CameraModelError::InvalidParams(format!(
                    "{} has no parameter named {}",
                    self.model, name
                ))
            })?;
        self.parameters[MODEL_PARAMETERS_OFFSET + index] = value;
        Ok(())
    }

    /// Project a point given in the camera frame to pixel coordinates.
    pub fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        project(self.model, &self.parameters, point_3d)
    }

    pub fn validate_params(&self) -> Result<(), CameraModelError> {
        if self.parameters.len() != self.model.num_intrinsics() {
            return Err(CameraModelError::InvalidParams(format!(
                "{} expects {} parameters, got {}",
                self.model,
                self.model.num_intrinsics(),
                self.parameters.len()
            )));
        }
        validation::validate_intrinsics(self)?;
        if self.parameters.iter().any(|p| !p.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "all parameters must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.focal_length() <= 0.0 || intrinsics.aspect_ratio() <= 0.0 {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        let pp = intrinsics.principal_point();
        if !pp.x.is_finite() || !pp.y.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }
}
