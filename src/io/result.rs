//! Calibration result JSON.

use crate::calibrator::CalibrationOutcome;
use crate::camera::{CameraModelKind, Intrinsics, Resolution};
use crate::error::IoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Key under which a model parameter is stored in the result file.
fn parameter_key(name: &str) -> String {
    match name {
        "k" => "div_undist_distortion".to_string(),
        "k1" | "k2" | "k3" | "k4" => format!("radial_distortion_{}", &name[1..]),
        "t1" | "t2" => format!("tangential_distortion_{}", &name[1..]),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub intrinsic_type: CameraModelKind,
    pub image_width: u32,
    pub image_height: u32,
    pub intrinsics: BTreeMap<String, f64>,
    pub fps: f64,
    pub nr_calib_images: usize,
    pub final_reproj_error: f64,
}

impl CalibrationRecord {
    pub fn new(intrinsics: &Intrinsics, fps: f64, num_views: usize, mean_error: f64) -> Self {
        let mut values = BTreeMap::new();
        values.insert("focal_length".to_string(), intrinsics.focal_length());
        values.insert("aspect_ratio".to_string(), intrinsics.aspect_ratio());
        let pp = intrinsics.principal_point();
        values.insert("principal_pt_x".to_string(), pp.x);
        values.insert("principal_pt_y".to_string(), pp.y);
        for (param, value) in intrinsics
            .model
            .parameters()
            .iter()
            .zip(intrinsics.model_parameters())
        {
            values.insert(parameter_key(param.name), *value);
        }
        CalibrationRecord {
            intrinsic_type: intrinsics.model,
            image_width: intrinsics.resolution.width,
            image_height: intrinsics.resolution.height,
            intrinsics: values,
            fps,
            nr_calib_images: num_views,
            final_reproj_error: mean_error,
        }
    }

    pub fn from_outcome(outcome: &CalibrationOutcome) -> Self {
        Self::new(
            &outcome.intrinsics,
            outcome.fps,
            outcome.num_views(),
            outcome.mean_reprojection_error,
        )
    }

    /// Rebuild the intrinsics. Missing model keys keep their defaults.
    pub fn to_intrinsics(&self) -> Result<Intrinsics, IoError> {
        let get = |key: &str| {
            self.intrinsics
                .get(key)
                .copied()
                .ok_or_else(|| IoError::InvalidCalibration(format!("calibration has no '{key}'")))
        };
        let resolution = Resolution {
            width: self.image_width,
            height: self.image_height,
        };
        let mut intrinsics = Intrinsics::new(self.intrinsic_type, resolution, get("focal_length")?);
        intrinsics.parameters[crate::camera::ASPECT_RATIO] =
            self.intrinsics.get("aspect_ratio").copied().unwrap_or(1.0);
        intrinsics.set_principal_point(get("principal_pt_x")?, get("principal_pt_y")?);
        for param in self.intrinsic_type.parameters() {
            if let Some(value) = self.intrinsics.get(&parameter_key(param.name)) {
                intrinsics
                    .set_parameter(param.name, *value)
                    .map_err(|e| IoError::InvalidCalibration(e.to_string()))?;
            }
        }
        Ok(intrinsics)
    }
}

pub fn write_calibration(record: &CalibrationRecord, path: impl AsRef<Path>) -> Result<(), IoError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, record)?;
    Ok(())
}

pub fn read_calibration(path: impl AsRef<Path>) -> Result<CalibrationRecord, IoError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
