//! Reading scenes and writing calibration artifacts.
//!
//! [`write_outputs`] writes everything a finished run produces next to a
//! common path prefix:
//!
//! - `<prefix>.json`: the calibration
//! - `<prefix>_ransac_poses.ply` and `<prefix>_final_poses.ply`: camera centres
//! - `<prefix>_residuals.csv`: per-view reprojection statistics

pub mod ply;
pub mod report;
pub mod result;
pub mod scene;

pub use result::{read_calibration, write_calibration, CalibrationRecord};
pub use scene::{load_scene, parse_scene, save_scene};

use crate::calibrator::CalibrationOutcome;
use crate::error::IoError;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write all artifacts of `outcome` and return their paths.
///
/// When one of the files cannot be written, the ones already written by
/// this call are removed again before the error is returned.
pub fn write_outputs(prefix: impl AsRef<Path>, outcome: &CalibrationOutcome) -> Result<Vec<PathBuf>, IoError> {
    let prefix = prefix.as_ref();
    if let Some(dir) = prefix.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let mut written = Vec::with_capacity(4);
    if let Err(e) = write_artifacts(prefix, outcome, &mut written) {
        warn!("Writing {} failed, removing partial outputs", prefix.display());
        for path in written.iter().filter(|p| p.is_file()) {
            if let Err(remove_err) = fs::remove_file(path) {
                warn!("Could not remove {}: {}", path.display(), remove_err);
            }
        }
        return Err(e);
    }

    info!("Wrote calibration artifacts to {}*", prefix.display());
    Ok(written)
}

/// Writes the artifacts in order. A path is recorded before its file is
/// created so that a half-written file is removed too.
fn write_artifacts(prefix: &Path, outcome: &CalibrationOutcome, written: &mut Vec<PathBuf>) -> Result<(), IoError> {
    let calibration = with_suffix(prefix, ".json");
    written.push(calibration.clone());
    write_calibration(&CalibrationRecord::from_outcome(outcome), &calibration)?;

    let ransac_poses = with_suffix(prefix, "_ransac_poses.ply");
    written.push(ransac_poses.clone());
    ply::save_poses(&outcome.initial_poses, &ransac_poses)?;

    let final_poses = with_suffix(prefix, "_final_poses.ply");
    written.push(final_poses.clone());
    ply::save_poses(&outcome.final_poses, &final_poses)?;

    let residuals = with_suffix(prefix, "_residuals.csv");
    written.push(residuals.clone());
    report::save_residuals(&outcome.view_statistics, &residuals)?;
    Ok(())
}
