//! Per-view residual report as CSV.

use crate::error::IoError;
use crate::pruning::ViewStatistics;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ResidualRow<'a> {
    view: usize,
    timestamp_us: &'a str,
    num_observations: usize,
    rmse: f64,
    min: f64,
    max: f64,
    mean: f64,
    stddev: f64,
    median: f64,
}

impl<'a> From<&'a ViewStatistics> for ResidualRow<'a> {
    fn from(stats: &'a ViewStatistics) -> Self {
        ResidualRow {
            view: stats.view,
            timestamp_us: &stats.name,
            num_observations: stats.num_observations,
            rmse: stats.error.rmse,
            min: stats.error.min,
            max: stats.error.max,
            mean: stats.error.mean,
            stddev: stats.error.stddev,
            median: stats.error.median,
        }
    }
}

pub fn write_residuals<W: Write>(stats: &[ViewStatistics], out: W) -> Result<(), IoError> {
    let mut writer = csv::Writer::from_writer(out);
    for row in stats {
        writer.serialize(ResidualRow::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_residuals(stats: &[ViewStatistics], path: impl AsRef<Path>) -> Result<(), IoError> {
    write_residuals(stats, File::create(path)?)
}
