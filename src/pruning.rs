//! Per-view reprojection statistics and removal of badly fitting views.

use crate::dataset::{CalibrationDataset, ViewId};
use crate::optimization::ProjectionError;
use log::info;
use serde::{Deserialize, Serialize};

/// Pixel distances between the observations of `view` and the projections
/// of their tracks. Observations whose projection fails are skipped.
pub fn view_reprojection_errors(dataset: &CalibrationDataset, view: ViewId) -> Vec<f64> {
    dataset
        .observations_of(view)
        .filter_map(|(track, observed)| {
            dataset
                .reproject(view, track)
                .ok()
                .map(|projected| (projected - observed).norm())
        })
        .filter(|e| e.is_finite())
        .collect()
}

/// RMS reprojection error of one view, infinite when nothing projects.
pub fn view_rms_error(dataset: &CalibrationDataset, view: ViewId) -> f64 {
    ProjectionError::from_errors(&view_reprojection_errors(dataset, view)).rmse
}

/// Mean over all views of the per-view RMS error.
pub fn mean_reprojection_error(dataset: &CalibrationDataset) -> f64 {
    let ids = dataset.view_ids();
    if ids.is_empty() {
        return f64::INFINITY;
    }
    ids.iter().map(|&id| view_rms_error(dataset, id)).sum::<f64>() / ids.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewStatistics {
    pub view: ViewId,
    pub name: String,
    pub num_observations: usize,
    pub error: ProjectionError,
}

pub fn view_statistics(dataset: &CalibrationDataset) -> Vec<ViewStatistics> {
    dataset
        .views()
        .map(|view| {
            let errors = view_reprojection_errors(dataset, view.id);
            ViewStatistics {
                view: view.id,
                name: view.name.clone(),
                num_observations: dataset.observations_of(view.id).count(),
                error: ProjectionError::from_errors(&errors),
            }
        })
        .collect()
}

/// Removes views whose RMS reprojection error exceeds a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPruner {
    pub threshold: f64,
}

impl ViewPruner {
    pub fn new(threshold: f64) -> Self {
        ViewPruner { threshold }
    }

    /// Remove every view with an error strictly above the threshold and
    /// return the removed views with their errors.
    pub fn prune(&self, dataset: &mut CalibrationDataset) -> Vec<(ViewId, f64)> {
        let outliers: Vec<(ViewId, f64)> = dataset
            .view_ids()
            .into_iter()
            .map(|id| (id, view_rms_error(dataset, id)))
            .filter(|(_, error)| *error > self.threshold)
            .collect();
        for (id, error) in &outliers {
            info!("Removing view {} with reprojection error {:.3}", id, error);
            dataset.remove_view(*id);
        }
        outliers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraModelKind, Resolution};
    use crate::initializer::PoseEstimate;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    /// Views looking straight at four tracks, with observations offset by
    /// `offsets[view]` pixels along x.
    fn dataset_with_offsets(offsets: &[f64]) -> CalibrationDataset {
        let mut dataset = CalibrationDataset::new(
            CameraModelKind::Pinhole,
            Resolution {
                width: 640,
                height: 480,
            },
        );
        let tracks: Vec<_> = [(0.0, 0.0), (0.1, 0.0), (0.0, 0.1), (0.1, 0.1)]
            .iter()
            .map(|&(x, y)| dataset.add_track(Vector3::new(x, y, 0.0)))
            .collect();
        for (k, offset) in offsets.iter().enumerate() {
            let view = dataset.add_view(
                k as u64,
                &PoseEstimate {
                    rotation: Vector3::zeros(),
                    position: Vector3::new(0.0, 0.0, -1.0),
                    focal_length: 500.0,
                    radial_distortion: None,
                    num_inliers: 4,
                },
            );
            for &track in &tracks {
                let exact = dataset.reproject(view, track).unwrap();
                dataset.add_observation(view, track, exact + Vector2::new(*offset, 0.0));
            }
        }
        dataset
    }

    #[test]
    fn test_rms_error_of_constant_offset() {
        let dataset = dataset_with_offsets(&[0.0, 3.0]);
        assert_relative_eq!(view_rms_error(&dataset, 0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(view_rms_error(&dataset, 1), 3.0, epsilon = 1e-9);
        assert_relative_eq!(mean_reprojection_error(&dataset), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_view_without_observations_has_infinite_error() {
        let mut dataset = dataset_with_offsets(&[]);
        let view = dataset.add_view(
            9,
            &PoseEstimate {
                rotation: Vector3::zeros(),
                position: Vector3::zeros(),
                focal_length: 500.0,
                radial_distortion: None,
                num_inliers: 0,
            },
        );
        assert!(view_rms_error(&dataset, view).is_infinite());
    }

    #[test]
    fn test_prune_removes_only_views_above_threshold() {
        let mut dataset = dataset_with_offsets(&[0.5, 1.9, 6.0, 1.0]);
        let removed = ViewPruner::new(2.0).prune(&mut dataset);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, 2);
        assert_relative_eq!(removed[0].1, 6.0, epsilon = 1e-9);
        assert_eq!(dataset.view_ids(), vec![0, 1, 3]);
        assert_eq!(dataset.num_observations(), 12);
        assert_eq!(dataset.observations_of(2).count(), 0);
        assert_relative_eq!(view_rms_error(&dataset, 3), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_statistics_per_view() {
        let dataset = dataset_with_offsets(&[1.0]);
        let stats = view_statistics(&dataset);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].num_observations, 4);
        assert_relative_eq!(stats[0].error.median, 1.0, epsilon = 1e-9);
    }
}
