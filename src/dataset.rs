//! In-memory graph of views, board tracks and the observations linking them.

use crate::camera::{CameraModelError, CameraModelKind, Intrinsics, Resolution};
use crate::geometry::homogeneous_world_to_camera;
use crate::initializer::PoseEstimate;
use log::debug;
use nalgebra::{Vector2, Vector3, Vector4};
use std::collections::BTreeMap;

pub type ViewId = usize;
pub type TrackId = usize;

/// Intrinsics group shared by every view of a run.
pub const SHARED_INTRINSICS: usize = 0;

/// One calibration frame with its estimated camera pose.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub id: ViewId,
    /// Frame timestamp in microseconds, as a string.
    pub name: String,
    /// Frame timestamp in seconds.
    pub timestamp: f64,
    /// Angle-axis rotation from the world into the camera frame.
    pub rotation: Vector3<f64>,
    /// Camera centre in the world frame.
    pub position: Vector3<f64>,
    pub intrinsics_group: usize,
    pub estimated: bool,
}

/// A known board point, stored homogeneously.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub point: Vector4<f64>,
}

impl Track {
    /// Euclidean position, or `None` for a point at infinity.
    pub fn euclidean(&self) -> Option<Vector3<f64>> {
        if self.point.w.abs() <= f64::EPSILON {
            return None;
        }
        Some(self.point.xyz() / self.point.w)
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationDataset {
    model: CameraModelKind,
    resolution: Resolution,
    views: BTreeMap<ViewId, View>,
    tracks: BTreeMap<TrackId, Track>,
    observations: BTreeMap<ViewId, BTreeMap<TrackId, Vector2<f64>>>,
    intrinsics: Vec<Intrinsics>,
    next_view_id: ViewId,
    next_track_id: TrackId,
}

impl CalibrationDataset {
    pub fn new(model: CameraModelKind, resolution: Resolution) -> Self {
        let focal_seed = resolution.width.max(resolution.height) as f64;
        CalibrationDataset {
            model,
            resolution,
            views: BTreeMap::new(),
            tracks: BTreeMap::new(),
            observations: BTreeMap::new(),
            intrinsics: vec![Intrinsics::new(model, resolution, focal_seed)],
            next_view_id: 0,
            next_track_id: 0,
        }
    }

    pub fn model(&self) -> CameraModelKind {
        self.model
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Create an estimated view from an initial pose.
    ///
    /// The shared intrinsics are re-seeded from the estimate: centred
    /// principal point, unit aspect ratio, the estimated focal length and the
    /// model's default parameters. The division model takes the estimated
    /// distortion coefficient instead of its default.
    pub fn add_view(&mut self, timestamp_us: u64, estimate: &PoseEstimate) -> ViewId {
        let id = self.next_view_id;
        self.next_view_id += 1;

        let mut intrinsics = Intrinsics::new(self.model, self.resolution, estimate.focal_length);
        if self.model == CameraModelKind::DivisionUndistortion {
            if let Some(k) = estimate.radial_distortion {
                intrinsics.parameters[crate::camera::MODEL_PARAMETERS_OFFSET] = k;
            }
        }
        self.intrinsics[SHARED_INTRINSICS] = intrinsics;

        self.views.insert(
            id,
            View {
                id,
                name: timestamp_us.to_string(),
                timestamp: timestamp_us as f64 * 1e-6,
                rotation: estimate.rotation,
                position: estimate.position,
                intrinsics_group: SHARED_INTRINSICS,
                estimated: true,
            },
        );
        self.observations.insert(id, BTreeMap::new());
        id
    }

    pub fn add_track(&mut self, point: Vector3<f64>) -> TrackId {
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.tracks.insert(
            id,
            Track {
                id,
                point: point.push(1.0),
            },
        );
        id
    }

    /// Link a view and a track. Returns `false` when either end is missing
    /// or the pair is already linked; the dataset is left unchanged then.
    pub fn add_observation(&mut self, view: ViewId, track: TrackId, pixel: Vector2<f64>) -> bool {
        if !self.tracks.contains_key(&track) {
            return false;
        }
        let Some(edges) = self.observations.get_mut(&view) else {
            return false;
        };
        if edges.contains_key(&track) {
            debug!("observation ({}, {}) already exists", view, track);
            return false;
        }
        edges.insert(track, pixel);
        true
    }

    /// Delete a view together with all of its observations.
    pub fn remove_view(&mut self, view: ViewId) -> bool {
        self.observations.remove(&view);
        self.views.remove(&view).is_some()
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn num_observations(&self) -> usize {
        self.observations.values().map(BTreeMap::len).sum()
    }

    pub fn view_ids(&self) -> Vec<ViewId> {
        self.views.keys().copied().collect()
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    pub fn view_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.views.get_mut(&id)
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Observations of one view as `(track, pixel)` pairs.
    pub fn observations_of(&self, view: ViewId) -> impl Iterator<Item = (TrackId, &Vector2<f64>)> {
        self.observations
            .get(&view)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|(t, p)| (*t, p)))
    }

    /// Observations of one track as `(view, pixel)` pairs.
    pub fn observations_of_track(&self, track: TrackId) -> Vec<(ViewId, Vector2<f64>)> {
        self.observations
            .iter()
            .filter_map(|(v, edges)| edges.get(&track).map(|p| (*v, *p)))
            .collect()
    }

    pub fn intrinsics(&self, group: usize) -> Option<&Intrinsics> {
        self.intrinsics.get(group)
    }

    pub fn intrinsics_mut(&mut self, group: usize) -> Option<&mut Intrinsics> {
        self.intrinsics.get_mut(group)
    }

    pub fn shared_intrinsics(&self) -> &Intrinsics {
        &self.intrinsics[SHARED_INTRINSICS]
    }

    /// Project a track into a view through the view's current camera.
    pub fn reproject(&self, view: ViewId, track: TrackId) -> Result<Vector2<f64>, CameraModelError> {
        let v = self
            .views
            .get(&view)
            .ok_or_else(|| CameraModelError::InvalidParams(format!("unknown view {}", view)))?;
        let t = self
            .tracks
            .get(&track)
            .ok_or_else(|| CameraModelError::InvalidParams(format!("unknown track {}", track)))?;
        let intrinsics = self.intrinsics.get(v.intrinsics_group).ok_or_else(|| {
            CameraModelError::InvalidParams(format!(
                "unknown intrinsics group {}",
                v.intrinsics_group
            ))
        })?;
        let p_cam = homogeneous_world_to_camera(&v.rotation, &v.position, &t.point);
        intrinsics.project(&p_cam)
    }

    /// Snapshot of `(view name, position, rotation)` for every view.
    pub fn poses(&self) -> Vec<CameraPose> {
        self.views
            .values()
            .map(|v| CameraPose {
                name: v.name.clone(),
                position: v.position,
                rotation: v.rotation,
            })
            .collect()
    }
}

/// A view pose captured at a point of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    pub name: String,
    pub position: Vector3<f64>,
    pub rotation: Vector3<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(focal_length: f64) -> PoseEstimate {
        PoseEstimate {
            rotation: Vector3::zeros(),
            position: Vector3::new(0.1, 0.1, -1.0),
            focal_length,
            radial_distortion: Some(-0.05),
            num_inliers: 10,
        }
    }

    fn dataset(model: CameraModelKind) -> CalibrationDataset {
        CalibrationDataset::new(
            model,
            Resolution {
                width: 640,
                height: 480,
            },
        )
    }

    #[test]
    fn test_add_view_seeds_intrinsics() {
        let mut ds = dataset(CameraModelKind::DivisionUndistortion);
        let id = ds.add_view(1_500_000, &estimate(700.0));
        let view = ds.view(id).unwrap();
        assert_eq!(view.name, "1500000");
        assert!(view.estimated);
        assert_eq!(view.timestamp, 1.5);
        let intrinsics = ds.shared_intrinsics();
        assert_eq!(intrinsics.focal_length(), 700.0);
        assert_eq!(intrinsics.principal_point(), Vector2::new(320.0, 240.0));
        assert_eq!(intrinsics.parameter("k"), Some(-0.05));
    }

    #[test]
    fn test_view_ids_are_monotonic() {
        let mut ds = dataset(CameraModelKind::Pinhole);
        let a = ds.add_view(1, &estimate(500.0));
        ds.remove_view(a);
        let b = ds.add_view(2, &estimate(500.0));
        assert!(b > a);
    }

    #[test]
    fn test_fresh_views_project_board_points_for_every_model() {
        for model in CameraModelKind::ALL {
            let mut ds = dataset(model);
            let view = ds.add_view(0, &estimate(500.0));
            for i in 0..12 {
                let track =
                    ds.add_track(Vector3::new((i % 4) as f64 * 0.05, (i / 4) as f64 * 0.05, 0.0));
                let p = ds.reproject(view, track).unwrap();
                assert!(p.x.is_finite() && p.y.is_finite(), "{} failed", model);
            }
        }
    }

    #[test]
    fn test_duplicate_observation_is_rejected() {
        let mut ds = dataset(CameraModelKind::Pinhole);
        let view = ds.add_view(0, &estimate(500.0));
        let track = ds.add_track(Vector3::zeros());
        assert!(ds.add_observation(view, track, Vector2::new(1.0, 2.0)));
        assert!(!ds.add_observation(view, track, Vector2::new(3.0, 4.0)));
        assert_eq!(ds.num_observations(), 1);
        let (_, pixel) = ds.observations_of(view).next().unwrap();
        assert_eq!(*pixel, Vector2::new(1.0, 2.0));
    }

    #[test]
    fn test_observation_requires_existing_ends() {
        let mut ds = dataset(CameraModelKind::Pinhole);
        let view = ds.add_view(0, &estimate(500.0));
        assert!(!ds.add_observation(view, 3, Vector2::zeros()));
        let track = ds.add_track(Vector3::zeros());
        assert!(!ds.add_observation(view + 1, track, Vector2::zeros()));
    }

    #[test]
    fn test_remove_view_drops_its_observations() {
        let mut ds = dataset(CameraModelKind::Pinhole);
        let a = ds.add_view(0, &estimate(500.0));
        let b = ds.add_view(1, &estimate(500.0));
        let t = ds.add_track(Vector3::zeros());
        ds.add_observation(a, t, Vector2::zeros());
        ds.add_observation(b, t, Vector2::new(5.0, 5.0));
        assert!(ds.remove_view(a));
        assert!(!ds.remove_view(a));
        assert_eq!(ds.num_views(), 1);
        assert_eq!(ds.num_observations(), 1);
        assert_eq!(ds.observations_of_track(t), vec![(b, Vector2::new(5.0, 5.0))]);
    }
}
