//! Rejection of frames taken from (nearly) the same camera position.

use log::debug;
use nalgebra::Vector3;

/// History of accepted camera positions.
///
/// A new position is rejected when it lies strictly closer than
/// `grid_size` to any accepted one. Positions at exactly `grid_size` are
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct PoseDeduplicator {
    grid_size: f64,
    history: Vec<Vector3<f64>>,
}

impl PoseDeduplicator {
    pub fn new(grid_size: f64) -> Self {
        PoseDeduplicator {
            grid_size,
            history: Vec::new(),
        }
    }

    pub fn grid_size(&self) -> f64 {
        self.grid_size
    }

    pub fn is_duplicate(&self, position: &Vector3<f64>) -> bool {
        self.history
            .iter()
            .any(|accepted| (position - accepted).norm() < self.grid_size)
    }

    /// Accept `position` and remember it, or reject it without changing the
    /// history.
    pub fn try_accept(&mut self, position: &Vector3<f64>) -> bool {
        if self.is_duplicate(position) {
            debug!("rejecting duplicate position {:?}", position.as_slice());
            return false;
        }
        self.history.push(*position);
        true
    }

    pub fn accepted(&self) -> &[Vector3<f64>] {
        &self.history
    }
}
