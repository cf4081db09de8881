//! Detection of planar calibration targets.

use nalgebra::{Matrix3, Vector2, Vector3};

/// Orthonormal frame attached to a planar point set.
///
/// Points map to plane coordinates through `basis^T * (X - origin)`; the
/// third coordinate is the (near zero) distance to the plane.
#[derive(Debug, Clone)]
pub struct PlaneFrame {
    pub origin: Vector3<f64>,
    /// Columns are the two in-plane axes and the normal, right-handed.
    pub basis: Matrix3<f64>,
}

impl PlaneFrame {
    /// Fit a plane to `points`, returning `None` when the set is not planar
    /// within `tolerance` relative to its extent, or spans less than a plane.
    pub fn fit(points: &[Vector3<f64>], tolerance: f64) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let origin = points.iter().sum::<Vector3<f64>>() / points.len() as f64;
        let mut scatter = Matrix3::zeros();
        for p in points {
            let d = p - origin;
            scatter += d * d.transpose();
        }
        let eigen = scatter.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let largest = eigen.eigenvalues[order[0]];
        let middle = eigen.eigenvalues[order[1]];
        let smallest = eigen.eigenvalues[order[2]].max(0.0);
        if largest <= 0.0 || middle <= largest * 1e-12 {
            return None;
        }
        if smallest.sqrt() > tolerance * largest.sqrt() {
            return None;
        }

        let e1: Vector3<f64> = eigen.eigenvectors.column(order[0]).into_owned();
        let e2: Vector3<f64> = eigen.eigenvectors.column(order[1]).into_owned();
        let e3 = e1.cross(&e2);
        Some(PlaneFrame {
            origin,
            basis: Matrix3::from_columns(&[e1, e2, e3]),
        })
    }

    pub fn to_plane(&self, point: &Vector3<f64>) -> Vector2<f64> {
        let local = self.basis.transpose() * (point - self.origin);
        Vector2::new(local.x, local.y)
    }
}
