//! Projection matrix estimation for non-planar targets.

use crate::geometry::homography::{normalize_points_2d, null_vector};
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Matrix4, Vector2, Vector3};

fn normalize_points_3d(points: &[Vector3<f64>]) -> Option<(Vec<Vector3<f64>>, Matrix4<f64>)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points.iter().sum::<Vector3<f64>>() / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let scale = 3f64.sqrt() / mean_dist;
    let mut transform = Matrix4::identity() * scale;
    transform[(3, 3)] = 1.0;
    transform
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&(-centroid * scale));
    let normalized = points.iter().map(|p| (p - centroid) * scale).collect();
    Some((normalized, transform))
}

/// Estimate the 3x4 projection `P` with `image ~ P * [X; 1]` from at least
/// six correspondences.
pub fn dlt_projection(world: &[Vector3<f64>], image: &[Vector2<f64>]) -> Option<Matrix3x4<f64>> {
    let n = world.len();
    if n < 6 || image.len() != n {
        return None;
    }
    let (world_n, t_w) = normalize_points_3d(world)?;
    let (image_n, t_i) = normalize_points_2d(image)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world_n.iter().zip(image_n.iter()).enumerate() {
        let xh = [pw.x, pw.y, pw.z, 1.0];
        let r0 = 2 * i;
        let r1 = r0 + 1;
        for (j, &x) in xh.iter().enumerate() {
            a[(r0, j)] = -x;
            a[(r0, 8 + j)] = pi.x * x;
            a[(r1, 4 + j)] = -x;
            a[(r1, 8 + j)] = pi.y * x;
        }
    }
    let p = null_vector(a)?;
    let p_n = Matrix3x4::from_row_slice(&p);
    let p_mat = t_i.try_inverse()? * p_n * t_w;
    if p_mat.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(p_mat)
}

/// RQ decomposition `m = K * R` with a positive diagonal in `K`.
pub fn rq_decomposition(m: &Matrix3<f64>) -> Option<(Matrix3<f64>, Matrix3<f64>)> {
    let flip = Matrix3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0);
    let qr = (flip * m).transpose().qr();
    let q = qr.q();
    let r = qr.r();
    let mut k = flip * r.transpose() * flip;
    let mut rot = flip * q.transpose();
    for i in 0..3 {
        if k[(i, i)] < 0.0 {
            k.column_mut(i).neg_mut();
            rot.row_mut(i).neg_mut();
        }
    }
    if k.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((k, rot))
}

/// Split a projection matrix into focal length, rotation and camera centre.
///
/// The focal length is the mean of the two diagonal entries of the
/// calibration matrix; skew and principal point offset are dropped.
pub fn decompose_projection(p: &Matrix3x4<f64>) -> Option<(f64, Matrix3<f64>, Vector3<f64>)> {
    let mut p = *p;
    let mut m: Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
    if m.determinant() < 0.0 {
        p = -p;
        m = -m;
    }
    let m_inv = m.try_inverse()?;
    let center = -(m_inv * p.column(3));
    let (k, rotation) = rq_decomposition(&m)?;
    if k[(2, 2)].abs() <= f64::EPSILON {
        return None;
    }
    let k = k / k[(2, 2)];
    let focal_length = 0.5 * (k[(0, 0)] + k[(1, 1)]);
    if !(focal_length > 0.0) {
        return None;
    }
    Some((focal_length, rotation, center))
}
