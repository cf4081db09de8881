//! Plane-induced homographies and what can be read off them without knowing
//! the camera: its focal length and the relative pose of the plane.
//!
//! Image coordinates are expected relative to the principal point, so the
//! calibration matrix reduces to `diag(f, f, 1)`.

use crate::geometry::project_to_so3;
use nalgebra::{DMatrix, Matrix3, Vector2, Vector3};

/// Hartley normalization: shift to zero mean and scale to mean distance
/// `sqrt(2)`. Returns the normalized points and the applied transform.
pub fn normalize_points_2d(points: &[Vector2<f64>]) -> Option<(Vec<Vector2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let centroid = points.iter().sum::<Vector2<f64>>() / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let scale = std::f64::consts::SQRT_2 / mean_dist;
    let transform = Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let normalized = points.iter().map(|p| (p - centroid) * scale).collect();
    Some((normalized, transform))
}

/// Null vector of `a` (the right singular vector of the smallest singular
/// value). Under-determined systems are zero padded to square.
pub(crate) fn null_vector(a: DMatrix<f64>) -> Option<Vec<f64>> {
    let cols = a.ncols();
    let a = if a.nrows() < cols {
        let mut padded = DMatrix::<f64>::zeros(cols, cols);
        padded.view_mut((0, 0), (a.nrows(), cols)).copy_from(&a);
        padded
    } else {
        a
    };
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_index, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    Some(v_t.row(min_index).iter().copied().collect())
}

/// Estimate `H` with `image ~ H * plane` from at least four correspondences
/// using the normalized DLT. `H[(2, 2)]` is scaled to one when possible.
pub fn dlt_homography(plane: &[Vector2<f64>], image: &[Vector2<f64>]) -> Option<Matrix3<f64>> {
    let n = plane.len();
    if n < 4 || image.len() != n {
        return None;
    }
    let (plane_n, t_p) = normalize_points_2d(plane)?;
    let (image_n, t_i) = normalize_points_2d(image)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (pw, pi)) in plane_n.iter().zip(image_n.iter()).enumerate() {
        let (x, y, u, v) = (pw.x, pw.y, pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h = null_vector(a)?;
    let h_n = Matrix3::from_row_slice(&h);
    let mut h_mat = t_i.try_inverse()? * h_n * t_p;
    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }
    if h_mat.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(h_mat)
}

/// Focal length implied by a homography under zero skew, unit aspect ratio
/// and a principal point at the origin.
///
/// The first two columns of `K^-1 H` are orthogonal and of equal norm. Both
/// constraints are linear in `1 / f^2` and are solved jointly in a
/// least-squares sense. Fails when the plane is close to fronto-parallel.
pub fn focal_from_homography(h: &Matrix3<f64>) -> Option<f64> {
    let h1 = h.column(0);
    let h2 = h.column(1);

    // a * w + b = 0 with w = 1 / f^2
    let a_orth = h1.x * h2.x + h1.y * h2.y;
    let b_orth = h1.z * h2.z;
    let a_norm = h1.x * h1.x + h1.y * h1.y - h2.x * h2.x - h2.y * h2.y;
    let b_norm = h1.z * h1.z - h2.z * h2.z;

    let denom = a_orth * a_orth + a_norm * a_norm;
    if denom <= f64::EPSILON * f64::EPSILON {
        return None;
    }
    let w = -(a_orth * b_orth + a_norm * b_norm) / denom;
    if !(w > 0.0) {
        return None;
    }
    let f = 1.0 / w.sqrt();
    f.is_finite().then_some(f)
}

/// Pose of a plane (`p_cam = R * [x, y, 0] + t`) from its homography and a
/// known focal length. The plane is placed in front of the camera.
pub fn pose_from_homography(
    h: &Matrix3<f64>,
    focal_length: f64,
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    if focal_length <= 0.0 {
        return None;
    }
    let k_inv = Matrix3::new(
        1.0 / focal_length,
        0.0,
        0.0,
        0.0,
        1.0 / focal_length,
        0.0,
        0.0,
        0.0,
        1.0,
    );
    let b1 = k_inv * h.column(0);
    let b2 = k_inv * h.column(1);
    let b3 = k_inv * h.column(2);

    let norm1 = b1.norm();
    let norm2 = b2.norm();
    if norm1 <= 1e-12 || norm2 <= 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / (norm1 + norm2);
    if b3.z < 0.0 {
        lambda = -lambda;
    }
    let r1 = b1 * lambda;
    let r2 = b2 * lambda;
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }
    let rotation = project_to_so3(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some((rotation, b3 * lambda))
}
