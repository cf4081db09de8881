//! Rigid-body helpers and the closed-form solvers used to seed view poses.
//!
//! Rotations are stored as angle-axis vectors mapping world coordinates into
//! the camera frame. A board point `X` is seen at `R(w) * (X - c)` where `c`
//! is the camera centre in the world frame.

use nalgebra::{Matrix3, RealField, Rotation3, Vector3, Vector4};

pub mod dlt;
pub mod homography;
pub mod plane;

/// Rotate `point` by the angle-axis vector `angle_axis`.
///
/// Falls back to the first-order expansion `p + w x p` near the identity so
/// the derivative stays well defined at zero rotation.
pub fn angle_axis_rotate<T: RealField>(angle_axis: &Vector3<T>, point: &Vector3<T>) -> Vector3<T> {
    let theta2 = angle_axis.norm_squared();
    if theta2 > nalgebra::convert::<f64, T>(f64::EPSILON) {
        let theta = theta2.sqrt();
        let axis = angle_axis / theta.clone();
        let (sin_theta, cos_theta) = theta.sin_cos();
        let k_cross_p = axis.cross(point);
        let k_dot_p = axis.dot(point);
        point * cos_theta.clone()
            + k_cross_p * sin_theta
            + axis * (k_dot_p * (T::one() - cos_theta))
    } else {
        point + angle_axis.cross(point)
    }
}

/// Transform a world point into the camera frame of a view.
pub fn world_to_camera<T: RealField>(
    rotation: &Vector3<T>,
    position: &Vector3<T>,
    point: &Vector3<T>,
) -> Vector3<T> {
    angle_axis_rotate(rotation, &(point - position))
}

/// Same as [`world_to_camera`] for a homogeneous point `(x, y, z, w)`.
///
/// Computes `R * (xyz - w * c)`, which stays finite for points at infinity.
pub fn homogeneous_world_to_camera<T: RealField>(
    rotation: &Vector3<T>,
    position: &Vector3<T>,
    point: &Vector4<T>,
) -> Vector3<T> {
    let xyz = Vector3::new(point.x.clone(), point.y.clone(), point.z.clone());
    angle_axis_rotate(rotation, &(xyz - position * point.w.clone()))
}

pub fn rotation_matrix(angle_axis: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_scaled_axis(*angle_axis).into_inner()
}

/// Angle-axis vector of a proper rotation matrix.
pub fn angle_axis_from_matrix(rotation: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(rotation).scaled_axis()
}

/// Camera centre of the pose `p_cam = R * X + t`.
pub fn camera_center(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Vector3<f64> {
    -(rotation.transpose() * translation)
}

/// Closest rotation to `m` in the Frobenius norm.
pub fn project_to_so3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Some(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rotate_matches_nalgebra() {
        let w = Vector3::new(0.1, -0.4, 0.25);
        let p = Vector3::new(1.0, 2.0, -3.0);
        let expected = Rotation3::from_scaled_axis(w) * p;
        let rotated = angle_axis_rotate(&w, &p);
        assert_relative_eq!(rotated, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_near_identity() {
        let w = Vector3::new(1e-10, 0.0, 0.0);
        let p = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(angle_axis_rotate(&w, &p), p, epsilon = 1e-9);
    }

    #[test]
    fn test_homogeneous_transform_matches_euclidean() {
        let w = Vector3::new(0.2, 0.1, -0.3);
        let c = Vector3::new(0.1, 0.2, -1.0);
        let x = Vector3::new(0.3, -0.2, 0.0);
        let xh = Vector4::new(0.6, -0.4, 0.0, 2.0);
        assert_relative_eq!(
            homogeneous_world_to_camera(&w, &c, &xh) / 2.0,
            world_to_camera(&w, &c, &x),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_angle_axis_round_trip() {
        let w = Vector3::new(0.5, -0.2, 0.9);
        assert_relative_eq!(angle_axis_from_matrix(&rotation_matrix(&w)), w, epsilon = 1e-10);
    }

    #[test]
    fn test_camera_center() {
        let r = rotation_matrix(&Vector3::new(0.0, 0.3, 0.0));
        let c = Vector3::new(0.5, -0.1, -2.0);
        let t = -(r * c);
        assert_relative_eq!(camera_center(&r, &t), c, epsilon = 1e-12);
    }

    #[test]
    fn test_project_to_so3_removes_scale() {
        let r = rotation_matrix(&Vector3::new(0.1, 0.2, 0.3));
        let projected = project_to_so3(&(r * 2.5)).unwrap();
        assert_relative_eq!(projected, r, epsilon = 1e-10);
    }
}
