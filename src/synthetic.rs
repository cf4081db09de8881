//! Deterministic synthetic calibration scenes.
//!
//! A planar 9x7 board with 4 cm spacing is viewed from a ring of tilted
//! poses at 0.6 to 0.8 m. Every frame tilts the camera by 0.3 rad about a
//! direction that advances by 2.4 rad per frame, so camera centres stay
//! well apart. Pixels get optional Gaussian noise.

use crate::calibrator::{Frame, Scene};
use crate::camera::{CameraModelKind, Intrinsics, Resolution};
use crate::geometry::{rotation_matrix, world_to_camera};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, NormalError};

pub const BOARD_COLUMNS: usize = 9;
pub const BOARD_ROWS: usize = 7;
pub const BOARD_SPACING: f64 = 0.04;

/// Frame spacing of the generated timestamps (30 fps).
const FRAME_INTERVAL_US: u64 = 33_333;

/// Board corners in row-major order on the `z = 0` plane.
pub fn board_points(columns: usize, rows: usize, spacing: f64) -> Vec<Vector3<f64>> {
    (0..rows)
        .flat_map(|r| (0..columns).map(move |c| Vector3::new(c as f64 * spacing, r as f64 * spacing, 0.0)))
        .collect()
}

/// A generated scene together with its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub scene: Scene,
    pub intrinsics: Intrinsics,
    /// `(angle-axis rotation, camera centre)` per frame.
    pub poses: Vec<(Vector3<f64>, Vector3<f64>)>,
}

#[derive(Debug, Clone)]
pub struct SyntheticSceneBuilder {
    intrinsics: Intrinsics,
    num_frames: usize,
    noise_sigma: f64,
    seed: u64,
}

impl SyntheticSceneBuilder {
    /// 640x480 camera with focal length 800, principal point at the image
    /// centre and the model's default parameters.
    pub fn new(model: CameraModelKind) -> Self {
        let resolution = Resolution {
            width: 640,
            height: 480,
        };
        SyntheticSceneBuilder {
            intrinsics: Intrinsics::new(model, resolution, 800.0),
            num_frames: 20,
            noise_sigma: 0.2,
            seed: 42,
        }
    }

    pub fn intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    pub fn num_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn noise_sigma(mut self, sigma: f64) -> Self {
        self.noise_sigma = sigma;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Pose of frame `index`: the board centre sits on the optical axis.
    fn pose(index: usize, board_centre: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let phase = 2.4 * index as f64 + 0.3;
        let rotation = Vector3::new(0.3 * phase.sin(), 0.3 * phase.cos(), 0.0);
        let depth = 0.6 + 0.05 * (index % 5) as f64;
        let position = board_centre - rotation_matrix(&rotation).transpose() * Vector3::new(0.0, 0.0, depth);
        (rotation, position)
    }

    /// Fails when the noise level is negative or not finite.
    pub fn build(&self) -> Result<SyntheticScene, NormalError> {
        let noise = Normal::new(0.0, self.noise_sigma)?;
        let board = board_points(BOARD_COLUMNS, BOARD_ROWS, BOARD_SPACING);
        let board_centre = Vector3::new(
            (BOARD_COLUMNS - 1) as f64 * BOARD_SPACING / 2.0,
            (BOARD_ROWS - 1) as f64 * BOARD_SPACING / 2.0,
            0.0,
        );
        let resolution = self.intrinsics.resolution;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut frames = Vec::with_capacity(self.num_frames);
        let mut poses = Vec::with_capacity(self.num_frames);
        for index in 0..self.num_frames {
            let (rotation, position) = Self::pose(index, &board_centre);
            let observations: Vec<(usize, Vector2<f64>)> = board
                .iter()
                .enumerate()
                .filter_map(|(id, point)| {
                    let p_cam = world_to_camera(&rotation, &position, point);
                    let pixel = self.intrinsics.project(&p_cam).ok()?;
                    let inside = pixel.x >= 0.0
                        && pixel.y >= 0.0
                        && pixel.x < resolution.width as f64
                        && pixel.y < resolution.height as f64;
                    inside.then_some((id, pixel))
                })
                .map(|(id, pixel)| {
                    let offset = Vector2::new(rng.sample(noise), rng.sample(noise));
                    (id, pixel + offset)
                })
                .collect();
            frames.push(Frame {
                timestamp_us: 1_000_000 + index as u64 * FRAME_INTERVAL_US,
                observations,
            });
            poses.push((rotation, position));
        }

        Ok(SyntheticScene {
            scene: Scene {
                resolution,
                fps: 30.0,
                board_points: board,
                frames,
            },
            intrinsics: self.intrinsics.clone(),
            poses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_board_layout() {
        let board = board_points(9, 7, 0.04);
        assert_eq!(board.len(), 63);
        assert_relative_eq!(board[8], Vector3::new(0.32, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(board[62], Vector3::new(0.32, 0.24, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_noise_free_frames_see_the_whole_board() {
        let synthetic = SyntheticSceneBuilder::new(CameraModelKind::Pinhole)
            .noise_sigma(0.0)
            .build()
            .unwrap();
        assert_eq!(synthetic.scene.frames.len(), 20);
        for (frame, (rotation, position)) in synthetic.scene.frames.iter().zip(&synthetic.poses) {
            assert_eq!(frame.observations.len(), 63);
            let (id, pixel) = frame.observations[10];
            let p_cam = world_to_camera(rotation, position, &synthetic.scene.board_points[id]);
            assert_relative_eq!(synthetic.intrinsics.project(&p_cam).unwrap(), pixel, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_camera_centres_are_spread() {
        let synthetic = SyntheticSceneBuilder::new(CameraModelKind::Pinhole).build().unwrap();
        for (i, a) in synthetic.poses.iter().enumerate() {
            for b in &synthetic.poses[i + 1..] {
                assert!((a.1 - b.1).norm() > 0.05);
            }
        }
    }

    #[test]
    fn test_same_seed_same_noise() {
        let a = SyntheticSceneBuilder::new(CameraModelKind::Pinhole).seed(3).build().unwrap();
        let b = SyntheticSceneBuilder::new(CameraModelKind::Pinhole).seed(3).build().unwrap();
        assert_eq!(a.scene, b.scene);
    }

    #[test]
    fn test_pixel_noise_has_requested_spread() {
        let clean = SyntheticSceneBuilder::new(CameraModelKind::Pinhole)
            .noise_sigma(0.0)
            .build()
            .unwrap();
        let noisy = SyntheticSceneBuilder::new(CameraModelKind::Pinhole)
            .noise_sigma(0.5)
            .build()
            .unwrap();
        let offsets: Vec<f64> = clean
            .scene
            .frames
            .iter()
            .zip(&noisy.scene.frames)
            .flat_map(|(c, n)| c.observations.iter().zip(&n.observations))
            .flat_map(|((_, c), (_, n))| [n.x - c.x, n.y - c.y])
            .collect();
        let count = offsets.len() as f64;
        let mean = offsets.iter().sum::<f64>() / count;
        let stddev = (offsets.iter().map(|o| (o - mean) * (o - mean)).sum::<f64>() / count).sqrt();
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((stddev - 0.5).abs() < 0.05, "stddev {stddev}");
    }

    #[test]
    fn test_negative_noise_is_rejected() {
        let result = SyntheticSceneBuilder::new(CameraModelKind::Pinhole)
            .noise_sigma(-1.0)
            .build();
        assert!(result.is_err());
    }
}
