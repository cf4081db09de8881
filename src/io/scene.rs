//! Scene JSON: image size, frame rate, board geometry and per-frame corners.
//!
//! ```json
//! {
//!   "image_width": 640, "image_height": 480, "camera_fps": 30.0,
//!   "board_points": { "0": [0.0, 0.0, 0.0], "1": [0.04, 0.0, 0.0] },
//!   "views": { "1000000": { "image_points": { "0": [312.5, 240.1] } } }
//! }
//! ```

use crate::calibrator::{Frame, Scene};
use crate::camera::Resolution;
use crate::error::IoError;
use log::{info, warn};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ViewRecord {
    image_points: BTreeMap<String, [f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SceneRecord {
    image_width: u32,
    image_height: u32,
    #[serde(default)]
    camera_fps: f64,
    views: BTreeMap<String, ViewRecord>,
    board_points: BTreeMap<String, [f64; 3]>,
}

fn parse_id<T: std::str::FromStr>(key: &str, what: &str) -> Result<T, IoError> {
    key.trim()
        .parse()
        .map_err(|_| IoError::InvalidScene(format!("{what} '{key}' is not an integer")))
}

impl SceneRecord {
    fn into_scene(self) -> Result<Scene, IoError> {
        // Board ids are sorted numerically so that indices follow the ids.
        let mut board: Vec<(u64, Vector3<f64>)> = self
            .board_points
            .iter()
            .map(|(key, p)| Ok((parse_id(key, "board point id")?, Vector3::new(p[0], p[1], p[2]))))
            .collect::<Result<_, IoError>>()?;
        board.sort_by_key(|(id, _)| *id);
        let index_of: HashMap<u64, usize> =
            board.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();

        let mut frames = Vec::with_capacity(self.views.len());
        let mut ignored = 0usize;
        for (key, view) in &self.views {
            let timestamp_us: u64 = parse_id(key, "timestamp")?;
            let mut observations = Vec::with_capacity(view.image_points.len());
            for (id, pixel) in &view.image_points {
                match parse_id::<u64>(id, "image point id")
                    .ok()
                    .and_then(|id| index_of.get(&id))
                {
                    Some(&index) => observations.push((index, Vector2::new(pixel[0], pixel[1]))),
                    None => ignored += 1,
                }
            }
            observations.sort_by_key(|(index, _)| *index);
            frames.push(Frame {
                timestamp_us,
                observations,
            });
        }
        frames.sort_by_key(|f| f.timestamp_us);
        if ignored > 0 {
            warn!("Ignored {} image points without a board point", ignored);
        }

        Ok(Scene {
            resolution: Resolution {
                width: self.image_width,
                height: self.image_height,
            },
            fps: self.camera_fps,
            board_points: board.into_iter().map(|(_, p)| p).collect(),
            frames,
        })
    }

    fn from_scene(scene: &Scene) -> Self {
        let board_points = scene
            .board_points
            .iter()
            .enumerate()
            .map(|(i, p)| (i.to_string(), [p.x, p.y, p.z]))
            .collect();
        let views = scene
            .frames
            .iter()
            .map(|frame| {
                let image_points = frame
                    .observations
                    .iter()
                    .map(|(id, px)| (id.to_string(), [px.x, px.y]))
                    .collect();
                (frame.timestamp_us.to_string(), ViewRecord { image_points })
            })
            .collect();
        SceneRecord {
            image_width: scene.resolution.width,
            image_height: scene.resolution.height,
            camera_fps: scene.fps,
            views,
            board_points,
        }
    }
}

pub fn parse_scene(json: &str) -> Result<Scene, IoError> {
    let record: SceneRecord = serde_json::from_str(json)?;
    record.into_scene()
}

pub fn load_scene(path: impl AsRef<Path>) -> Result<Scene, IoError> {
    let path = path.as_ref();
    let record: SceneRecord = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let scene = record.into_scene()?;
    info!(
        "Loaded {} frames and {} board points from {}",
        scene.frames.len(),
        scene.board_points.len(),
        path.display()
    );
    Ok(scene)
}

pub fn save_scene(scene: &Scene, path: impl AsRef<Path>) -> Result<(), IoError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &SceneRecord::from_scene(scene))?;
    Ok(())
}
