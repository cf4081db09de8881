//! ASCII PLY export of camera centres for external viewers.

use crate::dataset::CameraPose;
use crate::error::IoError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write one vertex per pose at the camera centre.
pub fn write_poses<W: Write>(poses: &[CameraPose], mut out: W) -> Result<(), IoError> {
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", poses.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(out, "property double {axis}")?;
    }
    writeln!(out, "end_header")?;
    for pose in poses {
        writeln!(
            out,
            "{:.9} {:.9} {:.9}",
            pose.position.x, pose.position.y, pose.position.z
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn save_poses(poses: &[CameraPose], path: impl AsRef<Path>) -> Result<(), IoError> {
    write_poses(poses, BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_header_and_vertices() {
        let poses = vec![
            CameraPose {
                name: "0".to_string(),
                position: Vector3::new(0.5, -0.25, 1.0),
                rotation: Vector3::zeros(),
            },
            CameraPose {
                name: "1".to_string(),
                position: Vector3::new(0.0, 0.0, -2.0),
                rotation: Vector3::zeros(),
            },
        ];
        let mut buffer = Vec::new();
        write_poses(&poses, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ply");
        assert_eq!(lines[2], "element vertex 2");
        assert_eq!(lines[6], "end_header");
        assert_eq!(lines[7], "0.500000000 -0.250000000 1.000000000");
        assert_eq!(lines.len(), 9);
    }
}
