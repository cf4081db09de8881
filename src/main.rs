//! Command line front end of the calibrator.
//!
//! ```bash
//! camera-calibrator --scene scene.json --camera-model DOUBLE_SPHERE --output output/cam0
//! camera-calibrator --synthetic --camera-model PINHOLE
//! ```

use camera_calibrator::synthetic::SyntheticSceneBuilder;
use camera_calibrator::{io, CalibratorConfig, CameraCalibrator, CameraModelKind};
use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info};
use std::path::PathBuf;

/// Intrinsic camera calibration from calibration-board observations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scene JSON with board points and per-frame image points
    #[arg(short = 's', long, required_unless_present = "synthetic")]
    scene: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Camera model, e.g. PINHOLE, DIVISION_UNDISTORTION, DOUBLE_SPHERE
    #[arg(short = 'm', long)]
    camera_model: Option<CameraModelKind>,

    /// Refine the board points after the view stages
    #[arg(long)]
    optimize_board_points: bool,

    /// Minimum number of views that must survive every stage
    #[arg(long)]
    min_num_views: Option<usize>,

    /// Path prefix of the written artifacts
    #[arg(short = 'o', long, default_value = "output/calibration")]
    output: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Calibrate a generated 9x7 board scene instead of reading one
    #[arg(long)]
    synthetic: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CalibratorConfig::load_yaml(path)?,
        None => CalibratorConfig::default(),
    };
    if let Some(model) = cli.camera_model {
        config.camera_model = model;
    }
    if let Some(min_num_views) = cli.min_num_views {
        config.min_num_views = min_num_views;
    }
    config.optimize_board_points |= cli.optimize_board_points;

    let level = if config.verbose { "debug" } else { cli.log_level.as_str() };
    Logger::try_with_str(level)?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let scene = match &cli.scene {
        Some(path) if !cli.synthetic => io::load_scene(path)?,
        _ => {
            info!("Generating a synthetic {} scene", config.camera_model);
            SyntheticSceneBuilder::new(config.camera_model).build()?.scene
        }
    };

    info!(
        "Calibrating {} from {} frames ({}x{})",
        config.camera_model,
        scene.frames.len(),
        scene.resolution.width,
        scene.resolution.height
    );
    let calibrator = CameraCalibrator::new(config)?;
    let outcome = match calibrator.calibrate_and_save(&scene, &cli.output) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Calibration failed: {}", e);
            return Err(e.into());
        }
    };

    let intrinsics = &outcome.intrinsics;
    let pp = intrinsics.principal_point();
    println!("Camera model:      {}", intrinsics.model);
    println!("Focal length:      {:.4}", intrinsics.focal_length());
    println!("Aspect ratio:      {:.6}", intrinsics.aspect_ratio());
    println!("Principal point:   ({:.4}, {:.4})", pp.x, pp.y);
    for (param, value) in intrinsics
        .model
        .parameters()
        .iter()
        .zip(intrinsics.model_parameters())
    {
        println!("{:<18} {:.6}", format!("{}:", param.name), value);
    }
    println!("Views:             {}", outcome.num_views());
    println!(
        "Frames:            {} processed, {} failed, {} duplicates, {} pruned",
        outcome.stats.frames_processed,
        outcome.stats.initialization_failures,
        outcome.stats.duplicates_rejected,
        outcome.stats.views_pruned
    );
    println!("Reprojection error: {:.4} px", outcome.mean_reprojection_error);
    println!("Results written with prefix {}", cli.output.display());
    Ok(())
}
