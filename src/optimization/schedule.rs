//! Progressive refinement schedule.
//!
//! Stages run in a fixed order, each widening the set of free parameters:
//!
//! 1. [`Stage::FocalRadial`]: poses, focal length and (except for the plain
//!    pinhole) radial parameters, followed by coarse pruning.
//! 2. [`Stage::PrincipalPoint`]: principal point only, poses fixed, then a
//!    minimum view check.
//! 3. [`Stage::Full`]: poses, focal length, aspect ratio, principal point,
//!    radial parameters and, for the radial-tangential model, tangential
//!    parameters; followed by fine pruning and a minimum view check.
//! 4. [`Stage::BoardPoints`]: only when enabled, board points are refined
//!    with views fixed and the full view stage is repeated.

use crate::camera::CameraModelKind;
use crate::dataset::{CalibrationDataset, ViewId};
use crate::error::CalibrationError;
use crate::optimization::{
    bundle_adjust_tracks, bundle_adjust_views, BundleAdjustmentOptions, OptimizeIntrinsics,
};
use crate::pruning::{mean_reprojection_error, ViewPruner};
use log::info;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FocalRadial,
    PrincipalPoint,
    Full,
    BoardPoints,
    Done,
}

impl Stage {
    /// The stage following `self`.
    pub fn next(self, optimize_board_points: bool) -> Stage {
        match self {
            Stage::FocalRadial => Stage::PrincipalPoint,
            Stage::PrincipalPoint => Stage::Full,
            Stage::Full if optimize_board_points => Stage::BoardPoints,
            Stage::Full | Stage::BoardPoints | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FocalRadial => "focal and radial stage",
            Stage::PrincipalPoint => "principal point stage",
            Stage::Full => "full stage",
            Stage::BoardPoints => "board point stage",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Which parameters a stage frees and what follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub intrinsics: OptimizeIntrinsics,
    pub pose_free: bool,
    pub refine_tracks: bool,
    pub prune_threshold: Option<f64>,
    pub check_min_views: bool,
}

/// Result of one executed stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    pub pruned: Vec<(ViewId, f64)>,
    pub num_views: usize,
    pub mean_error: f64,
}

#[derive(Debug, Clone)]
pub struct ProgressiveBundleAdjuster {
    pub model: CameraModelKind,
    pub options: BundleAdjustmentOptions,
    pub prune_threshold_coarse: f64,
    pub prune_threshold_fine: f64,
    pub min_num_views: usize,
    pub optimize_board_points: bool,
}

impl ProgressiveBundleAdjuster {
    fn full_intrinsics(&self) -> OptimizeIntrinsics {
        let mut mask = OptimizeIntrinsics::PRINCIPAL_POINTS
            | OptimizeIntrinsics::FOCAL_LENGTH
            | OptimizeIntrinsics::ASPECT_RATIO
            | OptimizeIntrinsics::RADIAL_DISTORTION;
        if self.model == CameraModelKind::PinholeRadialTangential {
            mask |= OptimizeIntrinsics::TANGENTIAL_DISTORTION;
        }
        mask
    }

    pub fn plan(&self, stage: Stage) -> StagePlan {
        match stage {
            Stage::FocalRadial => {
                let mut intrinsics = OptimizeIntrinsics::FOCAL_LENGTH;
                if self.model != CameraModelKind::Pinhole {
                    intrinsics |= OptimizeIntrinsics::RADIAL_DISTORTION;
                }
                StagePlan {
                    intrinsics,
                    pose_free: true,
                    refine_tracks: false,
                    prune_threshold: Some(self.prune_threshold_coarse),
                    check_min_views: false,
                }
            }
            Stage::PrincipalPoint => StagePlan {
                intrinsics: OptimizeIntrinsics::PRINCIPAL_POINTS,
                pose_free: false,
                refine_tracks: false,
                prune_threshold: None,
                check_min_views: true,
            },
            Stage::Full => StagePlan {
                intrinsics: self.full_intrinsics(),
                pose_free: true,
                refine_tracks: false,
                prune_threshold: Some(self.prune_threshold_fine),
                check_min_views: true,
            },
            Stage::BoardPoints => StagePlan {
                intrinsics: self.full_intrinsics(),
                pose_free: true,
                refine_tracks: true,
                prune_threshold: None,
                check_min_views: false,
            },
            Stage::Done => StagePlan {
                intrinsics: OptimizeIntrinsics::NONE,
                pose_free: false,
                refine_tracks: false,
                prune_threshold: None,
                check_min_views: false,
            },
        }
    }

    fn check_min_views(&self, stage: Stage, dataset: &CalibrationDataset) -> Result<(), CalibrationError> {
        let found = dataset.num_views();
        if found < self.min_num_views {
            return Err(CalibrationError::InsufficientViews {
                stage: stage.to_string(),
                found,
                required: self.min_num_views,
            });
        }
        Ok(())
    }

    /// Execute a single stage: optimize, prune, then check the view count.
    pub fn run_stage(
        &self,
        stage: Stage,
        dataset: &mut CalibrationDataset,
    ) -> Result<StageReport, CalibrationError> {
        let plan = self.plan(stage);
        info!("Running {} on {} views", stage, dataset.num_views());

        if plan.refine_tracks {
            bundle_adjust_tracks(dataset, &self.options)?;
        }
        bundle_adjust_views(dataset, &self.options, plan.intrinsics, plan.pose_free)?;

        let pruned = match plan.prune_threshold {
            Some(threshold) => ViewPruner::new(threshold).prune(dataset),
            None => Vec::new(),
        };
        if plan.check_min_views {
            self.check_min_views(stage, dataset)?;
        }

        let report = StageReport {
            stage,
            pruned,
            num_views: dataset.num_views(),
            mean_error: mean_reprojection_error(dataset),
        };
        info!(
            "Finished {}: {} views, mean reprojection error {:.4} px",
            stage, report.num_views, report.mean_error
        );
        Ok(report)
    }

    /// Run all stages in order. Fails before optimizing when the dataset is
    /// already below the minimum view count.
    pub fn run(&self, dataset: &mut CalibrationDataset) -> Result<Vec<StageReport>, CalibrationError> {
        let found = dataset.num_views();
        if found < self.min_num_views {
            return Err(CalibrationError::InsufficientViews {
                stage: "bundle adjustment entry".to_string(),
                found,
                required: self.min_num_views,
            });
        }

        let mut reports = Vec::new();
        let mut stage = Stage::FocalRadial;
        while stage != Stage::Done {
            reports.push(self.run_stage(stage, dataset)?);
            stage = stage.next(self.optimize_board_points);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjuster(model: CameraModelKind) -> ProgressiveBundleAdjuster {
        ProgressiveBundleAdjuster {
            model,
            options: BundleAdjustmentOptions::default(),
            prune_threshold_coarse: 5.0,
            prune_threshold_fine: 2.0,
            min_num_views: 10,
            optimize_board_points: false,
        }
    }

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::FocalRadial;
        let mut seen = vec![stage];
        while stage != Stage::Done {
            stage = stage.next(false);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![Stage::FocalRadial, Stage::PrincipalPoint, Stage::Full, Stage::Done]
        );
        assert_eq!(Stage::Full.next(true), Stage::BoardPoints);
        assert_eq!(Stage::BoardPoints.next(true), Stage::Done);
    }

    #[test]
    fn test_pinhole_stage_one_keeps_distortion_fixed() {
        let plan = adjuster(CameraModelKind::Pinhole).plan(Stage::FocalRadial);
        assert_eq!(plan.intrinsics, OptimizeIntrinsics::FOCAL_LENGTH);
        assert_eq!(plan.prune_threshold, Some(5.0));

        let plan = adjuster(CameraModelKind::DoubleSphere).plan(Stage::FocalRadial);
        assert!(plan.intrinsics.contains(OptimizeIntrinsics::RADIAL_DISTORTION));
        assert!(!plan.intrinsics.contains(OptimizeIntrinsics::PRINCIPAL_POINTS));
    }

    #[test]
    fn test_principal_point_stage_fixes_poses() {
        let plan = adjuster(CameraModelKind::Fisheye).plan(Stage::PrincipalPoint);
        assert_eq!(plan.intrinsics, OptimizeIntrinsics::PRINCIPAL_POINTS);
        assert!(!plan.pose_free);
        assert!(plan.check_min_views);
        assert_eq!(plan.prune_threshold, None);
    }

    #[test]
    fn test_full_stage_tangential_only_for_rad_tan() {
        let rt = adjuster(CameraModelKind::PinholeRadialTangential).plan(Stage::Full);
        assert!(rt.intrinsics.contains(OptimizeIntrinsics::TANGENTIAL_DISTORTION));
        let pinhole = adjuster(CameraModelKind::Pinhole).plan(Stage::Full);
        assert!(pinhole.intrinsics.contains(OptimizeIntrinsics::RADIAL_DISTORTION));
        assert!(!pinhole.intrinsics.contains(OptimizeIntrinsics::TANGENTIAL_DISTORTION));
        assert_eq!(pinhole.prune_threshold, Some(2.0));
    }

    #[test]
    fn test_run_rejects_small_dataset() {
        let mut dataset = CalibrationDataset::new(
            CameraModelKind::Pinhole,
            crate::camera::Resolution {
                width: 640,
                height: 480,
            },
        );
        let result = adjuster(CameraModelKind::Pinhole).run(&mut dataset);
        assert!(matches!(
            result,
            Err(CalibrationError::InsufficientViews {
                found: 0,
                required: 10,
                ..
            })
        ));
    }
}
