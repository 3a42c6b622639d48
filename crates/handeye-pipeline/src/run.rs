//! Full calibration run: detection, intrinsics, target poses, hand-eye.

use std::collections::BTreeMap;
use std::path::Path;

use handeye_core::{Iso3, Real, TargetError};
use handeye_detect::{CornerDetector, DetectionSummary};
use handeye_linear::{HandEyeMethod, HandEyeOutcome};
use image::GrayImage;
use serde::Serialize;
use tracing::info_span;

use crate::config::{CalibrationConfig, ConfigError};
use crate::diagnostics::{DiagnosticSink, PipelineEvent, Stage};
use crate::images::{list_images, load_images, ImageError};
use crate::persist::{save_handeye, save_intrinsics, save_report, CalibrationReport, PersistError};
use crate::poses::{load_wrist_poses, PoseLogError};
use crate::stages::{
    align_wrist_poses, calibrate_intrinsics, detect_corners, solve_handeye, solve_target_poses,
    AlignError, IntrinsicsCalibration, IntrinsicsError,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Grid(#[from] TargetError),
    #[error(transparent)]
    Images(#[from] ImageError),
    #[error(transparent)]
    Poses(#[from] PoseLogError),
    #[error("{images} images but {poses} logged poses")]
    CountMismatch { images: usize, poses: usize },
    #[error("no calibration images")]
    NoImages,
    #[error("chessboard not found in any of {total} images")]
    NoDetections { total: usize },
    #[error("intrinsic calibration failed: {0}")]
    Intrinsics(#[from] IntrinsicsError),
    #[error("mean reprojection error {mean:.4} px exceeds limit {limit:.4} px")]
    ReprojectionTooHigh { mean: Real, limit: Real },
    #[error("no target pose could be solved")]
    NoTargetPoses,
    #[error("image/pose alignment failed: {0}")]
    Align(#[from] AlignError),
    #[error("every hand-eye method failed")]
    NoHandEyeSolution(Box<CalibrationOutput>),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Everything a run computed, in memory.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationOutput {
    pub image_count: usize,
    pub detection: DetectionSummary,
    pub intrinsics: IntrinsicsCalibration,
    /// `(image_index, target_to_cam)` of every solved view.
    pub target_poses: Vec<(usize, Iso3)>,
    /// Wrist poses fed to the hand-eye solver, aligned with `target_poses`.
    pub wrist_to_base: Vec<Iso3>,
    pub handeye: BTreeMap<HandEyeMethod, HandEyeOutcome>,
}

impl CalibrationOutput {
    pub fn successful_methods(&self) -> impl Iterator<Item = (&HandEyeMethod, &Iso3)> {
        self.handeye
            .iter()
            .filter_map(|(m, o)| o.cam_to_wrist().map(|x| (m, x)))
    }

    pub fn report(&self) -> CalibrationReport {
        CalibrationReport {
            image_count: self.image_count,
            detected_images: self.detection.found_indices(),
            missed_images: self.detection.missed.clone(),
            intrinsics: self.intrinsics.model,
            reprojection: self.intrinsics.report.clone(),
            warnings: self.intrinsics.warnings.clone(),
            pose_images: self.target_poses.iter().map(|(i, _)| *i).collect(),
            handeye: self.handeye.clone(),
        }
    }
}

/// Calibrate from decoded images and the raw logged wrist poses.
///
/// `logged_poses[k]` belongs to `images[k]`.
pub fn run_calibration<D: CornerDetector + ?Sized>(
    images: &[GrayImage],
    logged_poses: &[Iso3],
    config: &CalibrationConfig,
    detector: &D,
    sink: &dyn DiagnosticSink,
) -> Result<CalibrationOutput, PipelineError> {
    let grid = config.grid()?;

    let count = if images.len() == logged_poses.len() {
        images.len()
    } else {
        sink.emit(PipelineEvent::error(
            Stage::Input,
            format!(
                "{} images but {} logged poses",
                images.len(),
                logged_poses.len()
            ),
        ));
        if config.strict_pose_count {
            return Err(PipelineError::CountMismatch {
                images: images.len(),
                poses: logged_poses.len(),
            });
        }
        let common = images.len().min(logged_poses.len());
        sink.emit(PipelineEvent::warning(
            Stage::Input,
            format!("continuing with the first {common} image/pose pairs"),
        ));
        common
    };
    let (images, logged_poses) = (&images[..count], &logged_poses[..count]);
    if images.is_empty() {
        return Err(PipelineError::NoImages);
    }
    let image_size = images[0].dimensions();
    let object_points = grid.object_points();

    let detection = {
        let _span = info_span!("detection", images = images.len()).entered();
        detect_corners(images, &grid, detector, sink)
    };
    if detection.corner_sets.is_empty() {
        return Err(PipelineError::NoDetections {
            total: detection.total,
        });
    }

    let intrinsics = {
        let _span = info_span!("intrinsics", views = detection.corner_sets.len()).entered();
        sink.emit(PipelineEvent::info(Stage::Intrinsics, "Calibrating camera"));
        let calib = calibrate_intrinsics(
            &detection.corner_sets,
            &object_points,
            image_size,
            &config.intrinsics,
        )?;
        for w in &calib.warnings {
            sink.emit(PipelineEvent::warning(Stage::Intrinsics, w.clone()));
        }
        let k = &calib.model.intrinsics;
        sink.emit(PipelineEvent::info(
            Stage::Intrinsics,
            format!(
                "fx={:.3} fy={:.3} cx={:.3} cy={:.3} dist={:?}",
                k.fx,
                k.fy,
                k.cx,
                k.cy,
                calib.model.dist_coeffs()
            ),
        ));
        calib
    };

    for (set, err) in detection.corner_sets.iter().zip(&intrinsics.report.per_view) {
        sink.emit(
            PipelineEvent::info(Stage::Reprojection, format!("error {err:.6} px"))
                .for_image(set.image_index),
        );
    }
    sink.emit(PipelineEvent::info(
        Stage::Reprojection,
        format!("average error {:.6} px", intrinsics.report.mean),
    ));
    if let Some(limit) = config.intrinsics.max_reprojection_error_px {
        if intrinsics.report.exceeds(limit) {
            sink.emit(PipelineEvent::warning(
                Stage::Reprojection,
                format!(
                    "average error {:.6} px exceeds limit {limit:.6} px",
                    intrinsics.report.mean
                ),
            ));
            return Err(PipelineError::ReprojectionTooHigh {
                mean: intrinsics.report.mean,
                limit,
            });
        }
    }

    let target_poses = {
        let _span = info_span!("extrinsics").entered();
        solve_target_poses(
            &detection.corner_sets,
            &object_points,
            &intrinsics.model,
            &config.extrinsics,
            sink,
        )
    };
    if target_poses.is_empty() {
        return Err(PipelineError::NoTargetPoses);
    }

    let indices: Vec<usize> = target_poses.iter().map(|(i, _)| *i).collect();
    let wrist_to_base = config
        .wrist_inversion
        .apply_all(&align_wrist_poses(logged_poses, &indices)?);
    let target_to_cam: Vec<Iso3> = target_poses.iter().map(|(_, p)| *p).collect();

    let handeye = {
        let _span = info_span!("handeye", poses = target_to_cam.len()).entered();
        solve_handeye(&wrist_to_base, &target_to_cam, &config.handeye, sink)
    };

    let output = CalibrationOutput {
        image_count: images.len(),
        detection,
        intrinsics,
        target_poses,
        wrist_to_base,
        handeye,
    };
    if output.successful_methods().next().is_none() {
        return Err(PipelineError::NoHandEyeSolution(Box::new(output)));
    }
    Ok(output)
}

/// Write intrinsics, per-method transforms and the JSON report under `out_dir`.
pub fn save_outputs(
    out_dir: &Path,
    output: &CalibrationOutput,
    config: &CalibrationConfig,
    sink: &dyn DiagnosticSink,
) -> Result<(), PipelineError> {
    let names = &config.output;
    save_intrinsics(&out_dir.join(&names.intrinsics_file), &output.intrinsics.model)?;
    let written = save_handeye(&out_dir.join(&names.transforms_dir), &output.handeye)?;
    save_report(&out_dir.join(&names.report_file), &output.report())?;
    sink.emit(PipelineEvent::info(
        Stage::Persist,
        format!(
            "saved intrinsics, {} transform files and report to {}",
            written.len(),
            out_dir.display()
        ),
    ));
    Ok(())
}

/// Load inputs from disk, calibrate and persist the results.
///
/// When every hand-eye method fails, the intrinsics and the report are
/// written before [`PipelineError::NoHandEyeSolution`] is returned.
pub fn run_from_paths<D: CornerDetector + ?Sized>(
    image_dir: &Path,
    pose_file: &Path,
    out_dir: &Path,
    config: &CalibrationConfig,
    detector: &D,
    sink: &dyn DiagnosticSink,
) -> Result<CalibrationOutput, PipelineError> {
    config.validate()?;
    let paths = list_images(image_dir)?;
    sink.emit(PipelineEvent::info(
        Stage::Input,
        format!("{} images in {}", paths.len(), image_dir.display()),
    ));
    let images = {
        let _span = info_span!("load_images", count = paths.len()).entered();
        load_images(&paths)?
    };
    let logged = load_wrist_poses(pose_file)?;
    sink.emit(PipelineEvent::info(
        Stage::Input,
        format!("{} wrist poses in {}", logged.len(), pose_file.display()),
    ));

    match run_calibration(&images, &logged, config, detector, sink) {
        Ok(output) => {
            save_outputs(out_dir, &output, config, sink)?;
            Ok(output)
        }
        // Intrinsics and the per-method failures are still worth keeping.
        Err(PipelineError::NoHandEyeSolution(output)) => {
            save_outputs(out_dir, &output, config, sink)?;
            Err(PipelineError::NoHandEyeSolution(output))
        }
        Err(e) => Err(e),
    }
}

