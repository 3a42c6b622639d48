//! Individual pipeline stages.
//!
//! Each stage is a plain function over in-memory data so it can be tested in
//! isolation; [`crate::run`] chains them.

use std::collections::BTreeMap;

use handeye_core::{
    euler_xyz_degrees, reprojection_report, BrownConrady5, CornerSet, FxFyCxCySkew, GridGeometry,
    IntrinsicModel, Iso3, Pt2, Pt3, Real, ReprojectionError, ReprojectionReport,
};
use handeye_detect::{detect_all, CornerDetector, DetectionSummary};
use handeye_linear::{
    dlt_homography, estimate_intrinsics_iterative, planar_pnp, pose_from_homography,
    solve_all_methods, HandEyeMethod, HandEyeOptions, HandEyeOutcome, HomographyError,
    IterativeIntrinsicsOptions, PlanarPoseError, PlanarView, PnpError,
};
use handeye_optim::{
    refine_planar_intrinsics, refine_pose, LmBackend, OptimError, PlanarIntrinsicsProblem,
    PlanarViewObservations, PoseRefineProblem, SolveOptions, SolveReport,
};
use image::GrayImage;
use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{ExtrinsicsConfig, HandEyeConfig, IntrinsicsConfig};
use crate::diagnostics::{DiagnosticSink, PipelineEvent, Stage};

// ---------- detection ----------

/// Detect the target in every image, reporting each outcome and the batch summary.
pub fn detect_corners<D: CornerDetector + ?Sized>(
    images: &[GrayImage],
    grid: &GridGeometry,
    detector: &D,
    sink: &dyn DiagnosticSink,
) -> DetectionSummary {
    sink.emit(PipelineEvent::info(Stage::Detection, "Finding corners"));
    let summary = detect_all(images, grid, detector, |idx, found| {
        if found {
            sink.emit(PipelineEvent::info(Stage::Detection, "chessboard found").for_image(idx));
        } else {
            sink.emit(PipelineEvent::error(Stage::Detection, "chessboard not found").for_image(idx));
        }
    });
    sink.emit(PipelineEvent::info(Stage::Detection, summary.describe()));
    summary
}

// ---------- intrinsics ----------

#[derive(Debug, thiserror::Error)]
pub enum IntrinsicsError {
    #[error("no views to calibrate from")]
    NoViews,
    #[error("view {view}: homography failed: {source}")]
    Homography {
        view: usize,
        #[source]
        source: HomographyError,
    },
    #[error("view {view}: initial pose failed: {source}")]
    InitialPose {
        view: usize,
        #[source]
        source: PlanarPoseError,
    },
    #[error("refinement failed: {0}")]
    Optim(#[from] OptimError),
    #[error("reprojection check failed: {0}")]
    Reprojection(#[from] ReprojectionError),
    #[error("refinement from the image-size guess did not converge in {iterations} iterations")]
    FallbackDiverged { iterations: usize },
}

/// Refined camera model with the board pose of every view.
#[derive(Debug, Clone, Serialize)]
pub struct IntrinsicsCalibration {
    pub model: IntrinsicModel,
    /// `target_to_cam` per view, same order as the input corner sets.
    pub poses: Vec<Iso3>,
    pub report: ReprojectionReport,
    /// Quality problems that did not prevent a result.
    pub warnings: Vec<String>,
    pub solve: SolveReport,
}

/// Guess used when the closed-form initialisation is impossible or fails.
fn fallback_intrinsics(image_size: (u32, u32)) -> IntrinsicModel {
    let (w, h) = (image_size.0 as Real, image_size.1 as Real);
    let f = w.max(h);
    IntrinsicModel::pinhole(FxFyCxCySkew {
        fx: f,
        fy: f,
        cx: 0.5 * w,
        cy: 0.5 * h,
        skew: 0.0,
    })
}

/// Largest angle (degrees) between the board normals of any two views.
pub fn max_view_angle_deg(poses: &[Iso3]) -> Real {
    let normals: Vec<_> = poses
        .iter()
        .map(|p| p.rotation * nalgebra::Vector3::z())
        .collect();
    let mut max_angle: Real = 0.0;
    for (a, na) in normals.iter().enumerate() {
        for nb in &normals[a + 1..] {
            max_angle = max_angle.max(na.angle(nb));
        }
    }
    max_angle.to_degrees()
}

/// Calibrate a pinhole + Brown–Conrady camera from complete corner sets.
///
/// Identical inputs always produce identical outputs.
pub fn calibrate_intrinsics(
    corner_sets: &[CornerSet],
    object_points: &[Pt3],
    image_size: (u32, u32),
    config: &IntrinsicsConfig,
) -> Result<IntrinsicsCalibration, IntrinsicsError> {
    let n = corner_sets.len();
    if n == 0 {
        return Err(IntrinsicsError::NoViews);
    }
    let mut warnings = Vec::new();
    if n < config.min_views_warn {
        warnings.push(format!(
            "only {n} usable views, at least {} recommended",
            config.min_views_warn
        ));
    }

    let board: Vec<Pt2> = object_points.iter().map(|p| Pt2::new(p.x, p.y)).collect();
    let mut from_fallback = false;
    let init = if n >= 3 {
        let views: Vec<PlanarView> = corner_sets
            .iter()
            .map(|c| PlanarView::new(board.clone(), c.points.clone()))
            .collect();
        match estimate_intrinsics_iterative(&views, IterativeIntrinsicsOptions::default()) {
            Ok(model) => model,
            Err(e) => {
                warnings.push(format!("linear initialisation failed ({e}); using image-size guess"));
                from_fallback = true;
                fallback_intrinsics(image_size)
            }
        }
    } else {
        warnings.push("too few views for linear initialisation; using image-size guess".to_string());
        from_fallback = true;
        fallback_intrinsics(image_size)
    };
    let init = IntrinsicModel::new(
        init.intrinsics,
        BrownConrady5 {
            iters: init.distortion.iters.max(8),
            ..init.distortion
        },
    );
    debug!("intrinsics init: {:?}", init);

    let k = init.k_matrix();
    let init_poses = corner_sets
        .iter()
        .enumerate()
        .map(|(view, c)| {
            let undistorted: Vec<Pt2> = c.points.iter().map(|p| init.undistort_pixel(p)).collect();
            let h = dlt_homography(&board, &undistorted)
                .map_err(|source| IntrinsicsError::Homography { view, source })?;
            pose_from_homography(&k, &h).map_err(|source| IntrinsicsError::InitialPose { view, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let observations = corner_sets
        .iter()
        .map(|c| PlanarViewObservations::new(object_points.to_vec(), c.points.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let problem = PlanarIntrinsicsProblem::new(observations)?;
    let opts = SolveOptions {
        max_iters: config.max_iters,
        ..SolveOptions::default()
    };
    let est = refine_planar_intrinsics(&LmBackend, problem, &init, &init_poses, &opts)?;
    if !est.report.converged {
        if from_fallback {
            return Err(IntrinsicsError::FallbackDiverged {
                iterations: est.report.iterations,
            });
        }
        warnings.push(format!(
            "intrinsics refinement stopped without converging after {} iterations",
            est.report.iterations
        ));
    }

    if n >= 2 {
        let spread = max_view_angle_deg(&est.poses);
        if spread < config.min_view_angle_deg {
            warnings.push(format!(
                "views are nearly parallel (max board tilt difference {spread:.2} deg)"
            ));
        }
    }

    let points: Vec<&[Pt2]> = corner_sets.iter().map(|c| c.points.as_slice()).collect();
    let report = reprojection_report(&est.model, &est.poses, object_points, &points)?;

    Ok(IntrinsicsCalibration {
        model: est.model,
        poses: est.poses,
        report,
        warnings,
        solve: est.report,
    })
}

// ---------- per-pose extrinsics ----------

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("initial pose failed: {0}")]
    Seed(#[from] PnpError),
    #[error("pose refinement failed: {0}")]
    Refine(#[from] OptimError),
    #[error("target ends up behind the camera")]
    BehindCamera,
}

/// `target_to_cam` of one view with the camera model held fixed.
pub fn solve_target_pose(
    corners: &[Pt2],
    object_points: &[Pt3],
    model: &IntrinsicModel,
    config: &ExtrinsicsConfig,
) -> Result<Iso3, PoseError> {
    let seed = planar_pnp(object_points, corners, model)?;
    let problem = PoseRefineProblem::new(model, object_points, corners)?;
    let opts = SolveOptions {
        max_iters: config.max_iters,
        ..SolveOptions::default()
    };
    let (pose, _) = refine_pose(&LmBackend, &problem, &seed, &opts)?;
    if object_points.iter().any(|p| pose.transform_point(p).z <= 0.0) {
        return Err(PoseError::BehindCamera);
    }
    Ok(pose)
}

/// Target pose of every corner set; failures are reported and left out.
///
/// Returns `(image_index, target_to_cam)` ascending by image index.
pub fn solve_target_poses(
    corner_sets: &[CornerSet],
    object_points: &[Pt3],
    model: &IntrinsicModel,
    config: &ExtrinsicsConfig,
    sink: &dyn DiagnosticSink,
) -> Vec<(usize, Iso3)> {
    let results: Vec<(usize, Result<Iso3, PoseError>)> = corner_sets
        .par_iter()
        .map(|c| (c.image_index, solve_target_pose(&c.points, object_points, model, config)))
        .collect();

    results
        .into_iter()
        .filter_map(|(idx, res)| match res {
            Ok(pose) => Some((idx, pose)),
            Err(e) => {
                sink.emit(
                    PipelineEvent::error(Stage::Extrinsics, format!("pose not solved: {e}"))
                        .for_image(idx),
                );
                None
            }
        })
        .collect()
}

// ---------- alignment ----------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AlignError {
    #[error("image index {index} has no logged pose ({poses} poses)")]
    MissingPose { index: usize, poses: usize },
    #[error("image indices are not strictly ascending at position {0}")]
    Unordered(usize),
}

/// Select the wrist poses of the images that survived the previous stages.
///
/// `image_indices` must be strictly ascending positions into `wrist_poses`.
pub fn align_wrist_poses(
    wrist_poses: &[Iso3],
    image_indices: &[usize],
) -> Result<Vec<Iso3>, AlignError> {
    if let Some(pos) = image_indices.windows(2).position(|w| w[0] >= w[1]) {
        return Err(AlignError::Unordered(pos + 1));
    }
    image_indices
        .iter()
        .map(|&index| {
            wrist_poses.get(index).copied().ok_or(AlignError::MissingPose {
                index,
                poses: wrist_poses.len(),
            })
        })
        .collect()
}

// ---------- hand-eye ----------

/// Run every configured method and report each outcome.
pub fn solve_handeye(
    wrist_to_base: &[Iso3],
    target_to_cam: &[Iso3],
    config: &HandEyeConfig,
    sink: &dyn DiagnosticSink,
) -> BTreeMap<HandEyeMethod, HandEyeOutcome> {
    let opts = HandEyeOptions {
        min_angle_deg: config.min_angle_deg,
    };
    let outcomes = solve_all_methods(&config.methods, wrist_to_base, target_to_cam, &opts);

    for (method, outcome) in &outcomes {
        sink.emit(PipelineEvent::info(Stage::HandEye, format!("Trying method {method}")));
        match outcome {
            HandEyeOutcome::Success {
                cam_to_wrist,
                wrist_to_cam,
            } => {
                for (label, t) in [("camera to wrist", cam_to_wrist), ("wrist to camera", wrist_to_cam)] {
                    let v = t.translation.vector;
                    let e = euler_xyz_degrees(&t.rotation);
                    sink.emit(PipelineEvent::info(
                        Stage::HandEye,
                        format!(
                            "{method}: {label} translation [{:.4}, {:.4}, {:.4}] mm, rotation (euler xyz) [{:.4}, {:.4}, {:.4}] deg",
                            v.x, v.y, v.z, e.x, e.y, e.z
                        ),
                    ));
                }
            }
            HandEyeOutcome::Failure { reason } => {
                sink.emit(PipelineEvent::error(
                    Stage::HandEye,
                    format!("Method {method} failed. Reason: {reason}"),
                ));
            }
        }
    }
    outcomes
}
