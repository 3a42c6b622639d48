//! Reprojection error of a calibrated camera against detected corners.
//!
//! Per view, the error is the L2 norm of the stacked `(du, dv)` residual vector
//! divided by the number of points. The aggregate is the mean over views.

use serde::{Deserialize, Serialize};

use crate::{IntrinsicModel, Iso3, Pt2, Pt3, Real};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReprojectionError {
    #[error("view {view}: {points} object points vs {corners} corners")]
    LengthMismatch {
        view: usize,
        points: usize,
        corners: usize,
    },
    #[error("view {view}: point {point} projects behind the camera")]
    NotProjectable { view: usize, point: usize },
    #[error("{poses} poses for {views} corner sets")]
    ViewCountMismatch { poses: usize, views: usize },
    #[error("no views to evaluate")]
    Empty,
}

/// Per-view and mean reprojection error in pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionReport {
    pub per_view: Vec<Real>,
    pub mean: Real,
}

impl ReprojectionReport {
    /// `true` when the mean error is above `threshold_px`.
    pub fn exceeds(&self, threshold_px: Real) -> bool {
        self.mean > threshold_px
    }

    pub fn max(&self) -> Real {
        self.per_view.iter().copied().fold(0.0, Real::max)
    }
}

/// Reprojection error of one view.
pub fn view_error(
    view: usize,
    model: &IntrinsicModel,
    target_to_cam: &Iso3,
    object_points: &[Pt3],
    corners: &[Pt2],
) -> Result<Real, ReprojectionError> {
    if object_points.len() != corners.len() || corners.is_empty() {
        return Err(ReprojectionError::LengthMismatch {
            view,
            points: object_points.len(),
            corners: corners.len(),
        });
    }
    let mut sq = 0.0;
    for (point, (pw, obs)) in object_points.iter().zip(corners).enumerate() {
        let proj = model
            .project_target_point(target_to_cam, pw)
            .ok_or(ReprojectionError::NotProjectable { view, point })?;
        sq += (proj - obs).norm_squared();
    }
    Ok(sq.sqrt() / corners.len() as Real)
}

/// Evaluate every view against the shared object points.
pub fn reprojection_report<C: AsRef<[Pt2]>>(
    model: &IntrinsicModel,
    poses: &[Iso3],
    object_points: &[Pt3],
    corner_sets: &[C],
) -> Result<ReprojectionReport, ReprojectionError> {
    if poses.len() != corner_sets.len() {
        return Err(ReprojectionError::ViewCountMismatch {
            poses: poses.len(),
            views: corner_sets.len(),
        });
    }
    if poses.is_empty() {
        return Err(ReprojectionError::Empty);
    }
    let per_view = poses
        .iter()
        .zip(corner_sets)
        .enumerate()
        .map(|(view, (pose, corners))| {
            view_error(view, model, pose, object_points, corners.as_ref())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mean = per_view.iter().sum::<Real>() / per_view.len() as Real;
    Ok(ReprojectionReport { per_view, mean })
}
