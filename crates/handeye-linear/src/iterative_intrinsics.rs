//! Alternating linear estimate of intrinsics and distortion.
//!
//! Zhang's method assumes distortion-free pixels. Starting from Zhang on the
//! raw pixels, each iteration fits distortion with the current K, undistorts
//! the observations and re-estimates K. One or two iterations are enough to
//! seed the non-linear refinement.

use crate::{
    distortion_fit::{
        estimate_distortion_from_homographies, DistortionFitError, DistortionFitOptions,
        DistortionView,
    },
    homography::{dlt_homography, HomographyError},
    zhang_intrinsics::{estimate_intrinsics_from_homographies, ZhangError},
};
use handeye_core::{BrownConrady5, FxFyCxCySkew, IntrinsicModel, Mat3, Pt2, Real};
use log::debug;

#[derive(Debug, thiserror::Error)]
pub enum IterativeIntrinsicsError {
    #[error("zhang intrinsics failed: {0}")]
    Zhang(#[from] ZhangError),
    #[error("distortion estimation failed: {0}")]
    Distortion(#[from] DistortionFitError),
    #[error("homography estimation failed for view {view}: {source}")]
    Homography {
        view: usize,
        #[source]
        source: HomographyError,
    },
    #[error("need at least 3 views, got {0}")]
    NotEnoughViews(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct IterativeIntrinsicsOptions {
    /// Number of distortion → K refinement rounds.
    pub iterations: usize,
    pub distortion_opts: DistortionFitOptions,
    /// Force skew to zero after each K estimate.
    pub zero_skew: bool,
}

impl Default for IterativeIntrinsicsOptions {
    fn default() -> Self {
        Self {
            iterations: 2,
            distortion_opts: DistortionFitOptions::default(),
            zero_skew: true,
        }
    }
}

/// Board-plane coordinates with their observed (distorted) pixels.
#[derive(Debug, Clone)]
pub struct PlanarView {
    pub board_points: Vec<Pt2>,
    pub pixel_points: Vec<Pt2>,
}

impl PlanarView {
    pub fn new(board_points: Vec<Pt2>, pixel_points: Vec<Pt2>) -> Self {
        Self {
            board_points,
            pixel_points,
        }
    }
}

fn homographies<F>(views: &[PlanarView], pixels: F) -> Result<Vec<Mat3>, IterativeIntrinsicsError>
where
    F: Fn(&PlanarView) -> Vec<Pt2>,
{
    views
        .iter()
        .enumerate()
        .map(|(view, v)| {
            dlt_homography(&v.board_points, &pixels(v))
                .map_err(|source| IterativeIntrinsicsError::Homography { view, source })
        })
        .collect()
}

fn zhang(hs: &[Mat3], zero_skew: bool) -> Result<FxFyCxCySkew<Real>, IterativeIntrinsicsError> {
    let mut k = estimate_intrinsics_from_homographies(hs)?;
    if zero_skew {
        k.skew = 0.0;
    }
    Ok(k)
}

/// Estimate intrinsics and distortion by alternating linear fits.
pub fn estimate_intrinsics_iterative(
    views: &[PlanarView],
    opts: IterativeIntrinsicsOptions,
) -> Result<IntrinsicModel, IterativeIntrinsicsError> {
    if views.len() < 3 {
        return Err(IterativeIntrinsicsError::NotEnoughViews(views.len()));
    }

    let raw_hs = homographies(views, |v| v.pixel_points.clone())?;
    let mut model = IntrinsicModel::new(
        zhang(&raw_hs, opts.zero_skew)?,
        BrownConrady5 {
            iters: opts.distortion_opts.iters,
            ..BrownConrady5::default()
        },
    );
    debug!("zhang init: {:?}", model.intrinsics);

    for iter in 0..opts.iterations {
        let hs = if iter == 0 {
            raw_hs.clone()
        } else {
            homographies(views, |v| undistort_all(&model, &v.pixel_points))?
        };

        let dist_views: Vec<DistortionView<'_>> = views
            .iter()
            .zip(&hs)
            .map(|(v, h)| DistortionView {
                homography: *h,
                board_points: &v.board_points,
                pixel_points: &v.pixel_points,
            })
            .collect();
        model.distortion =
            estimate_distortion_from_homographies(&model.k_matrix(), &dist_views, opts.distortion_opts)?;

        let undistorted_hs = homographies(views, |v| undistort_all(&model, &v.pixel_points))?;
        model.intrinsics = zhang(&undistorted_hs, opts.zero_skew)?;
        debug!(
            "iteration {}: intrinsics {:?}, distortion {:?}",
            iter + 1,
            model.intrinsics,
            model.distortion.dist_coeffs()
        );
    }

    Ok(model)
}

fn undistort_all(model: &IntrinsicModel, pixels: &[Pt2]) -> Vec<Pt2> {
    pixels.iter().map(|p| model.undistort_pixel(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_core::{synthetic, GridGeometry};

    #[test]
    fn recovers_distortion_free_camera() {
        let gt = IntrinsicModel::pinhole(FxFyCxCySkew {
            fx: 820.0,
            fy: 800.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        });
        let grid = GridGeometry::new(9, 7, 25.0).unwrap();
        let object = grid.object_points();
        let board: Vec<Pt2> = object.iter().map(|p| Pt2::new(p.x, p.y)).collect();
        let views: Vec<PlanarView> = synthetic::board_views(&grid, 5, 700.0, 0.4)
            .iter()
            .map(|pose| {
                PlanarView::new(
                    board.clone(),
                    synthetic::project_view(&gt, pose, &object).unwrap(),
                )
            })
            .collect();

        let est = estimate_intrinsics_iterative(&views, Default::default()).unwrap();
        assert!((est.intrinsics.fx - 820.0).abs() < 0.5, "{:?}", est.intrinsics);
        assert!((est.intrinsics.fy - 800.0).abs() < 0.5, "{:?}", est.intrinsics);
        assert!(est.distortion.k1.abs() < 1e-3);
    }

    #[test]
    fn needs_three_views() {
        let view = PlanarView::new(vec![Pt2::origin(); 4], vec![Pt2::origin(); 4]);
        assert!(matches!(
            estimate_intrinsics_iterative(&[view.clone(), view], Default::default()),
            Err(IterativeIntrinsicsError::NotEnoughViews(2))
        ));
    }
}
