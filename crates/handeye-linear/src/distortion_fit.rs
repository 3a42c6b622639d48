//! Linear Brown–Conrady distortion estimate from homography residuals.
//!
//! With K known and a per-view homography fitted to the distorted pixels, the
//! homography prediction approximates the undistorted projection. The
//! normalized residual `n_obs - n_ideal` is linear in `(k1, k2, k3, p1, p2)`
//! and solved by least squares. Intended as an initial guess only.

use handeye_core::{BrownConrady5, Mat3, Pt2, Real, Vec2, Vec3};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq)]
pub enum DistortionFitError {
    #[error("need at least {0} points for distortion estimation, got {1}")]
    NotEnoughPoints(usize, usize),
    #[error("svd failed during distortion estimation")]
    SvdFailed,
    #[error("intrinsics matrix is not invertible")]
    IntrinsicsNotInvertible,
    #[error("degenerate configuration: all points near the principal point")]
    DegenerateConfiguration,
}

/// Which coefficients the linear fit estimates.
#[derive(Debug, Clone, Copy)]
pub struct DistortionFitOptions {
    /// Keep `p1`, `p2` at zero.
    pub fix_tangential: bool,
    /// Keep `k3` at zero; the r⁶ term overfits easily in a linear fit.
    pub fix_k3: bool,
    /// Undistortion iterations stored in the returned model.
    pub iters: u32,
}

impl Default for DistortionFitOptions {
    fn default() -> Self {
        Self {
            fix_tangential: false,
            fix_k3: true,
            iters: 8,
        }
    }
}

/// One view: homography fitted to distorted pixels plus its correspondences.
#[derive(Debug, Clone)]
pub struct DistortionView<'a> {
    pub homography: Mat3,
    pub board_points: &'a [Pt2],
    pub pixel_points: &'a [Pt2],
}

fn normalized(k_inv: &Mat3, p: &Pt2) -> Vec2 {
    let h = k_inv * Vec3::new(p.x, p.y, 1.0);
    Vec2::new(h.x / h.z, h.y / h.z)
}

/// Estimate distortion coefficients from several views with known intrinsics `k`.
pub fn estimate_distortion_from_homographies(
    k: &Mat3,
    views: &[DistortionView<'_>],
    opts: DistortionFitOptions,
) -> Result<BrownConrady5<Real>, DistortionFitError> {
    let total_points: usize = views.iter().map(|v| v.board_points.len()).sum();
    let n_params = 2 + usize::from(!opts.fix_k3) + 2 * usize::from(!opts.fix_tangential);
    if total_points < n_params {
        return Err(DistortionFitError::NotEnoughPoints(n_params, total_points));
    }

    let k_inv = k
        .try_inverse()
        .ok_or(DistortionFitError::IntrinsicsNotInvertible)?;

    let mut a = DMatrix::<Real>::zeros(2 * total_points, n_params);
    let mut b = DVector::<Real>::zeros(2 * total_points);
    let mut max_r2: Real = 0.0;

    let mut row = 0;
    for view in views {
        for (board_pt, pixel_obs) in view.board_points.iter().zip(view.pixel_points) {
            let ideal_h = view.homography * Vec3::new(board_pt.x, board_pt.y, 1.0);
            let ideal = Pt2::new(ideal_h.x / ideal_h.z, ideal_h.y / ideal_h.z);
            let n_ideal = normalized(&k_inv, &ideal);
            let residual = normalized(&k_inv, pixel_obs) - n_ideal;

            let (x, y) = (n_ideal.x, n_ideal.y);
            let r2 = x * x + y * y;
            max_r2 = max_r2.max(r2);

            let mut col = 0;
            for rk in [r2, r2 * r2] {
                a[(row, col)] = x * rk;
                a[(row + 1, col)] = y * rk;
                col += 1;
            }
            if !opts.fix_k3 {
                let r6 = r2 * r2 * r2;
                a[(row, col)] = x * r6;
                a[(row + 1, col)] = y * r6;
                col += 1;
            }
            if !opts.fix_tangential {
                a[(row, col)] = 2.0 * x * y;
                a[(row + 1, col)] = r2 + 2.0 * y * y;
                a[(row, col + 1)] = r2 + 2.0 * x * x;
                a[(row + 1, col + 1)] = 2.0 * x * y;
            }

            b[row] = residual.x;
            b[row + 1] = residual.y;
            row += 2;
        }
    }

    if max_r2 < 1e-6 {
        return Err(DistortionFitError::DegenerateConfiguration);
    }

    let x = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|_| DistortionFitError::SvdFailed)?;

    let mut it = x.iter().copied();
    let mut next = || it.next().unwrap_or(0.0);
    let k1 = next();
    let k2 = next();
    let k3 = if opts.fix_k3 { 0.0 } else { next() };
    let (p1, p2) = if opts.fix_tangential {
        (0.0, 0.0)
    } else {
        (next(), next())
    };

    Ok(BrownConrady5 {
        k1,
        k2,
        k3,
        p1,
        p2,
        iters: opts.iters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_core::{FxFyCxCySkew, GridGeometry, IntrinsicModel, Iso3};
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn zero_distortion_fits_to_near_zero() {
        let intr = FxFyCxCySkew {
            fx: 800.0,
            fy: 800.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        };
        let cam = IntrinsicModel::pinhole(intr);
        let grid = GridGeometry::new(8, 6, 30.0).unwrap();
        let board: Vec<Pt2> = grid
            .object_points()
            .iter()
            .map(|p| Pt2::new(p.x, p.y))
            .collect();
        let pose = Iso3::from_parts(
            Translation3::new(-100.0, -80.0, 600.0),
            UnitQuaternion::from_euler_angles(0.1, -0.15, 0.05),
        );
        let pixels: Vec<Pt2> = grid
            .object_points()
            .iter()
            .map(|p| cam.project_target_point(&pose, p).unwrap())
            .collect();
        let h = crate::homography::dlt_homography(&board, &pixels).unwrap();

        let views = [DistortionView {
            homography: h,
            board_points: &board,
            pixel_points: &pixels,
        }];
        let dist =
            estimate_distortion_from_homographies(&intr.k_matrix(), &views, Default::default())
                .unwrap();
        assert!(dist.k1.abs() < 1e-6 && dist.k2.abs() < 1e-6);
        assert!(dist.p1.abs() < 1e-6 && dist.p2.abs() < 1e-6);
    }

    #[test]
    fn singular_intrinsics_are_rejected() {
        let pts = vec![Pt2::new(1.0, 2.0); 4];
        let views = [DistortionView {
            homography: Mat3::identity(),
            board_points: &pts,
            pixel_points: &pts,
        }];
        assert_eq!(
            estimate_distortion_from_homographies(&Mat3::zeros(), &views, Default::default()),
            Err(DistortionFitError::IntrinsicsNotInvertible)
        );
    }
}
