//! Numerical helpers shared by the linear solvers.

use handeye_core::{Mat3, Pt2, Real};
use nalgebra::DMatrix;

/// Hartley normalization for 2D points.
///
/// Centers points at the origin and scales so that the mean distance from
/// the origin is `√2`. Returns the normalized points and `T` with
/// `p_norm = T * p_homogeneous`, or `None` when the input is empty or all
/// points coincide.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as Real;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let cx = sx / n;
    let cy = sy / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;

    if mean_dist <= Real::EPSILON {
        return None;
    }

    let scale = (2.0 as Real).sqrt() / mean_dist;
    let t = Mat3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );

    let norm = points
        .iter()
        .map(|p| Pt2::new((p.x - cx) * scale, (p.y - cy) * scale))
        .collect();

    Some((norm, t))
}

/// Real roots of `ax² + bx + c = 0`, ascending; falls back to the linear case when `a ≈ 0`.
pub fn solve_quadratic_real(a: Real, b: Real, c: Real) -> Vec<Real> {
    let eps = 1e-12;
    if a.abs() < eps {
        if b.abs() < eps {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc.abs() < eps {
        return vec![-b / (2.0 * a)];
    }
    if disc < 0.0 {
        return Vec::new();
    }
    // Numerically stable form: avoid cancellation in -b ± sqrt(disc).
    let q = -0.5 * (b + b.signum() * disc.sqrt());
    let mut roots = vec![q / a, c / q];
    roots.sort_by(|x, y| x.total_cmp(y));
    roots.dedup_by(|x, y| (*x - *y).abs() < 1e-12);
    roots
}

/// Right singular vector of `a` with the smallest singular value.
///
/// Wide matrices are zero-padded to square first so the full null space is available.
pub fn smallest_right_singular_vector(a: &DMatrix<Real>) -> Option<Vec<Real>> {
    let (rows, cols) = a.shape();
    let work = if rows < cols {
        let mut pad = DMatrix::<Real>::zeros(cols, cols);
        pad.view_mut((0, 0), (rows, cols)).copy_from(a);
        pad
    } else {
        a.clone()
    };
    let svd = work.svd(false, true);
    let v_t = svd.v_t?;
    let (idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    Some(v_t.row(idx).iter().copied().collect())
}
