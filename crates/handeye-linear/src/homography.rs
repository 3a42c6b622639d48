//! Homography estimation (plane-induced projective transform).
//!
//! Normalized Direct Linear Transform: `H` maps **board points** on the `z = 0`
//! plane to **image points**, `x' ~ H x`. Hartley normalization is applied
//! internally and undone on the result.

use crate::math::{normalize_points_2d, smallest_right_singular_vector};
use handeye_core::{from_homogeneous, to_homogeneous, Mat3, Pt2, Real};
use nalgebra::DMatrix;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum HomographyError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("{board} board points vs {image} image points")]
    LengthMismatch { board: usize, image: usize },
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("svd failed during homography estimation")]
    SvdFailed,
}

/// Estimate `H` such that `image ~ H * board` using normalized DLT.
///
/// The result is scaled so that `H[2,2] == 1` when possible.
pub fn dlt_homography(board: &[Pt2], image: &[Pt2]) -> Result<Mat3, HomographyError> {
    let n = board.len();
    if image.len() != n {
        return Err(HomographyError::LengthMismatch {
            board: n,
            image: image.len(),
        });
    }
    if n < 4 {
        return Err(HomographyError::NotEnoughPoints(n));
    }

    let (board_n, t_b) = normalize_points_2d(board).ok_or(HomographyError::Degenerate)?;
    let (image_n, t_i) = normalize_points_2d(image).ok_or(HomographyError::Degenerate)?;

    let mut a = DMatrix::<Real>::zeros(2 * n, 9);
    for (i, (pb, pi)) in board_n.iter().zip(&image_n).enumerate() {
        let (x, y, u, v) = (pb.x, pb.y, pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let h_vec = smallest_right_singular_vector(&a).ok_or(HomographyError::SvdFailed)?;
    let h_n = Mat3::from_row_slice(&h_vec);

    let t_i_inv = t_i.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut h = t_i_inv * h_n * t_b;

    let scale = h[(2, 2)];
    if scale.abs() > Real::EPSILON {
        h /= scale;
    }
    if h.iter().any(|v| !v.is_finite()) || h.determinant().abs() < 1e-15 {
        return Err(HomographyError::Degenerate);
    }
    Ok(h)
}

/// Apply a homography to a point.
pub fn apply_homography(h: &Mat3, p: &Pt2) -> Pt2 {
    from_homogeneous(&(h * to_homogeneous(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_only_homography() {
        let w = vec![
            Pt2::new(0.0, 0.0),
            Pt2::new(1.0, 0.0),
            Pt2::new(1.0, 1.0),
            Pt2::new(0.0, 1.0),
        ];
        let img: Vec<Pt2> = w.iter().map(|p| Pt2::new(2.0 * p.x, 2.0 * p.y)).collect();

        let h = dlt_homography(&w, &img).unwrap();
        assert!((h[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((h[(1, 1)] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn projective_homography_is_recovered() {
        let h_gt = Mat3::new(1.2, 0.1, 300.0, -0.05, 0.9, 200.0, 1e-4, -2e-4, 1.0);
        let board: Vec<Pt2> = (0..5)
            .flat_map(|j| (0..6).map(move |i| Pt2::new(i as f64 * 20.0, j as f64 * 20.0)))
            .collect();
        let image: Vec<Pt2> = board.iter().map(|p| apply_homography(&h_gt, p)).collect();

        let h = dlt_homography(&board, &image).unwrap();
        for (b, i) in board.iter().zip(&image) {
            assert!((apply_homography(&h, b) - i).norm() < 1e-6);
        }
    }

    #[test]
    fn rejects_too_few_or_collinear_points() {
        let three = vec![Pt2::new(0.0, 0.0); 3];
        assert_eq!(
            dlt_homography(&three, &three),
            Err(HomographyError::NotEnoughPoints(3))
        );
        let same = vec![Pt2::new(5.0, 5.0); 6];
        assert_eq!(
            dlt_homography(&same, &same),
            Err(HomographyError::Degenerate)
        );
    }
}
