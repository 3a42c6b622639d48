//! Zhang's closed-form intrinsics from plane homographies.

use handeye_core::{FxFyCxCySkew, Mat3, Real};
use nalgebra::{DMatrix, SVector};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ZhangError {
    #[error("need at least 3 homographies, got {0}")]
    NotEnoughViews(usize),
    #[error("svd failed during intrinsics estimation")]
    SvdFailed,
    #[error("degenerate view configuration: {0}")]
    Degenerate(&'static str),
}

/// The 6-vector `v_ij(H)` of Zhang's constraint `v_ijᵀ b = h_iᵀ B h_j`.
fn v_ij(h: &Mat3, i: usize, j: usize) -> SVector<Real, 6> {
    let hi = h.column(i);
    let hj = h.column(j);

    SVector::<Real, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Estimate K from plane homographies (board → pixels), ignoring distortion.
pub fn estimate_intrinsics_from_homographies(
    homographies: &[Mat3],
) -> Result<FxFyCxCySkew<Real>, ZhangError> {
    let m = homographies.len();
    if m < 3 {
        return Err(ZhangError::NotEnoughViews(m));
    }

    let mut vmtx = DMatrix::<Real>::zeros(2 * m, 6);
    for (k, h) in homographies.iter().enumerate() {
        // Normalize each homography so the views weigh equally.
        let h = h / h.norm();
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        let v12 = v_ij(&h, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t.ok_or(ZhangError::SvdFailed)?;
    let (idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(ZhangError::SvdFailed)?;
    intrinsics_from_conic(&SVector::<Real, 6>::from_iterator(v_t.row(idx).iter().copied()))
}

/// Recover K from the image of the absolute conic `b = [B11 B12 B22 B13 B23 B33]`.
///
/// `b` is accepted with either sign.
fn intrinsics_from_conic(b: &SVector<Real, 6>) -> Result<FxFyCxCySkew<Real>, ZhangError> {
    let b = if b[0] < 0.0 { -b } else { *b };

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    if denom_norm <= 0.0 || denom.abs() / denom_norm < 1e-9 {
        return Err(ZhangError::Degenerate("singular image of the absolute conic"));
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if b11 <= 0.0 || denom <= 0.0 || lambda <= 0.0 {
        return Err(ZhangError::Degenerate("conic is not positive definite"));
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k = FxFyCxCySkew {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
        skew: gamma,
    };
    if [k.fx, k.fy, k.cx, k.cy, k.skew].iter().any(|v| !v.is_finite()) {
        return Err(ZhangError::Degenerate("non-finite intrinsics"));
    }
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_core::Iso3;
    use nalgebra::{Rotation3, Translation3, Vector3};

    fn make_intrinsics() -> FxFyCxCySkew<Real> {
        FxFyCxCySkew {
            fx: 900.0,
            fy: 880.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        }
    }

    fn synthetic_homography(kmtx: &Mat3, rot: Rotation3<Real>, t: Vector3<Real>) -> Mat3 {
        let iso = Iso3::from_parts(Translation3::from(t), rot.into());
        let binding = iso.rotation.to_rotation_matrix();
        let r = binding.matrix();

        // For a z = 0 plane, H = K [r1 r2 t]
        let mut h = Mat3::zeros();
        h.set_column(0, &(kmtx * r.column(0)));
        h.set_column(1, &(kmtx * r.column(1)));
        h.set_column(2, &(kmtx * t));
        h
    }

    #[test]
    fn intrinsics_from_homographies_recovers_k() {
        let intr_gt = make_intrinsics();
        let kmtx = intr_gt.k_matrix();

        let hs = vec![
            synthetic_homography(
                &kmtx,
                Rotation3::from_euler_angles(0.1, 0.0, 0.05),
                Vector3::new(0.1, -0.05, 1.0),
            ),
            synthetic_homography(
                &kmtx,
                Rotation3::from_euler_angles(-0.05, 0.15, -0.1),
                Vector3::new(-0.05, 0.1, 1.2),
            ),
            synthetic_homography(
                &kmtx,
                Rotation3::from_euler_angles(0.2, -0.1, 0.0),
                Vector3::new(0.0, 0.0, 0.9),
            ),
        ];

        let est = estimate_intrinsics_from_homographies(&hs).unwrap();
        assert!((est.fx - intr_gt.fx).abs() < 1e-2, "fx {}", est.fx);
        assert!((est.fy - intr_gt.fy).abs() < 1e-2, "fy {}", est.fy);
        assert!((est.cx - intr_gt.cx).abs() < 1e-2, "cx {}", est.cx);
        assert!((est.cy - intr_gt.cy).abs() < 1e-2, "cy {}", est.cy);
        assert!(est.skew.abs() < 1e-3, "skew not ~0: {}", est.skew);
    }

    #[test]
    fn conic_sign_does_not_matter() {
        let k = make_intrinsics().k_matrix();
        let k_inv = k.try_inverse().unwrap();
        let bm = k_inv.transpose() * k_inv;
        let b = SVector::<Real, 6>::from_row_slice(&[
            bm[(0, 0)],
            bm[(0, 1)],
            bm[(1, 1)],
            bm[(0, 2)],
            bm[(1, 2)],
            bm[(2, 2)],
        ]) * 1e4;

        let pos = intrinsics_from_conic(&b).unwrap();
        let neg = intrinsics_from_conic(&-b).unwrap();
        assert_eq!(pos, neg);
        assert!((pos.fx - 900.0).abs() < 1e-6, "fx {}", pos.fx);
        assert!((pos.cy - 360.0).abs() < 1e-6, "cy {}", pos.cy);
    }

    #[test]
    fn indefinite_conic_is_rejected() {
        let b = SVector::<Real, 6>::from_row_slice(&[1.0, 0.0, -1.0, 0.0, 0.0, 1.0]);
        assert!(matches!(
            intrinsics_from_conic(&b),
            Err(ZhangError::Degenerate(_))
        ));
    }

    #[test]
    fn two_views_are_rejected() {
        assert_eq!(
            estimate_intrinsics_from_homographies(&[Mat3::identity(); 2]),
            Err(ZhangError::NotEnoughViews(2))
        );
    }
}
