use handeye_core::{iso_from_parts, Iso3, Mat3, Real, RigidTransformError, Vec3};

#[derive(Debug, thiserror::Error)]
pub enum PlanarPoseError {
    #[error("intrinsics matrix is not invertible")]
    SingularIntrinsics,
    #[error("homography columns vanish after removing intrinsics")]
    Degenerate,
    #[error(transparent)]
    Rigid(#[from] RigidTransformError),
}

/// Decompose a plane-induced homography into the board pose `target_to_cam`.
///
/// The board lies on `z = 0` in its own frame and `H ~ K [r1 r2 t]`. The sign
/// of `H` is chosen so the board ends up in front of the camera.
pub fn pose_from_homography(k: &Mat3, h: &Mat3) -> Result<Iso3, PlanarPoseError> {
    let k_inv = k.try_inverse().ok_or(PlanarPoseError::SingularIntrinsics)?;

    let k_inv_h1: Vec3 = k_inv * h.column(0);
    let k_inv_h2: Vec3 = k_inv * h.column(1);
    let k_inv_h3: Vec3 = k_inv * h.column(2);

    // Average the two column norms for the scale.
    let mean_norm = 0.5 * (k_inv_h1.norm() + k_inv_h2.norm());
    if !(mean_norm.is_finite() && mean_norm > Real::EPSILON) {
        return Err(PlanarPoseError::Degenerate);
    }
    let mut lambda = 1.0 / mean_norm;
    if k_inv_h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * k_inv_h1;
    let r2 = lambda * k_inv_h2;
    let r3 = r1.cross(&r2);
    let r = Mat3::from_columns(&[r1, r2, r3]);
    let t = lambda * k_inv_h3;

    Ok(iso_from_parts(&r, &t)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_core::{pose_error, FxFyCxCySkew};
    use nalgebra::{Translation3, UnitQuaternion};

    fn homography_of(k: &Mat3, pose: &Iso3) -> Mat3 {
        let r = pose.rotation.to_rotation_matrix();
        let mut h = Mat3::zeros();
        h.set_column(0, &(k * r.matrix().column(0)));
        h.set_column(1, &(k * r.matrix().column(1)));
        h.set_column(2, &(k * pose.translation.vector));
        h
    }

    #[test]
    fn recovers_pose_regardless_of_homography_sign() {
        let k = FxFyCxCySkew {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.0,
        }
        .k_matrix();
        let gt = Iso3::from_parts(
            Translation3::new(0.1, -0.05, 1.0),
            UnitQuaternion::from_euler_angles(0.1, -0.05, 0.2),
        );
        let h = homography_of(&k, &gt);

        for scale in [1.0, -3.5] {
            let est = pose_from_homography(&k, &(h * scale)).unwrap();
            let (dt, ang) = pose_error(&est, &gt);
            assert!(dt < 1e-9, "dt={dt}");
            assert!(ang < 1e-6, "ang={ang}");
        }
    }
}
