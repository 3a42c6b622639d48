use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point2, Point3, Rotation3, Translation3, Unit, UnitQuaternion,
    Vector2, Vector3,
};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Mat4 = Matrix4<Real>;
pub type Iso3 = Isometry3<Real>;

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Errors raised when converting raw matrices into rigid transforms.
#[derive(Debug, thiserror::Error)]
pub enum RigidTransformError {
    #[error("matrix contains non-finite entries")]
    NonFinite,
    #[error("bottom row must be [0, 0, 0, 1]")]
    NotAffine,
    #[error("svd failed while projecting onto SO(3)")]
    SvdFailed,
}

/// 3x3 skew-symmetric (cross-product) matrix of `v`.
pub fn skew(v: &Vec3) -> Mat3 {
    Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Closest rotation matrix to `m` in the Frobenius sense.
pub fn project_to_so3(m: &Mat3) -> Result<Mat3, RigidTransformError> {
    let svd = m.svd(true, true);
    let u = svd.u.ok_or(RigidTransformError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(RigidTransformError::SvdFailed)?;
    let mut r = u * v_t;

    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Ok(r)
}

/// log: SO(3) -> so(3) as a 3-vector (axis * angle).
pub fn log_so3(r: &Mat3) -> Vec3 {
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*r));
    let angle = rot.angle();
    if angle < 1e-12 {
        return Vec3::zeros();
    }
    let axis: Unit<Vec3> = rot.axis().unwrap_or_else(Vec3::x_axis);
    axis.into_inner() * angle
}

/// Build a rigid transform from a rotation matrix and translation.
///
/// The rotation is re-orthonormalized first so slightly noisy matrices are accepted.
pub fn iso_from_parts(rot: &Mat3, t: &Vec3) -> Result<Iso3, RigidTransformError> {
    if rot.iter().chain(t.iter()).any(|v| !v.is_finite()) {
        return Err(RigidTransformError::NonFinite);
    }
    let r = project_to_so3(rot)?;
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(*t), q))
}

/// Convert a 4x4 homogeneous matrix into a rigid transform.
pub fn iso_from_matrix(m: &Mat4) -> Result<Iso3, RigidTransformError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(RigidTransformError::NonFinite);
    }
    let bottom = m.fixed_view::<1, 4>(3, 0);
    if (bottom[(0, 0)].abs() + bottom[(0, 1)].abs() + bottom[(0, 2)].abs()) > 1e-9
        || (bottom[(0, 3)] - 1.0).abs() > 1e-9
    {
        return Err(RigidTransformError::NotAffine);
    }
    let rot: Mat3 = m.fixed_view::<3, 3>(0, 0).into_owned();
    let t: Vec3 = m.fixed_view::<3, 1>(0, 3).into_owned();
    iso_from_parts(&rot, &t)
}

/// Inverse of a homogeneous rigid matrix, `[[Rᵀ, -Rᵀt], [0, 1]]`.
pub fn invert_rigid_matrix(m: &Mat4) -> Mat4 {
    let r_t = m.fixed_view::<3, 3>(0, 0).transpose();
    let t: Vec3 = m.fixed_view::<3, 1>(0, 3).into_owned();
    let mut out = Mat4::identity();
    out.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_t);
    out.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-(r_t * t)));
    out
}

/// Rigid transform from a translation and a quaternion given as `(x, y, z, w)`.
///
/// Returns `None` for a zero-norm or non-finite quaternion.
pub fn iso_from_translation_quaternion(t: Vec3, qx: Real, qy: Real, qz: Real, qw: Real) -> Option<Iso3> {
    let q = nalgebra::Quaternion::new(qw, qx, qy, qz);
    let norm = q.norm();
    if !norm.is_finite() || norm < 1e-12 || t.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Iso3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_quaternion(q),
    ))
}

/// Extrinsic XYZ Euler angles in degrees, `R = Rz(c) * Ry(b) * Rx(a)`.
pub fn euler_xyz_degrees(rot: &UnitQuaternion<Real>) -> Vec3 {
    let (roll, pitch, yaw) = rot.euler_angles();
    Vec3::new(roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

/// Translation distance and rotation angle (radians) between two poses.
pub fn pose_error(a: &Iso3, b: &Iso3) -> (Real, Real) {
    let dt = (a.translation.vector - b.translation.vector).norm();
    let angle = a.rotation.angle_to(&b.rotation);
    (dt, angle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> Iso3 {
        Iso3::from_parts(
            Translation3::new(120.0, -35.0, 410.0),
            UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1),
        )
    }

    #[test]
    fn matrix_inverse_composes_to_identity() {
        let m = sample_pose().to_homogeneous();
        let inv = invert_rigid_matrix(&m);
        assert_relative_eq!(m * inv, Mat4::identity(), epsilon = 1e-9);
        assert_relative_eq!(inv, sample_pose().inverse().to_homogeneous(), epsilon = 1e-9);
    }

    #[test]
    fn iso_from_matrix_roundtrips() {
        let pose = sample_pose();
        let back = iso_from_matrix(&pose.to_homogeneous()).unwrap();
        let (dt, ang) = pose_error(&pose, &back);
        assert!(dt < 1e-9 && ang < 1e-6);
    }

    #[test]
    fn iso_from_matrix_rejects_projective_row() {
        let mut m = Mat4::identity();
        m[(3, 0)] = 0.5;
        assert!(matches!(
            iso_from_matrix(&m),
            Err(RigidTransformError::NotAffine)
        ));
    }

    #[test]
    fn zero_quaternion_is_rejected() {
        assert!(iso_from_translation_quaternion(Vec3::zeros(), 0.0, 0.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn euler_angles_match_axis_rotation() {
        let q = UnitQuaternion::from_axis_angle(&Vec3::z_axis(), 30f64.to_radians());
        let e = euler_xyz_degrees(&q);
        assert_relative_eq!(e, Vec3::new(0.0, 0.0, 30.0), epsilon = 1e-9);
    }

    #[test]
    fn skew_matches_cross_product() {
        let a = Vec3::new(1.0, -2.0, 0.5);
        let b = Vec3::new(0.3, 0.7, -1.2);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-12);
    }
}
