//! Parameter-vector layouts shared by the refinement problems.

use handeye_core::{BrownConrady5, FxFyCxCySkew, IntrinsicModel, Iso3, Pt2, Pt3, Real, Vec2};
use nalgebra::{DVector, DVectorView, Translation3, UnitQuaternion, Vector3};

/// Number of parameters of one pose block `[rx, ry, rz, tx, ty, tz]` (axis-angle + translation).
pub const POSE_DIM: usize = 6;
/// Number of parameters of the camera block `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
pub const CAMERA_DIM: usize = 9;

pub fn write_pose(x: &mut DVector<Real>, offset: usize, pose: &Iso3) {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    x.rows_mut(offset, POSE_DIM)
        .copy_from_slice(&[r.x, r.y, r.z, t.x, t.y, t.z]);
}

pub fn read_pose(x: DVectorView<'_, Real>) -> Iso3 {
    let rot = UnitQuaternion::from_scaled_axis(Vector3::new(x[0], x[1], x[2]));
    Iso3::from_parts(Translation3::new(x[3], x[4], x[5]), rot)
}

/// Skew is not a parameter; it is held at zero.
pub fn write_camera(x: &mut DVector<Real>, offset: usize, model: &IntrinsicModel) {
    let k = &model.intrinsics;
    let [k1, k2, p1, p2, k3] = model.dist_coeffs();
    x.rows_mut(offset, CAMERA_DIM)
        .copy_from_slice(&[k.fx, k.fy, k.cx, k.cy, k1, k2, p1, p2, k3]);
}

pub fn read_camera(x: DVectorView<'_, Real>, undistort_iters: u32) -> IntrinsicModel {
    IntrinsicModel::new(
        FxFyCxCySkew {
            fx: x[0],
            fy: x[1],
            cx: x[2],
            cy: x[3],
            skew: 0.0,
        },
        BrownConrady5 {
            iters: undistort_iters,
            ..BrownConrady5::from_dist_coeffs([x[4], x[5], x[6], x[7], x[8]])
        },
    )
}

/// Project a target point through a pose without rejecting points behind the camera.
///
/// The depth is clamped away from zero so residuals stay finite while the
/// optimizer explores; the result is only meaningful for `z > 0`.
pub fn project_clamped(model: &IntrinsicModel, target_to_cam: &Iso3, p: &Pt3) -> Pt2 {
    let pc = target_to_cam.transform_point(p);
    let z = if pc.z.abs() < 1e-9 { 1e-9 } else { pc.z };
    let n_d = model.distortion.distort(&Vec2::new(pc.x / z, pc.y / z));
    Pt2::from(model.intrinsics.sensor_to_pixel(&n_d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_core::pose_error;

    #[test]
    fn pose_block_survives_packing() {
        let pose = Iso3::from_parts(
            Translation3::new(12.0, -3.0, 400.0),
            UnitQuaternion::from_euler_angles(0.3, -0.2, 2.9),
        );
        let mut x = DVector::zeros(2 + POSE_DIM);
        write_pose(&mut x, 2, &pose);
        let back = read_pose(x.rows(2, POSE_DIM));
        let (dt, ang) = pose_error(&pose, &back);
        assert!(dt < 1e-12 && ang < 1e-6);
    }

    #[test]
    fn camera_block_keeps_opencv_order() {
        let model = IntrinsicModel::new(
            FxFyCxCySkew {
                fx: 900.0,
                fy: 901.0,
                cx: 640.0,
                cy: 480.0,
                skew: 0.0,
            },
            BrownConrady5 {
                k1: -0.1,
                k2: 0.02,
                k3: 0.003,
                p1: 0.0004,
                p2: -0.0005,
                iters: 8,
            },
        );
        let mut x = DVector::zeros(CAMERA_DIM);
        write_camera(&mut x, 0, &model);
        assert_eq!(x[4], -0.1);
        assert_eq!(x[6], 0.0004);
        assert_eq!(x[8], 0.003);
        assert_eq!(read_camera(x.rows(0, CAMERA_DIM), 8), model);
    }
}
