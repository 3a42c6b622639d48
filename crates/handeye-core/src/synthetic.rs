//! Synthetic planar scenes for tests and demos.
//!
//! Board poses keep the target centred in front of the camera while tilting
//! it about varying axes, which keeps Zhang's method well conditioned.

use anyhow::Result;
use nalgebra::{Translation3, UnitQuaternion, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{GridGeometry, IntrinsicModel, Iso3, Pt2, Pt3, Real};

/// `n_views` target-to-camera poses with the board centre at `distance` along the optical axis.
///
/// View `k` tilts the board by `tilt_rad` about an in-plane axis that rotates with `k`.
pub fn board_views(grid: &GridGeometry, n_views: usize, distance: Real, tilt_rad: Real) -> Vec<Iso3> {
    let center = grid.center().coords;
    (0..n_views)
        .map(|k| {
            let phase = 0.3 + std::f64::consts::TAU * k as Real / n_views.max(1) as Real;
            let axis = Vector3::new(phase.cos(), phase.sin(), 0.0);
            let roll = 0.1 * (k as Real - 0.5 * n_views as Real);
            let rotation = UnitQuaternion::from_scaled_axis(axis * tilt_rad)
                * UnitQuaternion::from_scaled_axis(Vector3::z() * roll);
            let offset = Vector3::new(
                0.05 * distance * phase.sin(),
                -0.04 * distance * phase.cos(),
                distance * (1.0 + 0.05 * k as Real),
            );
            let translation = offset - rotation * center;
            Iso3::from_parts(Translation3::from(translation), rotation)
        })
        .collect()
}

/// Project target points through a pose, requiring every point to be visible.
pub fn project_view(
    model: &IntrinsicModel,
    target_to_cam: &Iso3,
    target_points: &[Pt3],
) -> Result<Vec<Pt2>> {
    target_points
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            model.project_target_point(target_to_cam, p).ok_or_else(|| {
                let pc = target_to_cam.transform_point(p);
                anyhow::anyhow!("point {idx} not projectable (z={:.6})", pc.z)
            })
        })
        .collect()
}

/// Add seeded uniform noise in `[-amplitude, amplitude]` to each coordinate.
pub fn perturb(points: &[Pt2], amplitude: Real, seed: u64) -> Vec<Pt2> {
    let mut rng = StdRng::seed_from_u64(seed);
    points
        .iter()
        .map(|p| {
            Pt2::new(
                p.x + rng.random_range(-amplitude..=amplitude),
                p.y + rng.random_range(-amplitude..=amplitude),
            )
        })
        .collect()
}

/// Robot and camera pose streams consistent with one hand-eye transform.
///
/// `wrist_to_base[i] * cam_to_wrist * target_to_cam[i] == target_to_base` for every `i`.
#[derive(Clone, Debug)]
pub struct HandEyeScene {
    pub cam_to_wrist: Iso3,
    pub target_to_base: Iso3,
    pub wrist_to_base: Vec<Iso3>,
    pub target_to_cam: Vec<Iso3>,
}

impl HandEyeScene {
    /// Derive the wrist poses that produce the given camera views.
    pub fn from_views(cam_to_wrist: Iso3, target_to_base: Iso3, target_to_cam: Vec<Iso3>) -> Self {
        let wrist_to_base = target_to_cam
            .iter()
            .map(|c| target_to_base * c.inverse() * cam_to_wrist.inverse())
            .collect();
        Self {
            cam_to_wrist,
            target_to_base,
            wrist_to_base,
            target_to_cam,
        }
    }
}

/// A plausible wrist-mounted camera offset (mm).
pub fn sample_cam_to_wrist() -> Iso3 {
    Iso3::from_parts(
        Translation3::new(35.0, -60.0, 110.0),
        UnitQuaternion::from_euler_angles(0.12, -0.08, 1.52),
    )
}

/// A plausible board placement in the robot base frame (mm).
pub fn sample_target_to_base() -> Iso3 {
    Iso3::from_parts(
        Translation3::new(650.0, -120.0, 15.0),
        UnitQuaternion::from_euler_angles(0.02, 0.01, -0.4),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pose_error, FxFyCxCySkew};

    #[test]
    fn board_views_keep_target_in_front() {
        let grid = GridGeometry::new(6, 5, 20.0).unwrap();
        let model = IntrinsicModel::pinhole(FxFyCxCySkew {
            fx: 900.0,
            fy: 900.0,
            cx: 640.0,
            cy: 480.0,
            skew: 0.0,
        });
        for pose in board_views(&grid, 8, 500.0, 0.4) {
            let px = project_view(&model, &pose, &grid.object_points()).unwrap();
            assert!(px.iter().all(|p| p.x > 0.0 && p.x < 1280.0 && p.y > 0.0 && p.y < 960.0));
        }
    }

    #[test]
    fn scene_chain_closes() {
        let grid = GridGeometry::new(6, 5, 20.0).unwrap();
        let scene = HandEyeScene::from_views(
            sample_cam_to_wrist(),
            sample_target_to_base(),
            board_views(&grid, 5, 400.0, 0.35),
        );
        for (g, c) in scene.wrist_to_base.iter().zip(&scene.target_to_cam) {
            let (dt, ang) = pose_error(&(g * scene.cam_to_wrist * c), &scene.target_to_base);
            assert!(dt < 1e-9 && ang < 1e-6);
        }
    }
}
