use serde::{Deserialize, Serialize};

use super::{BrownConrady5, FxFyCxCySkew};
use crate::{Iso3, Mat3, Pt2, Pt3, Real, Vec2};

/// Pinhole camera with Brown–Conrady distortion, the output of intrinsic calibration.
///
/// `pixel = K * distort(x / z, y / z)`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicModel {
    pub intrinsics: FxFyCxCySkew<Real>,
    pub distortion: BrownConrady5<Real>,
}

impl IntrinsicModel {
    pub fn new(intrinsics: FxFyCxCySkew<Real>, distortion: BrownConrady5<Real>) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Model without lens distortion.
    pub fn pinhole(intrinsics: FxFyCxCySkew<Real>) -> Self {
        Self::new(intrinsics, BrownConrady5::default())
    }

    pub fn k_matrix(&self) -> Mat3 {
        self.intrinsics.k_matrix()
    }

    /// Distortion coefficients in OpenCV order `[k1, k2, p1, p2, k3]`.
    pub fn dist_coeffs(&self) -> [Real; 5] {
        self.distortion.dist_coeffs()
    }

    /// Project a point given in camera coordinates. `None` when it is not in front of the camera.
    pub fn project_point(&self, p_c: &Pt3) -> Option<Pt2> {
        if p_c.z <= 0.0 || !p_c.z.is_finite() {
            return None;
        }
        let n_u = Vec2::new(p_c.x / p_c.z, p_c.y / p_c.z);
        let n_d = self.distortion.distort(&n_u);
        let px = self.intrinsics.sensor_to_pixel(&n_d);
        Some(Pt2::new(px.x, px.y))
    }

    /// Project a target-frame point through `target_to_cam`.
    pub fn project_target_point(&self, target_to_cam: &Iso3, p_t: &Pt3) -> Option<Pt2> {
        self.project_point(&target_to_cam.transform_point(p_t))
    }

    /// Remove lens distortion from a pixel, returning the ideal pinhole pixel.
    pub fn undistort_pixel(&self, px: &Pt2) -> Pt2 {
        let n_d = self.intrinsics.pixel_to_sensor(&px.coords);
        let n_u = self.distortion.undistort(&n_d);
        let out = self.intrinsics.sensor_to_pixel(&n_u);
        Pt2::new(out.x, out.y)
    }

    /// Normalized undistorted coordinates of a pixel.
    pub fn pixel_to_normalized(&self, px: &Pt2) -> Pt2 {
        let n_d = self.intrinsics.pixel_to_sensor(&px.coords);
        let n_u = self.distortion.undistort(&n_d);
        Pt2::new(n_u.x, n_u.y)
    }
}
