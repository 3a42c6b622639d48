//! Pose of a planar target from one image.
//!
//! Observed pixels are undistorted into normalized camera coordinates with the
//! frozen camera model, a homography from the board plane to the normalized
//! plane is fitted and decomposed with `K = I`.

use crate::homography::{dlt_homography, HomographyError};
use crate::planar_pose::{pose_from_homography, PlanarPoseError};
use handeye_core::{IntrinsicModel, Iso3, Mat3, Pt2, Pt3};

#[derive(Debug, thiserror::Error)]
pub enum PnpError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("{points} object points vs {pixels} image points")]
    LengthMismatch { points: usize, pixels: usize },
    #[error("object points are not planar (max |z| = {0})")]
    NotPlanar(f64),
    #[error("homography failed: {0}")]
    Homography(#[from] HomographyError),
    #[error("pose decomposition failed: {0}")]
    Decomposition(#[from] PlanarPoseError),
    #[error("target is behind the camera")]
    BehindCamera,
}

/// Pose of a `z = 0` target from pixel observations through a calibrated camera.
pub fn planar_pnp(
    object_points: &[Pt3],
    pixels: &[Pt2],
    model: &IntrinsicModel,
) -> Result<Iso3, PnpError> {
    if object_points.len() != pixels.len() {
        return Err(PnpError::LengthMismatch {
            points: object_points.len(),
            pixels: pixels.len(),
        });
    }
    if object_points.len() < 4 {
        return Err(PnpError::NotEnoughPoints(object_points.len()));
    }
    let max_z = object_points.iter().map(|p| p.z.abs()).fold(0.0, f64::max);
    if max_z > 1e-9 {
        return Err(PnpError::NotPlanar(max_z));
    }

    let board: Vec<Pt2> = object_points.iter().map(|p| Pt2::new(p.x, p.y)).collect();
    let normalized: Vec<Pt2> = pixels.iter().map(|p| model.pixel_to_normalized(p)).collect();

    let h = dlt_homography(&board, &normalized)?;
    let pose = pose_from_homography(&Mat3::identity(), &h)?;

    if object_points
        .iter()
        .any(|p| pose.transform_point(p).z <= 0.0)
    {
        return Err(PnpError::BehindCamera);
    }
    Ok(pose)
}
