//! Closed-form estimators used to seed and complete the calibration pipeline.
//!
//! - [`dlt_homography`]: normalized DLT homography between the board plane and the image.
//! - [`estimate_intrinsics_from_homographies`]: Zhang's closed form.
//! - [`estimate_intrinsics_iterative`]: alternating Zhang / distortion fit.
//! - [`pose_from_homography`] and [`planar_pnp`]: target pose of a single view.
//! - [`handeye`]: Tsai–Lenz, Park, Horaud, Andreff and Daniilidis AX = XB solvers.

pub mod distortion_fit;
pub mod handeye;
pub mod homography;
pub mod iterative_intrinsics;
pub mod math;
pub mod planar_pose;
pub mod pnp;
pub mod zhang_intrinsics;

pub use distortion_fit::*;
pub use handeye::{solve_all_methods, HandEyeError, HandEyeMethod, HandEyeOptions, HandEyeOutcome};
pub use homography::*;
pub use iterative_intrinsics::*;
pub use planar_pose::*;
pub use pnp::*;
pub use zhang_intrinsics::*;
