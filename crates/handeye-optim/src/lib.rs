//! Non-linear refinement built on a dense Levenberg–Marquardt backend.
//!
//! Problems implement [`NllsProblem`]; [`LmBackend`] solves them. Two problems
//! are provided: joint planar intrinsics + poses, and single-pose refinement
//! with a frozen camera.

pub mod backend_lm;
pub mod params;
pub mod planar_intrinsics;
pub mod pose_refine;
mod traits;

pub use backend_lm::LmBackend;
pub use planar_intrinsics::{
    refine_planar_intrinsics, PlanarIntrinsicsEstimate, PlanarIntrinsicsProblem,
    PlanarViewObservations,
};
pub use pose_refine::{refine_pose, PoseRefineProblem};
pub use traits::{central_difference_jacobian, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum OptimError {
    #[error("need at least one view")]
    NoViews,
    #[error("view {view} has {count} points, need at least 4")]
    TooFewPoints { view: usize, count: usize },
    #[error("{points} object points vs {pixels} pixels")]
    LengthMismatch { points: usize, pixels: usize },
    #[error("{views} views but {poses} initial poses")]
    PoseCountMismatch { views: usize, poses: usize },
    #[error("optimizer produced non-finite parameters")]
    NonFinite,
}
