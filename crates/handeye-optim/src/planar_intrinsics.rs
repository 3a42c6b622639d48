//! Joint refinement of camera intrinsics, distortion and per-view board poses.
//!
//! Parameter layout: `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` followed by one
//! `[rx, ry, rz, tx, ty, tz]` block per view. Residuals are observed minus
//! projected pixels, two rows per corner.

use crate::params::{
    project_clamped, read_camera, read_pose, write_camera, write_pose, CAMERA_DIM, POSE_DIM,
};
use crate::{NllsProblem, NllsSolverBackend, OptimError, SolveOptions, SolveReport};
use handeye_core::{IntrinsicModel, Iso3, Pt2, Pt3, Real};
use log::debug;
use nalgebra::DVector;

/// Observations for a single image of the planar target.
#[derive(Debug, Clone)]
pub struct PlanarViewObservations {
    /// Target points in board coordinates (`z = 0`).
    pub points_3d: Vec<Pt3>,
    /// Detected pixels, same order as `points_3d`.
    pub points_2d: Vec<Pt2>,
}

impl PlanarViewObservations {
    pub fn new(points_3d: Vec<Pt3>, points_2d: Vec<Pt2>) -> Result<Self, OptimError> {
        if points_3d.len() != points_2d.len() {
            return Err(OptimError::LengthMismatch {
                points: points_3d.len(),
                pixels: points_2d.len(),
            });
        }
        Ok(Self {
            points_3d,
            points_2d,
        })
    }

    pub fn len(&self) -> usize {
        self.points_3d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points_3d.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsProblem {
    views: Vec<PlanarViewObservations>,
    undistort_iters: u32,
}

impl PlanarIntrinsicsProblem {
    pub fn new(views: Vec<PlanarViewObservations>) -> Result<Self, OptimError> {
        if views.is_empty() {
            return Err(OptimError::NoViews);
        }
        if let Some((view, v)) = views.iter().enumerate().find(|(_, v)| v.len() < 4) {
            return Err(OptimError::TooFewPoints { view, count: v.len() });
        }
        Ok(Self {
            views,
            undistort_iters: 8,
        })
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    fn decode(&self, x: &DVector<Real>) -> (IntrinsicModel, Vec<Iso3>) {
        let camera = read_camera(x.rows(0, CAMERA_DIM), self.undistort_iters);
        let poses = (0..self.num_views())
            .map(|i| read_pose(x.rows(CAMERA_DIM + POSE_DIM * i, POSE_DIM)))
            .collect();
        (camera, poses)
    }
}

impl NllsProblem for PlanarIntrinsicsProblem {
    fn num_params(&self) -> usize {
        CAMERA_DIM + POSE_DIM * self.num_views()
    }

    fn num_residuals(&self) -> usize {
        self.views.iter().map(|v| 2 * v.len()).sum()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let (camera, poses) = self.decode(x);
        let mut r = DVector::zeros(self.num_residuals());
        let mut offset = 0;
        for (view, pose) in self.views.iter().zip(&poses) {
            for (pw, meas) in view.points_3d.iter().zip(&view.points_2d) {
                let proj = project_clamped(&camera, pose, pw);
                r[offset] = meas.x - proj.x;
                r[offset + 1] = meas.y - proj.y;
                offset += 2;
            }
        }
        r
    }
}

/// Refined camera and board poses.
#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsEstimate {
    pub model: IntrinsicModel,
    pub poses: Vec<Iso3>,
    pub report: SolveReport,
}

/// Refine intrinsics, distortion and per-view poses from an initial guess.
///
/// The returned model keeps the undistortion iteration count of `init`.
pub fn refine_planar_intrinsics<B: NllsSolverBackend>(
    backend: &B,
    mut problem: PlanarIntrinsicsProblem,
    init: &IntrinsicModel,
    init_poses: &[Iso3],
    opts: &SolveOptions,
) -> Result<PlanarIntrinsicsEstimate, OptimError> {
    if init_poses.len() != problem.num_views() {
        return Err(OptimError::PoseCountMismatch {
            views: problem.num_views(),
            poses: init_poses.len(),
        });
    }
    problem.undistort_iters = init.distortion.iters;

    let mut x0 = DVector::zeros(problem.num_params());
    write_camera(&mut x0, 0, init);
    for (i, pose) in init_poses.iter().enumerate() {
        write_pose(&mut x0, CAMERA_DIM + POSE_DIM * i, pose);
    }

    let (x, report) = backend.solve(&problem, x0, opts);
    if x.iter().any(|v| !v.is_finite()) {
        return Err(OptimError::NonFinite);
    }
    debug!(
        "planar intrinsics: {} evaluations, cost {:.3e}, converged {}",
        report.iterations, report.final_cost, report.converged
    );

    let (model, poses) = problem.decode(&x);
    Ok(PlanarIntrinsicsEstimate {
        model,
        poses,
        report,
    })
}
