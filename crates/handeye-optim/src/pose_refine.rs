//! Six-parameter refinement of one target pose with a frozen camera model.

use crate::params::{project_clamped, read_pose, write_pose, POSE_DIM};
use crate::{NllsProblem, NllsSolverBackend, OptimError, SolveOptions, SolveReport};
use handeye_core::{IntrinsicModel, Iso3, Pt2, Pt3, Real};
use nalgebra::DVector;

pub struct PoseRefineProblem<'a> {
    model: &'a IntrinsicModel,
    object_points: &'a [Pt3],
    pixels: &'a [Pt2],
}

impl<'a> PoseRefineProblem<'a> {
    pub fn new(
        model: &'a IntrinsicModel,
        object_points: &'a [Pt3],
        pixels: &'a [Pt2],
    ) -> Result<Self, OptimError> {
        if object_points.len() != pixels.len() {
            return Err(OptimError::LengthMismatch {
                points: object_points.len(),
                pixels: pixels.len(),
            });
        }
        if object_points.len() < 4 {
            return Err(OptimError::TooFewPoints {
                view: 0,
                count: object_points.len(),
            });
        }
        Ok(Self {
            model,
            object_points,
            pixels,
        })
    }
}

impl NllsProblem for PoseRefineProblem<'_> {
    fn num_params(&self) -> usize {
        POSE_DIM
    }

    fn num_residuals(&self) -> usize {
        2 * self.pixels.len()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let pose = read_pose(x.rows(0, POSE_DIM));
        let mut r = DVector::zeros(self.num_residuals());
        for (k, (pw, meas)) in self.object_points.iter().zip(self.pixels).enumerate() {
            let proj = project_clamped(self.model, &pose, pw);
            r[2 * k] = meas.x - proj.x;
            r[2 * k + 1] = meas.y - proj.y;
        }
        r
    }
}

/// Minimize the distorted reprojection error of one view over the pose only.
pub fn refine_pose<B: NllsSolverBackend>(
    backend: &B,
    problem: &PoseRefineProblem<'_>,
    init: &Iso3,
    opts: &SolveOptions,
) -> Result<(Iso3, SolveReport), OptimError> {
    let mut x0 = DVector::zeros(POSE_DIM);
    write_pose(&mut x0, 0, init);
    let (x, report) = backend.solve(problem, x0, opts);
    if x.iter().any(|v| !v.is_finite()) {
        return Err(OptimError::NonFinite);
    }
    Ok((read_pose(x.rows(0, POSE_DIM)), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmBackend;
    use handeye_core::{pose_error, synthetic, BrownConrady5, FxFyCxCySkew, GridGeometry};
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn refines_perturbed_pose_back_to_truth() {
        let model = IntrinsicModel::new(
            FxFyCxCySkew {
                fx: 1400.0,
                fy: 1400.0,
                cx: 1000.0,
                cy: 750.0,
                skew: 0.0,
            },
            BrownConrady5 {
                k1: -0.12,
                k2: 0.04,
                k3: 0.0,
                p1: 0.0,
                p2: 0.0,
                iters: 10,
            },
        );
        let grid = GridGeometry::new(9, 7, 15.0).unwrap();
        let object = grid.object_points();
        let gt = Iso3::from_parts(
            Translation3::new(-60.0, -40.0, 420.0),
            UnitQuaternion::from_euler_angles(0.2, -0.3, 0.4),
        );
        let pixels = synthetic::project_view(&model, &gt, &object).unwrap();
        let init = Iso3::from_parts(
            Translation3::new(-57.0, -43.0, 430.0),
            UnitQuaternion::from_euler_angles(0.22, -0.28, 0.41),
        );

        let problem = PoseRefineProblem::new(&model, &object, &pixels).unwrap();
        let (est, report) = refine_pose(&LmBackend, &problem, &init, &Default::default()).unwrap();
        let (dt, ang) = pose_error(&est, &gt);
        assert!(dt < 1e-5, "dt={dt}");
        assert!(ang < 1e-6, "ang={ang}");
        assert!(report.final_cost < 1e-9, "{report:?}");
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let model = IntrinsicModel::pinhole(FxFyCxCySkew {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
            skew: 0.0,
        });
        let pts = vec![Pt3::origin(); 5];
        let px = vec![Pt2::origin(); 4];
        assert!(matches!(
            PoseRefineProblem::new(&model, &pts, &px),
            Err(OptimError::LengthMismatch { points: 5, pixels: 4 })
        ));
    }
}
