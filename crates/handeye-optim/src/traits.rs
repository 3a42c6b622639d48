use handeye_core::Real;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Dense non-linear least squares problem.
///
/// Only residuals are mandatory; the default Jacobian uses central differences.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows in the problem.
    fn num_residuals(&self) -> usize;

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        central_difference_jacobian(|p| self.residuals(p), x, self.num_residuals())
    }
}

/// Central finite-difference Jacobian with a step relative to each parameter.
pub fn central_difference_jacobian<F>(residuals: F, x: &DVector<Real>, rows: usize) -> DMatrix<Real>
where
    F: Fn(&DVector<Real>) -> DVector<Real>,
{
    let mut j = DMatrix::zeros(rows, x.len());
    let mut shifted = x.clone();
    for k in 0..x.len() {
        let h = 1e-6 * x[k].abs().max(1.0);
        shifted[k] = x[k] + h;
        let r_plus = residuals(&shifted);
        shifted[k] = x[k] - h;
        let r_minus = residuals(&shifted);
        shifted[k] = x[k];
        j.set_column(k, &((r_plus - r_minus) / (2.0 * h)));
    }
    j
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Maximum number of solver iterations (Jacobian evaluations) before
    /// termination. A capped solve reports `converged: false`.
    pub max_iters: usize,
    /// Relative tolerance on the objective (cost) reduction.
    pub ftol: Real,
    /// Orthogonality/gradient tolerance.
    pub gtol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// `0.5 * ||r||²` at the solution.
    pub final_cost: Real,
    pub converged: bool,
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
