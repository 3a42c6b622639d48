use crate::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use handeye_core::Real;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::trace;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use std::cell::Cell;

struct LmWrapper<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<Real>,
    /// Outer iterations so far; the solver asks for one Jacobian per iteration.
    iterations: Cell<usize>,
    max_iters: usize,
}

impl<P: NllsProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmWrapper<'_, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let r = self.problem.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        // Refusing the Jacobian stops the solver at the last accepted parameters.
        if self.iterations.get() >= self.max_iters {
            return None;
        }
        self.iterations.set(self.iterations.get() + 1);
        let j = self.problem.jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// Levenberg–Marquardt (MINPACK port from the `levenberg-marquardt` crate).
#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl NllsSolverBackend for LmBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.max_iters.max(1));

        let wrapper = LmWrapper {
            problem,
            params: x0,
            iterations: Cell::new(0),
            max_iters: opts.max_iters.max(1),
        };

        let (wrapper, report) = lm.minimize(wrapper);
        trace!("lm termination: {:?}", report.termination);
        if report.termination == TerminationReason::User("jacobian") {
            trace!("lm stopped after {} iterations", wrapper.max_iters);
        }

        (
            wrapper.params(),
            SolveReport {
                iterations: wrapper.iterations.get(),
                final_cost: report.objective_function,
                converged: report.termination.was_successful(),
            },
        )
    }
}
