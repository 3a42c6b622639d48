//! Seeded consensus sampling for models fitted from minimal point samples.
//!
//! [`best_consensus`] draws a fixed number of minimal samples, keeps the model
//! with the largest inlier set and finishes with a least-squares refit on
//! those inliers.

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::Real;

/// Model fitted from `MIN_SAMPLES` data points and refined on its inliers.
pub trait Estimator {
    type Datum;
    type Model;

    const MIN_SAMPLES: usize;

    /// `None` when the sample cannot define a model (e.g. collinear points).
    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative distance of one datum to the model.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> Real;

    /// Least-squares fit over an inlier set.
    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOptions {
    /// Number of minimal samples drawn; there is no early exit.
    pub iterations: usize,
    /// Inlier distance, in residual units.
    pub thresh: Real,
    pub min_inliers: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Consensus<M> {
    pub model: M,
    /// Ascending indices of the data within `thresh` of `model`.
    pub inliers: Vec<usize>,
}

fn inliers_of<E: Estimator>(model: &E::Model, data: &[E::Datum], thresh: Real) -> (Vec<usize>, Real) {
    let mut inliers = Vec::new();
    let mut spread = 0.0;
    for (idx, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(idx);
            spread += r;
        }
    }
    (inliers, spread)
}

/// Best-supported model of `data`, or `None` when no sample reaches `min_inliers`.
///
/// Ties in inlier count go to the smaller residual sum. Identical inputs and
/// seed give identical results.
pub fn best_consensus<E: Estimator>(
    data: &[E::Datum],
    opts: &ConsensusOptions,
) -> Option<Consensus<E::Model>> {
    if data.len() < E::MIN_SAMPLES {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<(E::Model, Vec<usize>, Real)> = None;

    for _ in 0..opts.iterations {
        let sample = rand::seq::index::sample(&mut rng, data.len(), E::MIN_SAMPLES).into_vec();
        let Some(model) = E::fit(data, &sample) else {
            continue;
        };
        let (inliers, spread) = inliers_of::<E>(&model, data, opts.thresh);
        if inliers.len() < opts.min_inliers.max(E::MIN_SAMPLES) {
            continue;
        }
        let better = match &best {
            None => true,
            Some((_, prev, prev_spread)) => {
                inliers.len() > prev.len() || (inliers.len() == prev.len() && spread < *prev_spread)
            }
        };
        if better {
            best = Some((model, inliers, spread));
        }
    }

    let (model, inliers, _) = best?;
    match E::refit(data, &inliers) {
        Some(refined) => {
            let (refined_inliers, _) = inliers_of::<E>(&refined, data, opts.thresh);
            Some(Consensus {
                model: refined,
                inliers: refined_inliers,
            })
        }
        None => Some(Consensus { model, inliers }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pt2;

    /// Line `y = slope * x + intercept`, vertical distance as residual.
    struct LineEstimator;

    impl Estimator for LineEstimator {
        type Datum = Pt2;
        type Model = (Real, Real);

        const MIN_SAMPLES: usize = 2;

        fn fit(data: &[Pt2], sample: &[usize]) -> Option<(Real, Real)> {
            let (a, b) = (data[sample[0]], data[sample[1]]);
            let dx = b.x - a.x;
            if dx.abs() < 1e-12 {
                return None;
            }
            let slope = (b.y - a.y) / dx;
            Some((slope, a.y - slope * a.x))
        }

        fn residual(model: &(Real, Real), p: &Pt2) -> Real {
            (model.0 * p.x + model.1 - p.y).abs()
        }

        fn refit(data: &[Pt2], inliers: &[usize]) -> Option<(Real, Real)> {
            let n = inliers.len() as Real;
            let (sx, sy, sxx, sxy) = inliers.iter().map(|&i| data[i]).fold(
                (0.0, 0.0, 0.0, 0.0),
                |(sx, sy, sxx, sxy), p| (sx + p.x, sy + p.y, sxx + p.x * p.x, sxy + p.x * p.y),
            );
            let det = n * sxx - sx * sx;
            if det.abs() < 1e-12 {
                return None;
            }
            let slope = (n * sxy - sx * sy) / det;
            Some((slope, (sy - slope * sx) / n))
        }
    }

    fn opts() -> ConsensusOptions {
        ConsensusOptions {
            iterations: 100,
            thresh: 0.05,
            min_inliers: 5,
            seed: 11,
        }
    }

    fn noisy_line() -> Vec<Pt2> {
        let mut pts: Vec<Pt2> = (0..20)
            .map(|i| {
                let x = i as Real;
                let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
                Pt2::new(x, 0.5 * x + 2.0 + wiggle)
            })
            .collect();
        pts.extend([Pt2::new(3.0, 40.0), Pt2::new(7.0, -15.0), Pt2::new(12.0, 0.0)]);
        pts
    }

    #[test]
    fn too_little_data_has_no_consensus() {
        assert!(best_consensus::<LineEstimator>(&[Pt2::new(0.0, 0.0)], &opts()).is_none());
    }

    #[test]
    fn unsupported_models_are_rejected() {
        let scattered = [Pt2::new(0.0, 0.0), Pt2::new(1.0, 5.0), Pt2::new(2.0, -3.0)];
        assert!(best_consensus::<LineEstimator>(&scattered, &opts()).is_none());
    }

    #[test]
    fn outliers_are_left_out_and_the_fit_is_refined() {
        let res = best_consensus::<LineEstimator>(&noisy_line(), &opts()).unwrap();
        assert_eq!(res.inliers, (0..20).collect::<Vec<_>>());
        let (slope, intercept) = res.model;
        assert!((slope - 0.5).abs() < 1e-3, "slope {slope}");
        assert!((intercept - 2.0).abs() < 1e-2, "intercept {intercept}");
    }

    #[test]
    fn same_seed_same_result() {
        let data = noisy_line();
        assert_eq!(
            best_consensus::<LineEstimator>(&data, &opts()),
            best_consensus::<LineEstimator>(&data, &opts())
        );
    }
}
