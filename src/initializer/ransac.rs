//! Generic RANSAC over minimal-sample estimators.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. The iteration
//! budget adapts to the best inlier ratio seen so far and stays within
//! `[min_iterations, max_iterations]`.

use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Parameters of the robust estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Acceptable probability of never drawing an all-inlier sample.
    pub failure_probability: f64,
    pub max_iterations: usize,
    pub min_iterations: usize,
    /// Inlier threshold in pixels. Per frame this is replaced by 0.3 % of
    /// the image height.
    pub error_thresh: f64,
    /// Score with a truncated quadratic and refine the winner by nonlinear
    /// least squares on its inliers.
    pub use_mle: bool,
    /// Fraction of correspondences that must agree for a consensus. `0.0`
    /// accepts the best model whatever its support.
    pub min_inlier_ratio: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        RansacParams {
            failure_probability: 0.001,
            max_iterations: 1000,
            min_iterations: 5,
            error_thresh: 3.0,
            use_mle: true,
            min_inlier_ratio: 0.5,
            seed: 1_234_567,
        }
    }
}

/// A model that can be fitted from a minimal sample.
pub trait Estimator {
    type Datum;
    type Model: Clone;

    /// Size of a minimal sample.
    fn sample_size(&self) -> usize;

    /// Fit zero or more candidate models to the sampled data.
    fn estimate(&self, data: &[Self::Datum], sample: &[usize]) -> Vec<Self::Model>;

    /// Non-negative residual of one datum, in the units of the threshold.
    fn error(&self, model: &Self::Model, datum: &Self::Datum) -> f64;
}

#[derive(Debug, Clone)]
pub struct RansacSummary<M> {
    pub model: Option<M>,
    pub inliers: Vec<usize>,
    pub iterations: usize,
    /// Truncated quadratic cost of the best model.
    pub cost: f64,
}

impl<M> Default for RansacSummary<M> {
    fn default() -> Self {
        RansacSummary {
            model: None,
            inliers: Vec::new(),
            iterations: 0,
            cost: f64::INFINITY,
        }
    }
}

/// Number of samples needed to draw one all-inlier sample with probability
/// `1 - failure_probability`.
pub fn required_iterations(
    failure_probability: f64,
    inlier_ratio: f64,
    sample_size: usize,
    min_iterations: usize,
    max_iterations: usize,
) -> usize {
    let max_iterations = max_iterations.max(min_iterations);
    if inlier_ratio <= 0.0 || failure_probability <= 0.0 {
        return max_iterations;
    }
    if inlier_ratio >= 1.0 {
        return min_iterations;
    }
    let denom = (1.0 - inlier_ratio.powi(sample_size as i32)).ln();
    if denom >= 0.0 || !denom.is_finite() {
        return max_iterations;
    }
    let needed = (failure_probability.ln() / denom).ceil();
    if !needed.is_finite() || needed >= max_iterations as f64 {
        return max_iterations;
    }
    (needed as usize).clamp(min_iterations, max_iterations)
}

pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    params: &RansacParams,
    rng: &mut StdRng,
) -> RansacSummary<E::Model> {
    let mut best = RansacSummary::default();
    let sample_size = estimator.sample_size();
    if sample_size == 0 || data.len() < sample_size {
        return best;
    }

    let thresh_sq = params.error_thresh * params.error_thresh;
    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = vec![0usize; sample_size];
    let mut budget = params.max_iterations.max(params.min_iterations);

    while best.iterations < budget {
        best.iterations += 1;
        all_indices
            .choose_multiple(rng, sample_size)
            .enumerate()
            .for_each(|(k, &idx)| sample[k] = idx);

        for model in estimator.estimate(data, &sample) {
            let mut cost = 0.0;
            let mut inliers = Vec::new();
            for (i, datum) in data.iter().enumerate() {
                let e = estimator.error(&model, datum);
                let e_sq = if e.is_finite() { e * e } else { f64::INFINITY };
                if e_sq < thresh_sq {
                    inliers.push(i);
                    cost += e_sq;
                } else {
                    cost += thresh_sq;
                }
            }

            let better = if params.use_mle {
                cost < best.cost
            } else {
                inliers.len() > best.inliers.len()
                    || (inliers.len() == best.inliers.len() && cost < best.cost)
            };
            if better && !inliers.is_empty() {
                let ratio = inliers.len() as f64 / data.len() as f64;
                budget = required_iterations(
                    params.failure_probability,
                    ratio,
                    sample_size,
                    params.min_iterations,
                    params.max_iterations,
                );
                best.model = Some(model);
                best.inliers = inliers;
                best.cost = cost;
            }
        }
    }
    best
}
