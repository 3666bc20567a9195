use super::{
    adaptive_iterations, check_sample_size, count_inliers, finalize, EstimateError,
    EstimateSummary, EstimatorParams,
};
use crate::correspondence::CorrespondenceSet;
use crate::kernel::ModelKernel;
use rand::seq::index;
use rand::Rng;

/// Growth schedule of the sampling pool (Chum and Matas, 2005).
///
/// `t_n` is the expected number of samples drawn from the top `n` pairs in a plain
/// RANSAC run of `budget` iterations; `t_n_prime` is its integer counterpart.
struct Growth {
    m: usize,
    total: usize,
    n: usize,
    t_n: f64,
    t_n_prime: usize,
}

impl Growth {
    fn new(m: usize, total: usize, budget: usize) -> Self {
        let mut t_n = budget as f64;
        for i in 0..m {
            t_n *= (m - i) as f64 / (total - i) as f64;
        }
        Self {
            m,
            total,
            n: m,
            t_n,
            t_n_prime: 1,
        }
    }

    /// Advance to iteration `t`, enlarging the pool when its schedule is reached.
    fn step(&mut self, t: usize) {
        if t >= self.t_n_prime && self.n < self.total {
            let t_next = self.t_n * (self.n + 1) as f64 / (self.n + 1 - self.m) as f64;
            self.n += 1;
            self.t_n_prime += (t_next - self.t_n).ceil().max(1.0) as usize;
            self.t_n = t_next;
        }
    }
}

/// Progressive sample consensus.
///
/// Pairs are ranked by ascending descriptor distance and samples are drawn from a
/// growing prefix of that ranking: each sample holds the newest pair of the prefix plus
/// `m - 1` random pairs before it, until the schedule says the prefix has been sampled
/// enough, after which `m` pairs are drawn uniformly from it. Scoring, tie-breaking,
/// termination and the final refit are the same as [`ransac`](super::ransac).
pub fn prosac<K: ModelKernel, R: Rng + ?Sized>(
    kernel: &K,
    set: &mut CorrespondenceSet,
    params: &EstimatorParams,
    rng: &mut R,
) -> Result<EstimateSummary<K::Model>, EstimateError> {
    check_sample_size::<K>(set)?;

    let total = set.len();
    let m = K::MIN_SAMPLES;
    let threshold = params.reprojection_error;

    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by(|&a, &b| set.scene()[a].distance.total_cmp(&set.scene()[b].distance));

    let mut growth = Growth::new(m, total, params.max_iterations.max(1));
    let mut limit = params.max_iterations;
    let mut best: Option<(K::Model, usize)> = None;
    let mut iterations = 0;
    let mut sample = Vec::with_capacity(m);

    while iterations < limit {
        iterations += 1;
        growth.step(iterations);

        sample.clear();
        if growth.t_n_prime < iterations {
            sample.extend(index::sample(rng, growth.n, m).iter().map(|i| order[i]));
        } else {
            sample.extend(index::sample(rng, growth.n - 1, m - 1).iter().map(|i| order[i]));
            sample.push(order[growth.n - 1]);
        }

        if kernel.is_degenerate(set, &sample) {
            continue;
        }
        let Some(model) = kernel.fit(set, &sample) else {
            continue;
        };

        let count = count_inliers(kernel, set, &model, threshold);
        if best.as_ref().is_some_and(|(_, c)| count <= *c) {
            continue;
        }
        best = Some((model, count));

        let ratio = count as f64 / total as f64;
        limit = limit.min(adaptive_iterations(
            params.confidence,
            ratio,
            m,
            params.max_iterations,
        ));
        if kernel.early_exit_ratio().is_some_and(|r| ratio > r) {
            break;
        }
    }

    log::trace!("prosac sampled from the top {} of {total} pairs", growth.n);
    let (model, _) = best.ok_or(EstimateError::NoValidModel)?;
    Ok(finalize(kernel, set, model, threshold, iterations))
}
