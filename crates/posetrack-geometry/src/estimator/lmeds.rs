use super::{adaptive_iterations, check_sample_size, finalize, EstimateError, EstimateSummary, EstimatorParams};
use crate::correspondence::CorrespondenceSet;
use crate::kernel::ModelKernel;
use rand::seq::index;
use rand::Rng;

/// Outlier ratio the sampling budget of LMedS is planned for.
const PLANNED_INLIER_RATIO: f64 = 0.5;

/// Median of the squared residuals of every pair under `model`.
fn median_squared_residual<K: ModelKernel>(
    kernel: &K,
    set: &CorrespondenceSet,
    model: &K::Model,
    scratch: &mut Vec<f64>,
) -> f64 {
    scratch.clear();
    scratch.extend(set.iter().map(|(r, s, _)| {
        let d = kernel.residual(model, r, s);
        d * d
    }));
    let mid = scratch.len() / 2;
    let (_, median, _) = scratch.select_nth_unstable_by(mid, f64::total_cmp);
    *median
}

/// Least median of squares.
///
/// Draws the same uniform minimal samples as [`ransac`](super::ransac) for a fixed
/// budget planned for a 50% inlier ratio, and keeps the candidate with the strictly
/// smallest median squared residual. The reprojection threshold is only used afterwards
/// to classify inliers for the refit.
pub fn lmeds<K: ModelKernel, R: Rng + ?Sized>(
    kernel: &K,
    set: &mut CorrespondenceSet,
    params: &EstimatorParams,
    rng: &mut R,
) -> Result<EstimateSummary<K::Model>, EstimateError> {
    check_sample_size::<K>(set)?;

    let n = set.len();
    let limit = adaptive_iterations(
        params.confidence,
        PLANNED_INLIER_RATIO,
        K::MIN_SAMPLES,
        params.max_iterations,
    );
    let mut best: Option<(K::Model, f64)> = None;
    let mut scratch = Vec::with_capacity(n);
    let mut iterations = 0;

    while iterations < limit {
        iterations += 1;

        let sample = index::sample(rng, n, K::MIN_SAMPLES).into_vec();
        if kernel.is_degenerate(set, &sample) {
            continue;
        }
        let Some(model) = kernel.fit(set, &sample) else {
            continue;
        };

        let median = median_squared_residual(kernel, set, &model, &mut scratch);
        if !median.is_finite() || best.as_ref().is_some_and(|(_, m)| median >= *m) {
            continue;
        }
        best = Some((model, median));
    }

    let (model, median) = best.ok_or(EstimateError::NoValidModel)?;
    log::trace!("lmeds best median squared residual {median:.4}");
    Ok(finalize(kernel, set, model, params.reprojection_error, iterations))
}
