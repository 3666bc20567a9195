use super::{
    adaptive_iterations, check_sample_size, count_inliers, finalize, EstimateError,
    EstimateSummary, EstimatorParams,
};
use crate::correspondence::CorrespondenceSet;
use crate::kernel::ModelKernel;
use rand::seq::index;
use rand::Rng;

/// Random sample consensus.
///
/// Draws minimal samples without replacement, fits a candidate from each and keeps the
/// one with strictly more inliers than the current best, so ties keep the first found.
/// Degenerate samples count as iterations but never become the winner. The iteration
/// bound shrinks with the best inlier ratio seen so far, and kernels with an early-exit
/// ratio stop as soon as the best candidate exceeds it. The winner is refitted once on
/// all its inliers.
pub fn ransac<K: ModelKernel, R: Rng + ?Sized>(
    kernel: &K,
    set: &mut CorrespondenceSet,
    params: &EstimatorParams,
    rng: &mut R,
) -> Result<EstimateSummary<K::Model>, EstimateError> {
    check_sample_size::<K>(set)?;

    let n = set.len();
    let threshold = params.reprojection_error;
    let mut limit = params.max_iterations;
    let mut best: Option<(K::Model, usize)> = None;
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

        let count = count_inliers(kernel, set, &model, threshold);
        if best.as_ref().is_some_and(|(_, c)| count <= *c) {
            continue;
        }
        best = Some((model, count));

        let ratio = count as f64 / n as f64;
        limit = limit.min(adaptive_iterations(
            params.confidence,
            ratio,
            K::MIN_SAMPLES,
            params.max_iterations,
        ));
        if kernel.early_exit_ratio().is_some_and(|r| ratio > r) {
            log::trace!("early exit at iteration {iterations}, inlier ratio {ratio:.3}");
            break;
        }
    }

    let (model, _) = best.ok_or(EstimateError::NoValidModel)?;
    Ok(finalize(kernel, set, model, threshold, iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::{ReferencePoint, ScenePoint};
    use crate::kernel::HomographyKernel;
    use crate::transform::Homography;
    use glam::{DVec2, DVec3};
    use rand::{rngs::StdRng, SeedableRng};

    fn affine_set(n: usize) -> CorrespondenceSet {
        (0..n)
            .map(|i| {
                let x = (i % 5) as f64 * 12.0;
                let y = (i / 5) as f64 * 9.0 + (i % 3) as f64;
                (
                    ReferencePoint::new(DVec3::new(x, y, 0.0), i),
                    ScenePoint::new(DVec2::new(1.5 * x + 0.2 * y + 10.0, y - 4.0), 0.0),
                )
            })
            .collect()
    }

    #[test]
    fn insufficient_correspondences() {
        let mut set = affine_set(3);
        let mut rng = StdRng::seed_from_u64(0);
        let res = ransac(&HomographyKernel, &mut set, &EstimatorParams::default(), &mut rng);
        assert_eq!(
            res,
            Err(EstimateError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn all_collinear_has_no_model() {
        let mut set: CorrespondenceSet = (0..8)
            .map(|i| {
                let p = DVec3::new(i as f64, 0.0, 0.0);
                (ReferencePoint::new(p, i), ScenePoint::new(p.truncate(), 0.0))
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(1);
        let params = EstimatorParams {
            max_iterations: 20,
            ..Default::default()
        };
        let res = ransac(&HomographyKernel, &mut set, &params, &mut rng);
        assert_eq!(res, Err(EstimateError::NoValidModel));
        assert_eq!(set.inlier_count(), 8);
    }

    #[test]
    fn clean_data_stops_early() -> Result<(), EstimateError> {
        let mut set = affine_set(20);
        let mut rng = StdRng::seed_from_u64(2);
        let summary = ransac(&HomographyKernel, &mut set, &EstimatorParams::default(), &mut rng)?;
        assert_eq!(summary.inliers, 20);
        assert!(summary.iterations < 5);
        assert!(summary.refit);
        let expected =
            Homography::from_rows([[1.5, 0.2, 10.0], [0.0, 1.0, -4.0], [0.0, 0.0, 1.0]]).unwrap();
        assert!(summary.model.frobenius_distance(&expected) < 1e-6);
        Ok(())
    }
}
