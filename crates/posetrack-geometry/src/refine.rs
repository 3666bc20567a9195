use crate::camera::CameraIntrinsics;
use crate::correspondence::CorrespondenceSet;
use crate::so3::SO3;
use crate::transform::{Homography, Pose, Transform};
use glam::{DVec2, DVec3};
use nalgebra::{Const, DVector, Dyn, OMatrix, SVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for the nonlinear refinement.
#[derive(Debug, Error, PartialEq)]
pub enum RefineError {
    /// Not enough inlier pairs to constrain the model.
    #[error("Refinement requires at least {required} inliers, got {actual}")]
    InsufficientInliers {
        /// Minimum number of inliers.
        required: usize,
        /// Number of inliers provided.
        actual: usize,
    },

    /// The initial or refined model produced non-finite residuals.
    #[error("Refinement produced a non-finite model")]
    NonFinite,
}

/// Parameters controlling the Levenberg–Marquardt refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the norm of the parameter update.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
    /// Minimum number of inliers to attempt a refinement.
    pub min_inliers: usize,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            eps: 1e-8,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
            min_inliers: 6,
        }
    }
}

/// Report of a refinement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineSummary {
    /// Root-mean-square reprojection distance before refinement, in pixels.
    pub initial_rmse: f64,
    /// Root-mean-square reprojection distance after refinement, in pixels.
    pub final_rmse: f64,
    /// LM iterations performed.
    pub iterations: usize,
    /// Whether the parameter update fell below `eps`.
    pub converged: bool,
}

struct LmOutcome<const N: usize> {
    x: SVector<f64, N>,
    initial_cost: f64,
    final_cost: f64,
    iterations: usize,
    converged: bool,
}

/// Minimize the sum of squared residuals with Levenberg–Marquardt (Marquardt scaling).
///
/// `residuals` writes the residual vector and returns its squared norm, or infinity when
/// the parameters are invalid. `step` gives the central-difference step of parameter k.
/// Steps are only accepted when they reduce the cost.
fn levenberg_marquardt<const N: usize, F, H>(
    x0: SVector<f64, N>,
    num_residuals: usize,
    residuals: F,
    step: H,
    params: &RefineParams,
) -> LmOutcome<N>
where
    F: Fn(&SVector<f64, N>, &mut [f64]) -> f64,
    H: Fn(usize, &SVector<f64, N>) -> f64,
{
    const MAX_LAMBDA: f64 = 1e16;

    let mut x = x0;
    let mut r = DVector::<f64>::zeros(num_residuals);
    let mut r_plus = DVector::<f64>::zeros(num_residuals);
    let mut r_minus = DVector::<f64>::zeros(num_residuals);
    let mut jac = OMatrix::<f64, Dyn, Const<N>>::zeros(num_residuals);

    let initial_cost = residuals(&x, r.as_mut_slice());
    let mut cost = initial_cost;
    let mut lambda = params.lambda_init;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations && cost.is_finite() {
        iterations += 1;

        for k in 0..N {
            let h = step(k, &x);
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k] += h;
            x_minus[k] -= h;
            let c_plus = residuals(&x_plus, r_plus.as_mut_slice());
            let c_minus = residuals(&x_minus, r_minus.as_mut_slice());
            if c_plus.is_finite() && c_minus.is_finite() {
                jac.set_column(k, &((&r_plus - &r_minus) / (2.0 * h)));
            } else {
                jac.column_mut(k).fill(0.0);
            }
        }

        let jtj = jac.transpose() * &jac;
        let g = jac.transpose() * &r;

        // retry with more damping until the cost drops or lambda saturates
        loop {
            let mut a = jtj;
            for d in 0..N {
                a[(d, d)] += lambda * jtj[(d, d)].max(1e-12);
            }
            let delta = a.cholesky().map(|c| c.solve(&(-g)));
            let Some(delta) = delta.filter(|d| d.iter().all(|v| v.is_finite())) else {
                lambda *= params.lambda_mul;
                if lambda > MAX_LAMBDA {
                    break;
                }
                continue;
            };

            let x_new = x + delta;
            let cost_new = residuals(&x_new, r_plus.as_mut_slice());
            if cost_new < cost {
                x = x_new;
                cost = cost_new;
                r.copy_from(&r_plus);
                lambda = (lambda / params.lambda_mul).max(1e-12);
                if delta.norm() < params.eps {
                    converged = true;
                }
                break;
            }

            lambda *= params.lambda_mul;
            if lambda > MAX_LAMBDA {
                break;
            }
        }

        if converged || lambda > MAX_LAMBDA {
            break;
        }
    }

    LmOutcome {
        x,
        initial_cost,
        final_cost: cost,
        iterations,
        converged,
    }
}

fn pose_to_params(pose: &Pose) -> SVector<f64, 6> {
    let rvec = SO3::from_matrix(&pose.rotation).log();
    let t = pose.translation;
    SVector::<f64, 6>::new(rvec.x, rvec.y, rvec.z, t.x, t.y, t.z)
}

fn params_to_pose(x: &SVector<f64, 6>) -> Pose {
    Pose::from_rvec(DVec3::new(x[0], x[1], x[2]), DVec3::new(x[3], x[4], x[5]))
}

fn homography_to_params(h: &Homography) -> SVector<f64, 8> {
    let rows = h.to_rows();
    SVector::<f64, 8>::from_iterator(rows.iter().flatten().take(8).copied())
}

fn params_to_homography(x: &SVector<f64, 8>) -> Option<Homography> {
    Homography::from_rows([[x[0], x[1], x[2]], [x[3], x[4], x[5]], [x[6], x[7], 1.0]])
}

/// Write per-axis residuals of predicted vs observed pixels; infinity if any is missing.
fn write_residuals(
    predicted: impl Iterator<Item = Option<DVec2>>,
    observed: &[DVec2],
    out: &mut [f64],
) -> f64 {
    let mut sum_sq = 0.0;
    for (i, (p, o)) in predicted.zip(observed.iter()).enumerate() {
        let Some(p) = p else {
            out[2 * i] = 0.0;
            out[2 * i + 1] = 0.0;
            return f64::INFINITY;
        };
        let d = p - *o;
        out[2 * i] = d.x;
        out[2 * i + 1] = d.y;
        sum_sq += d.length_squared();
    }
    if sum_sq.is_finite() {
        sum_sq
    } else {
        f64::INFINITY
    }
}

/// Refine a transform with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// Only the pairs of `set` not flagged as outliers are used. Poses are optimized over a
/// rotation vector and a translation (6 parameters), homographies over 8 entries with
/// `H[2][2]` fixed to 1. On success `transform` is replaced by the refined model, whose
/// total squared error never exceeds the initial one; on error it is left untouched.
///
/// # Errors
///
/// [`RefineError::InsufficientInliers`] below `params.min_inliers` pairs and
/// [`RefineError::NonFinite`] when the model cannot project the inliers.
pub fn refine(
    transform: &mut Transform,
    set: &CorrespondenceSet,
    intrinsics: &CameraIntrinsics,
    params: &RefineParams,
) -> Result<RefineSummary, RefineError> {
    let (world, image): (Vec<DVec3>, Vec<DVec2>) = set
        .iter()
        .filter(|(_, _, outlier)| !outlier)
        .map(|(r, s, _)| (r.world, s.image))
        .unzip();

    let n = world.len();
    if n < params.min_inliers.max(1) {
        return Err(RefineError::InsufficientInliers {
            required: params.min_inliers,
            actual: n,
        });
    }

    const H_ROT: f64 = 1e-6;

    let (refined, summary) = match transform {
        Transform::Pose(pose) => {
            let outcome = levenberg_marquardt(
                pose_to_params(pose),
                2 * n,
                |x, out| {
                    let pose = params_to_pose(x);
                    let predicted = world.iter().map(|&w| pose.project(w, intrinsics));
                    write_residuals(predicted, &image, out)
                },
                |k, x| {
                    if k < 3 {
                        H_ROT
                    } else {
                        1e-6 * x[k].abs().max(1.0)
                    }
                },
                params,
            );
            (Transform::Pose(params_to_pose(&outcome.x)), outcome_summary(&outcome, n))
        }
        Transform::Homography(h) => {
            let outcome = levenberg_marquardt(
                homography_to_params(h),
                2 * n,
                |x, out| match params_to_homography(x) {
                    Some(h) => {
                        let predicted = world.iter().map(|w| h.apply(w.truncate()));
                        write_residuals(predicted, &image, out)
                    }
                    None => f64::INFINITY,
                },
                |k, x| 1e-6 * x[k].abs().max(1e-3),
                params,
            );
            let h = params_to_homography(&outcome.x).ok_or(RefineError::NonFinite)?;
            (Transform::Homography(h), outcome_summary(&outcome, n))
        }
    };

    let summary = summary?;
    *transform = refined;
    log::trace!(
        "refined {:?}: rmse {:.4} -> {:.4} in {} iterations",
        transform.kind(),
        summary.initial_rmse,
        summary.final_rmse,
        summary.iterations
    );
    Ok(summary)
}

fn outcome_summary<const N: usize>(
    outcome: &LmOutcome<N>,
    n: usize,
) -> Result<RefineSummary, RefineError> {
    if !outcome.initial_cost.is_finite()
        || !outcome.final_cost.is_finite()
        || outcome.x.iter().any(|v| !v.is_finite())
    {
        return Err(RefineError::NonFinite);
    }
    Ok(RefineSummary {
        initial_rmse: (outcome.initial_cost / n as f64).sqrt(),
        final_rmse: (outcome.final_cost / n as f64).sqrt(),
        iterations: outcome.iterations,
        converged: outcome.converged,
    })
}
