mod lmeds;
mod prosac;
mod ransac;

pub use lmeds::lmeds;
pub use prosac::prosac;
pub use ransac::ransac;

use crate::camera::CameraIntrinsics;
use crate::correspondence::CorrespondenceSet;
use crate::kernel::{HomographyKernel, ModelKernel, PoseKernel};
use crate::transform::{Transform, TransformKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error types for the robust estimators.
#[derive(Debug, Error, PartialEq)]
pub enum EstimateError {
    /// Fewer correspondences than the minimal sample; no sampling was attempted.
    #[error("Estimator requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimal sample size of the model.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// Every drawn sample was degenerate.
    #[error("No valid model could be fitted from the drawn samples")]
    NoValidModel,

    /// The method name is not recognized.
    #[error("Unknown estimation method: {0}")]
    UnknownMethod(String),
}

/// Robust estimation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Uniform random sampling, winner by inlier count.
    #[default]
    Ransac,
    /// Sampling biased towards low descriptor distance, winner by inlier count.
    Prosac,
    /// Uniform random sampling, winner by least median of squared residuals.
    Lmeds,
    /// RANSAC over EPnP poses.
    EpnpRansac,
}

impl EstimationMethod {
    /// All methods, in declaration order.
    pub const ALL: [EstimationMethod; 4] = [
        EstimationMethod::Ransac,
        EstimationMethod::Prosac,
        EstimationMethod::Lmeds,
        EstimationMethod::EpnpRansac,
    ];

    /// Kind of transform the method estimates.
    pub fn transform_kind(&self) -> TransformKind {
        match self {
            EstimationMethod::EpnpRansac => TransformKind::Pose,
            _ => TransformKind::Homography,
        }
    }

    /// Minimal sample size of the method.
    pub fn min_samples(&self) -> usize {
        match self.transform_kind() {
            TransformKind::Homography => HomographyKernel::MIN_SAMPLES,
            TransformKind::Pose => PoseKernel::MIN_SAMPLES,
        }
    }
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimationMethod::Ransac => "ransac",
            EstimationMethod::Prosac => "prosac",
            EstimationMethod::Lmeds => "lmeds",
            EstimationMethod::EpnpRansac => "epnp_ransac",
        };
        f.write_str(name)
    }
}

impl FromStr for EstimationMethod {
    type Err = EstimateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '+'], "_").as_str() {
            "ransac" => Ok(EstimationMethod::Ransac),
            "prosac" => Ok(EstimationMethod::Prosac),
            "lmeds" => Ok(EstimationMethod::Lmeds),
            "epnp_ransac" | "epnp" => Ok(EstimationMethod::EpnpRansac),
            _ => Err(EstimateError::UnknownMethod(s.to_string())),
        }
    }
}

/// Parameters shared by all robust estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Inlier threshold on the reprojection distance, in pixels.
    pub reprojection_error: f64,
    /// Upper bound on the number of sampling iterations.
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample.
    pub confidence: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            reprojection_error: 2.0,
            max_iterations: 300,
            confidence: 0.99,
        }
    }
}

/// Outcome of a successful robust estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateSummary<M> {
    /// Winning model, after the refit when it was applied.
    pub model: M,
    /// Number of pairs classified as inliers under `model`.
    pub inliers: usize,
    /// Sampling iterations performed, degenerate samples included.
    pub iterations: usize,
    /// Whether the refit on all inliers replaced the sampled model.
    pub refit: bool,
}

impl<M: Into<Transform>> EstimateSummary<M> {
    /// Erase the model type.
    pub fn into_transform(self) -> EstimateSummary<Transform> {
        EstimateSummary {
            model: self.model.into(),
            inliers: self.inliers,
            iterations: self.iterations,
            refit: self.refit,
        }
    }
}

/// Estimate a transform from `set` with the selected method.
///
/// RANSAC, ProSAC and LMedS estimate a homography; EPnP + RANSAC estimates a pose using
/// `intrinsics`. On success the outlier flags of `set` reflect the returned model.
///
/// # Errors
///
/// [`EstimateError::InsufficientCorrespondences`] before any sampling when the set is
/// smaller than the minimal sample, [`EstimateError::NoValidModel`] when no sample could
/// be fitted. The set is left untouched on error.
pub fn estimate<R: Rng + ?Sized>(
    set: &mut CorrespondenceSet,
    method: EstimationMethod,
    intrinsics: &CameraIntrinsics,
    params: &EstimatorParams,
    rng: &mut R,
) -> Result<EstimateSummary<Transform>, EstimateError> {
    let summary = match method {
        EstimationMethod::Ransac => ransac(&HomographyKernel, set, params, rng)?.into_transform(),
        EstimationMethod::Prosac => prosac(&HomographyKernel, set, params, rng)?.into_transform(),
        EstimationMethod::Lmeds => lmeds(&HomographyKernel, set, params, rng)?.into_transform(),
        EstimationMethod::EpnpRansac => {
            ransac(&PoseKernel::new(*intrinsics), set, params, rng)?.into_transform()
        }
    };
    log::debug!(
        "{method}: {}/{} inliers after {} iterations (refit: {})",
        summary.inliers,
        set.len(),
        summary.iterations,
        summary.refit
    );
    Ok(summary)
}

pub(crate) fn check_sample_size<K: ModelKernel>(set: &CorrespondenceSet) -> Result<(), EstimateError> {
    if set.len() < K::MIN_SAMPLES {
        return Err(EstimateError::InsufficientCorrespondences {
            required: K::MIN_SAMPLES,
            actual: set.len(),
        });
    }
    Ok(())
}

/// Iterations needed to draw an all-inlier sample with probability `confidence`.
pub(crate) fn adaptive_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    max_iterations: usize,
) -> usize {
    if !(confidence > 0.0 && confidence < 1.0) || inlier_ratio <= 0.0 {
        return max_iterations;
    }
    if inlier_ratio >= 1.0 {
        return 1.min(max_iterations);
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iterations;
    }
    let n = ((1.0 - confidence).ln() / denom).ceil();
    if n.is_finite() && n >= 0.0 {
        (n as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

pub(crate) fn count_inliers<K: ModelKernel>(
    kernel: &K,
    set: &CorrespondenceSet,
    model: &K::Model,
    threshold: f64,
) -> usize {
    set.iter()
        .filter(|(r, s, _)| kernel.residual(model, r, s) < threshold)
        .count()
}

fn inlier_indices<K: ModelKernel>(
    kernel: &K,
    set: &CorrespondenceSet,
    model: &K::Model,
    threshold: f64,
) -> Vec<usize> {
    set.iter()
        .enumerate()
        .filter_map(|(i, (r, s, _))| (kernel.residual(model, r, s) < threshold).then_some(i))
        .collect()
}

/// Refit the winner once on all of its inliers and write the outlier flags.
///
/// The refit replaces the sampled model unless it explains fewer pairs.
pub(crate) fn finalize<K: ModelKernel>(
    kernel: &K,
    set: &mut CorrespondenceSet,
    model: K::Model,
    threshold: f64,
    iterations: usize,
) -> EstimateSummary<K::Model> {
    let inliers = inlier_indices(kernel, set, &model, threshold);
    let mut summary = EstimateSummary {
        model,
        inliers: inliers.len(),
        iterations,
        refit: false,
    };

    if inliers.len() >= K::MIN_SAMPLES {
        if let Some(refit) = kernel.fit(set, &inliers) {
            let count = count_inliers(kernel, set, &refit, threshold);
            if count >= summary.inliers {
                summary.model = refit;
                summary.inliers = count;
                summary.refit = true;
            }
        }
    }

    for i in 0..set.len() {
        let outlier = !(kernel.residual(&summary.model, &set.reference()[i], &set.scene()[i])
            < threshold);
        set.set_outlier(i, outlier);
    }

    summary
}
