#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # posetrack-geometry
//!
//! Geometric building blocks of the tracking pipeline: correspondence sets,
//! transforms, minimal solvers and the robust estimators built on top of them.
//!
//! ## Example: robust homography
//!
//! ```rust
//! use glam::{DVec2, DVec3};
//! use posetrack_geometry::{
//!     estimate, CameraIntrinsics, CorrespondenceSet, EstimationMethod, EstimatorParams,
//!     ReferencePoint, ScenePoint,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut set = CorrespondenceSet::new();
//! for i in 0..20 {
//!     let (x, y) = ((i % 5) as f64 * 10.0, (i / 5) as f64 * 10.0);
//!     set.push(
//!         ReferencePoint::new(DVec3::new(x, y, 0.0), i),
//!         ScenePoint::new(DVec2::new(2.0 * x + 5.0, 2.0 * y - 3.0), 0.0),
//!     );
//! }
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let summary = estimate(
//!     &mut set,
//!     EstimationMethod::Ransac,
//!     &CameraIntrinsics::default(),
//!     &EstimatorParams::default(),
//!     &mut rng,
//! )?;
//! assert_eq!(summary.inliers, 20);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Pinhole camera intrinsics.
pub mod camera;

/// Paired reference/scene points with per-pair outlier flags.
pub mod correspondence;

/// Efficient Perspective-n-Point (EPnP) solver.
pub mod epnp;

/// Robust estimators: RANSAC, ProSAC, LMedS and EPnP + RANSAC.
pub mod estimator;

/// Homography estimation with the normalized DLT.
pub mod homography;

/// Minimal-sample model kernels plugged into the robust estimators.
pub mod kernel;

/// Reprojection-error based inlier/outlier classification.
pub mod outlier;

/// Pose recovery for coplanar points.
pub mod planar;

/// Levenberg–Marquardt refinement of homographies and poses.
pub mod refine;

/// Rotation group SO(3) with exponential and logarithm maps.
pub mod so3;

/// Homography and rigid pose transforms.
pub mod transform;

mod ops;

pub use camera::CameraIntrinsics;
pub use correspondence::{CorrespondenceSet, ReferencePoint, ScenePoint};
pub use epnp::{solve_epnp, EPnPParams, PnPError};
pub use estimator::{
    estimate, lmeds, prosac, ransac, EstimateError, EstimateSummary, EstimationMethod,
    EstimatorParams,
};
pub use homography::{homography_dlt, HomographyError};
pub use kernel::{HomographyKernel, ModelKernel, PoseKernel};
pub use outlier::{classify, reprojection_errors, total_squared_error};
pub use planar::{pose_from_homography, solve_planar_pose};
pub use refine::{refine, RefineError, RefineParams, RefineSummary};
pub use so3::SO3;
pub use transform::{Homography, Pose, Transform, TransformKind};
