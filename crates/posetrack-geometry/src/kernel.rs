use crate::camera::CameraIntrinsics;
use crate::correspondence::{CorrespondenceSet, ReferencePoint, ScenePoint};
use crate::epnp::{solve_epnp, EPnPParams};
use crate::homography::homography_dlt;
use crate::ops::has_collinear_triple;
use crate::planar::{is_coplanar, solve_planar_pose};
use crate::transform::{Homography, Pose, Transform};
use glam::{DVec2, DVec3};

/// Relative spread below which a point cloud is treated as planar.
const COPLANAR_RATIO: f64 = 1e-3;

/// A model family that can be fitted from a minimal sample and scored per correspondence.
///
/// The robust estimators are generic over this trait: they draw samples, call
/// [`ModelKernel::fit`] and count inliers with [`ModelKernel::residual`].
pub trait ModelKernel {
    /// Fitted model type.
    type Model: Copy + Into<Transform>;

    /// Number of correspondences in a minimal sample.
    const MIN_SAMPLES: usize;

    /// Fit a model from the pairs at `indices`. `None` if the fit is degenerate.
    fn fit(&self, set: &CorrespondenceSet, indices: &[usize]) -> Option<Self::Model>;

    /// Reprojection distance in pixels of one pair under `model`.
    fn residual(&self, model: &Self::Model, reference: &ReferencePoint, scene: &ScenePoint) -> f64;

    /// Whether a minimal sample cannot determine a model.
    fn is_degenerate(&self, _set: &CorrespondenceSet, _indices: &[usize]) -> bool {
        false
    }

    /// Inlier fraction above which sampling stops early.
    fn early_exit_ratio(&self) -> Option<f64> {
        None
    }
}

fn gather(set: &CorrespondenceSet, indices: &[usize]) -> (Vec<DVec3>, Vec<DVec2>) {
    indices
        .iter()
        .filter_map(|&i| Some((set.reference().get(i)?.world, set.scene().get(i)?.image)))
        .unzip()
}

/// Homography between the target plane and the image, fitted with the normalized DLT.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomographyKernel;

impl ModelKernel for HomographyKernel {
    type Model = Homography;
    const MIN_SAMPLES: usize = 4;

    fn fit(&self, set: &CorrespondenceSet, indices: &[usize]) -> Option<Homography> {
        let (world, image) = gather(set, indices);
        let plane: Vec<DVec2> = world.iter().map(|p| p.truncate()).collect();
        homography_dlt(&plane, &image).ok()
    }

    fn residual(&self, model: &Homography, reference: &ReferencePoint, scene: &ScenePoint) -> f64 {
        model
            .apply(reference.world.truncate())
            .map_or(f64::INFINITY, |p| p.distance(scene.image))
    }

    fn is_degenerate(&self, set: &CorrespondenceSet, indices: &[usize]) -> bool {
        let (world, image) = gather(set, indices);
        let plane: Vec<DVec2> = world.iter().map(|p| p.truncate()).collect();
        has_collinear_triple(&plane) || has_collinear_triple(&image)
    }
}

/// Camera pose from 2D-3D pairs, using EPnP or the planar solver for coplanar samples.
#[derive(Debug, Clone, Default)]
pub struct PoseKernel {
    /// Intrinsics of the observing camera.
    pub intrinsics: CameraIntrinsics,
    /// EPnP solver parameters.
    pub epnp: EPnPParams,
}

impl PoseKernel {
    /// Kernel for a camera with the given intrinsics.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            epnp: EPnPParams::default(),
        }
    }
}

impl ModelKernel for PoseKernel {
    type Model = Pose;
    const MIN_SAMPLES: usize = 5;

    fn fit(&self, set: &CorrespondenceSet, indices: &[usize]) -> Option<Pose> {
        let (world, image) = gather(set, indices);
        let pose = if is_coplanar(&world, COPLANAR_RATIO) {
            solve_planar_pose(&world, &image, &self.intrinsics).ok()?
        } else {
            solve_epnp(&world, &image, &self.intrinsics, &self.epnp)
                .ok()?
                .pose
        };
        (pose.rotation.is_finite() && pose.translation.is_finite()).then_some(pose)
    }

    fn residual(&self, model: &Pose, reference: &ReferencePoint, scene: &ScenePoint) -> f64 {
        model
            .project(reference.world, &self.intrinsics)
            .map_or(f64::INFINITY, |p| p.distance(scene.image))
    }

    fn is_degenerate(&self, set: &CorrespondenceSet, indices: &[usize]) -> bool {
        let (_, image) = gather(set, indices);
        has_collinear_triple(&image)
    }

    fn early_exit_ratio(&self) -> Option<f64> {
        Some(0.9)
    }
}
