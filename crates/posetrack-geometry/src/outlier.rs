use crate::camera::CameraIntrinsics;
use crate::correspondence::CorrespondenceSet;
use crate::transform::Transform;

/// Reprojection distance of every pair under `transform`, in pair order.
///
/// Pairs that cannot be projected (behind the camera, mapped to infinity) get
/// `f64::INFINITY`.
pub fn reprojection_errors(
    transform: &Transform,
    set: &CorrespondenceSet,
    intrinsics: &CameraIntrinsics,
) -> Vec<f64> {
    set.iter()
        .map(|(r, s, _)| transform.reprojection_error(r.world, s.image, intrinsics))
        .collect()
}

/// Sum of squared reprojection distances over the whole set.
pub fn total_squared_error(
    transform: &Transform,
    set: &CorrespondenceSet,
    intrinsics: &CameraIntrinsics,
) -> f64 {
    reprojection_errors(transform, set, intrinsics)
        .iter()
        .map(|e| e * e)
        .sum()
}

/// Reclassify every pair: inlier iff its reprojection distance is below `threshold`.
///
/// Overwrites all flags, so the result depends only on the inputs. Returns the number
/// of inliers.
///
/// # Example
///
/// ```
/// use glam::{DVec2, DVec3};
/// use posetrack_geometry::{
///     classify, CameraIntrinsics, CorrespondenceSet, Homography, ReferencePoint, ScenePoint,
///     Transform,
/// };
///
/// let mut set = CorrespondenceSet::new();
/// set.push(ReferencePoint::new(DVec3::new(1.0, 1.0, 0.0), 0), ScenePoint::new(DVec2::new(1.5, 1.0), 0.0));
/// set.push(ReferencePoint::new(DVec3::new(2.0, 2.0, 0.0), 1), ScenePoint::new(DVec2::new(9.0, 9.0), 0.0));
///
/// let t = Transform::from(Homography::IDENTITY);
/// let inliers = classify(&t, &mut set, &CameraIntrinsics::default(), 1.0);
///
/// assert_eq!(inliers, 1);
/// assert!(set.is_outlier(1));
/// ```
pub fn classify(
    transform: &Transform,
    set: &mut CorrespondenceSet,
    intrinsics: &CameraIntrinsics,
    threshold: f64,
) -> usize {
    let errors = reprojection_errors(transform, set, intrinsics);
    let mut inliers = 0;
    for (i, err) in errors.into_iter().enumerate() {
        let outlier = !(err < threshold);
        set.set_outlier(i, outlier);
        if !outlier {
            inliers += 1;
        }
    }
    inliers
}
