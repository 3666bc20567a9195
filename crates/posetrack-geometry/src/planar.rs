use crate::camera::CameraIntrinsics;
use crate::epnp::PnPError;
use crate::homography::homography_dlt;
use crate::ops::{centroid, covariance, nearest_rotation, sorted_eigen3};
use crate::transform::{Homography, Pose};
use glam::{DMat3, DVec2, DVec3};

/// Whether the points lie (nearly) on a common plane.
///
/// Compares the smallest principal spread of the cloud with the largest one.
pub fn is_coplanar(points: &[DVec3], ratio: f64) -> bool {
    if points.len() < 4 {
        return true;
    }
    let axes = sorted_eigen3(&covariance(points, centroid(points)));
    let largest = axes[0].0.max(0.0).sqrt();
    let smallest = axes[2].0.max(0.0).sqrt();
    smallest <= ratio * largest
}

/// Decompose a plane-induced homography into the pose of the `Z = 0` plane.
///
/// `h` maps plane coordinates `(X, Y)` to pixels of a camera with the given intrinsics.
/// The sign is chosen so the plane lies in front of the camera, and the rotation is
/// projected onto SO(3).
pub fn pose_from_homography(h: &Homography, intrinsics: &CameraIntrinsics) -> Option<Pose> {
    let a = intrinsics.inverse_matrix() * h.matrix();
    let (a1, a2, a3) = (a.x_axis, a.y_axis, a.z_axis);

    let norm = (a1.length() * a2.length()).sqrt();
    if !(norm > f64::EPSILON) {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if a3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * a1;
    let r2 = lambda * a2;
    let translation = lambda * a3;
    let rotation = nearest_rotation(&DMat3::from_cols(r1, r2, r1.cross(r2)))?;

    translation
        .is_finite()
        .then_some(Pose::new(rotation, translation))
}

/// Pose of a camera observing coplanar world points.
///
/// The points are expressed in their own plane frame, the plane-to-image homography is
/// estimated in normalized camera coordinates and decomposed, and the result is mapped
/// back to the world frame.
///
/// # Errors
///
/// Needs at least four points that span a plane.
pub fn solve_planar_pose(
    points_world: &[DVec3],
    points_image: &[DVec2],
    intrinsics: &CameraIntrinsics,
) -> Result<Pose, PnPError> {
    let n = points_world.len();
    if n != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths(n, points_image.len()));
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let c = centroid(points_world);
    let axes = sorted_eigen3(&covariance(points_world, c));
    let e1 = axes[0].1;
    let e2 = axes[1].1;
    let normal = e1.cross(e2);
    // world -> plane frame is basis^T * (p - c)
    let basis = DMat3::from_cols(e1, e2, normal);

    let plane: Vec<DVec2> = points_world
        .iter()
        .map(|&p| {
            let d = p - c;
            DVec2::new(d.dot(e1), d.dot(e2))
        })
        .collect();
    let normalized: Vec<DVec2> = points_image
        .iter()
        .map(|&uv| intrinsics.unproject(uv).truncate())
        .collect();

    let h = homography_dlt(&plane, &normalized)
        .map_err(|e| PnPError::DegenerateConfiguration(e.to_string()))?;
    let plane_pose = pose_from_homography(&h, &CameraIntrinsics::default())
        .ok_or(PnPError::NoSolution)?;

    let rotation = plane_pose.rotation * basis.transpose();
    let translation = plane_pose.translation - rotation * c;
    Ok(Pose::new(rotation, translation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::so3::SO3;
    use approx::assert_relative_eq;

    fn camera() -> CameraIntrinsics {
        CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0)
    }

    fn assert_pose_eq(a: &Pose, b: &Pose, eps: f64) {
        let dr = SO3::from_matrix(&(a.rotation * b.rotation.transpose())).log();
        assert!(dr.length() < eps, "rotation differs by {}", dr.length());
        assert!(a.translation.distance(b.translation) < eps);
    }

    #[test]
    fn decompose_plane_homography() {
        let k = camera();
        let pose = Pose::from_rvec(DVec3::new(0.3, -0.2, 0.1), DVec3::new(0.05, 0.1, 1.5));
        let h = pose.plane_homography(&k).unwrap();
        let back = pose_from_homography(&h, &k).unwrap();
        assert_pose_eq(&back, &pose, 1e-9);
    }

    #[test]
    fn decompose_negative_scale() {
        let k = camera();
        let pose = Pose::from_rvec(DVec3::new(-0.1, 0.4, 0.0), DVec3::new(0.0, 0.0, 2.0));
        let h = pose.plane_homography(&k).unwrap();
        // same projective map, entries scaled by -1 before normalization
        let flipped = Homography::new(h.matrix() * -3.0).unwrap();
        let back = pose_from_homography(&flipped, &k).unwrap();
        assert_pose_eq(&back, &pose, 1e-9);
        assert!(back.translation.z > 0.0);
    }

    #[test]
    fn planar_pose_tilted_plane() -> Result<(), PnPError> {
        let k = camera();
        let pose = Pose::from_rvec(DVec3::new(0.2, 0.1, -0.3), DVec3::new(-0.1, 0.05, 2.5));
        // points on a plane that is not Z = 0
        let tilt = SO3::exp(DVec3::new(0.4, 0.0, 0.2));
        let world: Vec<DVec3> = (0..9)
            .map(|i| {
                let p = DVec3::new((i % 3) as f64 * 0.2 - 0.2, (i / 3) as f64 * 0.15 - 0.15, 0.0);
                tilt.transform_point(p) + DVec3::new(0.1, 0.0, 0.3)
            })
            .collect();
        let image: Vec<DVec2> = world.iter().filter_map(|&p| pose.project(p, &k)).collect();

        assert!(is_coplanar(&world, 1e-6));
        let est = solve_planar_pose(&world, &image, &k)?;
        assert_pose_eq(&est, &pose, 1e-6);
        for (&w, &uv) in world.iter().zip(image.iter()) {
            let p = est.project(w, &k).unwrap();
            assert_relative_eq!(p.x, uv.x, epsilon = 1e-6);
            assert_relative_eq!(p.y, uv.y, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn coplanarity() {
        let cube: Vec<DVec3> = (0..8)
            .map(|i| DVec3::new((i & 1) as f64, ((i >> 1) & 1) as f64, ((i >> 2) & 1) as f64))
            .collect();
        assert!(!is_coplanar(&cube, 1e-6));
    }
}
