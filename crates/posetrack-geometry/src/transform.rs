use crate::camera::CameraIntrinsics;
use crate::so3::SO3;
use glam::{DMat3, DVec2, DVec3};

/// Smallest magnitude accepted for a homogeneous scale before division.
const HOMOGENEOUS_EPS: f64 = 1e-12;

/// Planar homography mapping target-plane world `(X, Y)` to scene pixels.
///
/// The matrix is always normalized so the bottom-right entry is 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(DMat3);

impl Homography {
    /// Identity homography.
    pub const IDENTITY: Self = Self(DMat3::IDENTITY);

    /// Normalize `m` so that `m[2][2] == 1`.
    ///
    /// Returns `None` when the matrix is non-finite, singular, or its bottom-right
    /// entry vanishes.
    pub fn new(m: DMat3) -> Option<Self> {
        let h22 = m.z_axis.z;
        if !h22.is_finite() || h22.abs() < HOMOGENEOUS_EPS {
            return None;
        }
        let h = m * (1.0 / h22);
        if !h.is_finite() || h.determinant().abs() < HOMOGENEOUS_EPS {
            return None;
        }
        Some(Self(h))
    }

    /// Build a homography from its entries in row-major order.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Option<Self> {
        Self::new(DMat3::from_cols_array_2d(&rows).transpose())
    }

    /// The 3x3 matrix.
    pub fn matrix(&self) -> DMat3 {
        self.0
    }

    /// Entries in row-major order.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        self.0.transpose().to_cols_array_2d()
    }

    /// Map a plane point. `None` if it maps to infinity.
    pub fn apply(&self, p: DVec2) -> Option<DVec2> {
        let q = self.0 * p.extend(1.0);
        if q.z.abs() < HOMOGENEOUS_EPS {
            return None;
        }
        let out = DVec2::new(q.x / q.z, q.y / q.z);
        out.is_finite().then_some(out)
    }

    /// Inverse homography.
    pub fn inverse(&self) -> Option<Self> {
        Self::new(self.0.inverse())
    }

    /// Frobenius norm of the difference between two homographies.
    pub fn frobenius_distance(&self, other: &Self) -> f64 {
        (self.0 - other.0)
            .to_cols_array()
            .iter()
            .map(|d| d * d)
            .sum::<f64>()
            .sqrt()
    }
}

/// Rigid transform from the world frame to the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Rotation world -> camera.
    pub rotation: DMat3,
    /// Translation world -> camera.
    pub translation: DVec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    /// Identity pose.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a pose from rotation and translation.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a pose from a Rodrigues rotation vector and a translation.
    pub fn from_rvec(rvec: DVec3, translation: DVec3) -> Self {
        Self::new(SO3::exp(rvec).matrix(), translation)
    }

    /// Rodrigues rotation vector of the rotation.
    pub fn rvec(&self) -> DVec3 {
        SO3::from_matrix(&self.rotation).log()
    }

    /// Transform a world point into the camera frame.
    pub fn transform_point(&self, pw: DVec3) -> DVec3 {
        self.rotation * pw + self.translation
    }

    /// Camera -> world transform.
    pub fn inverse(&self) -> Self {
        let rt = self.rotation.transpose();
        Self::new(rt, -(rt * self.translation))
    }

    /// Position of the camera centre in world coordinates.
    pub fn camera_center(&self) -> DVec3 {
        -(self.rotation.transpose() * self.translation)
    }

    /// Project a world point to pixels. `None` if it lies behind the camera.
    pub fn project(&self, pw: DVec3, intrinsics: &CameraIntrinsics) -> Option<DVec2> {
        intrinsics.project(self.transform_point(pw))
    }

    /// Homography induced by the `Z = 0` world plane.
    pub fn plane_homography(&self, intrinsics: &CameraIntrinsics) -> Option<Homography> {
        let m = intrinsics.matrix()
            * DMat3::from_cols(self.rotation.x_axis, self.rotation.y_axis, self.translation);
        Homography::new(m)
    }
}

/// Which kind of model a [`Transform`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// 3x3 planar homography.
    Homography,
    /// Rotation and translation.
    Pose,
}

/// Geometric model relating reference points to scene points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// Planar homography, world `(X, Y)` to pixels.
    Homography(Homography),
    /// Rigid world -> camera pose, projected through the camera intrinsics.
    Pose(Pose),
}

impl Transform {
    /// Kind of the underlying model.
    pub fn kind(&self) -> TransformKind {
        match self {
            Transform::Homography(_) => TransformKind::Homography,
            Transform::Pose(_) => TransformKind::Pose,
        }
    }

    /// Project a world point to pixels.
    ///
    /// The homography variant uses only `X, Y` and ignores the intrinsics.
    pub fn project(&self, world: DVec3, intrinsics: &CameraIntrinsics) -> Option<DVec2> {
        match self {
            Transform::Homography(h) => h.apply(world.truncate()),
            Transform::Pose(p) => p.project(world, intrinsics),
        }
    }

    /// Pixel distance between the projection of `world` and `image`.
    ///
    /// Infinite when the point cannot be projected.
    pub fn reprojection_error(
        &self,
        world: DVec3,
        image: DVec2,
        intrinsics: &CameraIntrinsics,
    ) -> f64 {
        match self.project(world, intrinsics) {
            Some(p) => p.distance(image),
            None => f64::INFINITY,
        }
    }

    /// The homography, if this is one.
    pub fn as_homography(&self) -> Option<&Homography> {
        match self {
            Transform::Homography(h) => Some(h),
            Transform::Pose(_) => None,
        }
    }

    /// The pose, if this is one.
    pub fn as_pose(&self) -> Option<&Pose> {
        match self {
            Transform::Pose(p) => Some(p),
            Transform::Homography(_) => None,
        }
    }
}

impl From<Homography> for Transform {
    fn from(h: Homography) -> Self {
        Transform::Homography(h)
    }
}

impl From<Pose> for Transform {
    fn from(p: Pose) -> Self {
        Transform::Pose(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn homography_normalized() {
        let h = Homography::from_rows([[2.0, 0.0, 4.0], [0.0, 2.0, 6.0], [0.0, 0.0, 2.0]]).unwrap();
        assert_eq!(h.to_rows(), [[1.0, 0.0, 2.0], [0.0, 1.0, 3.0], [0.0, 0.0, 1.0]]);
        let p = h.apply(DVec2::new(1.0, 1.0)).unwrap();
        assert_eq!(p, DVec2::new(3.0, 4.0));
    }

    #[test]
    fn homography_rejects_degenerate() {
        assert!(Homography::new(DMat3::ZERO).is_none());
        assert!(Homography::from_rows([[1.0, 2.0, 0.0], [2.0, 4.0, 0.0], [0.0, 0.0, 1.0]]).is_none());
        assert!(Homography::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, f64::NAN]]).is_none());
    }

    #[test]
    fn homography_inverse() {
        let h = Homography::from_rows([[1.1, 0.1, 5.0], [-0.2, 0.9, 3.0], [1e-4, 2e-4, 1.0]]).unwrap();
        let inv = h.inverse().unwrap();
        let p = DVec2::new(12.0, -7.0);
        let back = inv.apply(h.apply(p).unwrap()).unwrap();
        assert_relative_eq!(back.x, p.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-9);
    }

    #[test]
    fn pose_projection_matches_plane_homography() {
        let k = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0);
        let pose = Pose::from_rvec(DVec3::new(0.1, -0.2, 0.05), DVec3::new(0.05, -0.02, 2.0));
        let h = pose.plane_homography(&k).unwrap();
        let world = DVec3::new(0.3, -0.1, 0.0);

        let via_pose = Transform::from(pose).project(world, &k).unwrap();
        let via_h = Transform::from(h).project(world, &k).unwrap();
        assert_relative_eq!(via_pose.x, via_h.x, epsilon = 1e-9);
        assert_relative_eq!(via_pose.y, via_h.y, epsilon = 1e-9);
    }

    #[test]
    fn pose_inverse_and_center() {
        let pose = Pose::from_rvec(DVec3::new(0.3, 0.1, -0.4), DVec3::new(1.0, 2.0, 3.0));
        let p = DVec3::new(0.5, -0.5, 0.25);
        let back = pose.inverse().transform_point(pose.transform_point(p));
        assert_relative_eq!(back.x, p.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-12);
        assert_relative_eq!(back.z, p.z, epsilon = 1e-12);
        let c = pose.transform_point(pose.camera_center());
        assert!(c.length() < 1e-12);
    }

    #[test]
    fn reprojection_error_behind_camera() {
        let k = CameraIntrinsics::default();
        let t = Transform::from(Pose::IDENTITY);
        let err = t.reprojection_error(DVec3::new(0.0, 0.0, -1.0), DVec2::ZERO, &k);
        assert!(err.is_infinite());
        assert_eq!(t.kind(), TransformKind::Pose);
    }
}
