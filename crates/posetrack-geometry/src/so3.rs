use glam::{DMat3, DQuat, DVec3};
use std::ops::Mul;

const SMALL_ANGLE: f64 = 1e-10;

/// 3D rotation stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    /// Unit quaternion.
    pub q: DQuat,
}

impl SO3 {
    /// Identity rotation.
    pub const IDENTITY: Self = Self { q: DQuat::IDENTITY };

    /// Create a rotation from a quaternion, normalizing it.
    pub fn from_quaternion(quat: &DQuat) -> Self {
        Self {
            q: quat.normalize(),
        }
    }

    /// Create a rotation from a rotation matrix.
    ///
    /// The matrix is expected to be orthonormal with determinant +1.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// Rotation matrix of this rotation.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// Inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Lie algebra -> Lie group (Rodrigues axis-angle vector to rotation).
    pub fn exp(v: DVec3) -> Self {
        let theta = v.length();
        let theta_half = 0.5 * theta;

        let (w, b) = if theta > SMALL_ANGLE {
            (theta_half.cos(), theta_half.sin() / theta)
        } else {
            // first order expansion of sin(theta/2)/theta
            (1.0, 0.5)
        };
        let xyz = b * v;

        Self {
            q: DQuat::from_xyzw(xyz.x, xyz.y, xyz.z, w).normalize(),
        }
    }

    /// Lie group -> Lie algebra (rotation to Rodrigues axis-angle vector).
    pub fn log(&self) -> DVec3 {
        // keep the rotation angle in [0, pi]
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let vec = DVec3::new(q.x, q.y, q.z);
        let sin_half = vec.length();

        if sin_half > SMALL_ANGLE {
            let theta = 2.0 * sin_half.atan2(q.w);
            vec * (theta / sin_half)
        } else {
            vec * (2.0 / q.w)
        }
    }

    /// Vector space -> Lie algebra.
    pub fn hat(v: DVec3) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(0.0, v.z, -v.y),
            DVec3::new(-v.z, 0.0, v.x),
            DVec3::new(v.y, -v.x, 0.0),
        )
    }

    /// Lie algebra -> vector space.
    pub fn vee(omega: DMat3) -> DVec3 {
        DVec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }

    /// Rotate a point.
    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.q * p
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: Self) -> Self::Output {
        SO3 {
            q: (self.q * rhs.q).normalize(),
        }
    }
}
