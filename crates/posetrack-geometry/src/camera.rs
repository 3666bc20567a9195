use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest camera-frame depth considered in front of the camera.
pub const MIN_DEPTH: f64 = 1e-9;

/// Error types for camera operations.
#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    /// Invalid camera intrinsics matrix
    #[error("Invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),
}

/// Represents the intrinsic parameters of a pinhole camera.
///
/// The default value is the identity camera (unit focal length, principal point at the
/// origin), which turns projections into normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Create camera intrinsics from a 3x3 intrinsics matrix.
    ///
    /// # Errors
    ///
    /// The matrix must have the form `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]` with non-zero
    /// focal lengths.
    pub fn from_matrix(k: &DMat3) -> Result<Self, CameraError> {
        let rows = k.transpose().to_cols_array_2d();
        if rows[0][1] != 0.0
            || rows[1][0] != 0.0
            || rows[2][0] != 0.0
            || rows[2][1] != 0.0
            || rows[2][2] != 1.0
        {
            return Err(CameraError::InvalidIntrinsics(
                "matrix must have form [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]".to_string(),
            ));
        }
        let intrinsics = Self::new(rows[0][0], rows[1][1], rows[0][2], rows[1][2]);
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Check that the focal lengths are finite and non-zero.
    pub fn validate(&self) -> Result<(), CameraError> {
        let values = [self.fx, self.fy, self.cx, self.cy];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::InvalidIntrinsics(format!(
                "non-finite value in {self:?}"
            )));
        }
        if self.fx == 0.0 || self.fy == 0.0 {
            return Err(CameraError::InvalidIntrinsics(
                "focal lengths must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert to 3x3 intrinsics matrix.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }

    /// Inverse of the intrinsics matrix.
    pub fn inverse_matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(1.0 / self.fx, 0.0, 0.0),
            DVec3::new(0.0, 1.0 / self.fy, 0.0),
            DVec3::new(-self.cx / self.fx, -self.cy / self.fy, 1.0),
        )
    }

    /// Project a camera-frame point to pixels. `None` if the point is not in front of
    /// the camera.
    pub fn project(&self, pc: DVec3) -> Option<DVec2> {
        if !(pc.z > MIN_DEPTH) {
            return None;
        }
        let inv_z = 1.0 / pc.z;
        Some(DVec2::new(
            self.fx * pc.x * inv_z + self.cx,
            self.fy * pc.y * inv_z + self.cy,
        ))
    }

    /// Back-project a pixel to a viewing ray on the `z = 1` plane.
    pub fn unproject(&self, px: DVec2) -> DVec3 {
        DVec3::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy, 1.0)
    }
}
