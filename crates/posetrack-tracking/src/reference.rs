use glam::{DVec2, DVec3};
use posetrack_geometry::{CameraIntrinsics, Pose};
use posetrack_image::{scale_pyramid, ImageSize, ImageView};
use serde::{Deserialize, Serialize};

use crate::collaborators::FeatureSource;
use crate::error::TrackingError;
use crate::feature::FeaturePoint;

/// Camera intrinsics with the current extrinsic pose relative to a target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraParameter {
    /// Pinhole intrinsics.
    pub intrinsics: CameraIntrinsics,
    /// World (target) to camera pose, updated by the tracking session.
    pub pose: Pose,
}

/// Physical size and pyramid used to register a reference target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registration {
    /// Width of the target in world units.
    pub physical_width: f64,
    /// Height of the target in world units.
    pub physical_height: f64,
    /// Downscale factor between pyramid levels, in `(0, 1]`.
    pub scale_factor: f64,
    /// Number of pyramid levels the detector runs on.
    pub scale_steps: usize,
    /// Detector threshold used on the reference image.
    pub threshold: f64,
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            physical_width: 1.0,
            physical_height: 1.0,
            scale_factor: std::f64::consts::FRAC_1_SQRT_2,
            scale_steps: 3,
            threshold: 20.0,
        }
    }
}

/// A registered target: an immutable feature repository with world positions.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTarget {
    id: u32,
    features: Vec<FeaturePoint>,
    physical_size: DVec2,
    camera: CameraParameter,
}

impl ReferenceTarget {
    /// Build a target from features that already carry world positions.
    ///
    /// Repository indices are reassigned to the position in `features` and features
    /// without a world position are dropped.
    pub fn from_features(
        id: u32,
        features: Vec<FeaturePoint>,
        physical_size: DVec2,
        intrinsics: CameraIntrinsics,
    ) -> Result<Self, TrackingError> {
        if !(physical_size.x > 0.0 && physical_size.y > 0.0) {
            return Err(TrackingError::InvalidPhysicalSize(
                physical_size.x,
                physical_size.y,
            ));
        }
        let features: Vec<FeaturePoint> = features
            .into_iter()
            .filter(|f| f.world.is_some())
            .enumerate()
            .map(|(index, mut f)| {
                f.index = index;
                f.object_id = id;
                f
            })
            .collect();
        if features.is_empty() {
            return Err(TrackingError::EmptyReference);
        }
        Ok(Self {
            id,
            features,
            physical_size,
            camera: CameraParameter {
                intrinsics,
                pose: Pose::IDENTITY,
            },
        })
    }

    /// Target id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Reference features, indexed by repository index.
    pub fn features(&self) -> &[FeaturePoint] {
        &self.features
    }

    /// Number of reference features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the target has no features.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Physical width and height in world units.
    pub fn physical_size(&self) -> DVec2 {
        self.physical_size
    }

    /// Camera parameters relative to this target.
    pub fn camera(&self) -> &CameraParameter {
        &self.camera
    }

    pub(crate) fn camera_mut(&mut self) -> &mut CameraParameter {
        &mut self.camera
    }
}

/// Map a full-resolution target pixel to the target plane.
///
/// The origin is at the target centre, X to the right and Y down.
pub fn pixel_to_world(pixel: DVec2, image_size: ImageSize, physical_size: DVec2) -> DVec3 {
    let w = image_size.width as f64;
    let h = image_size.height as f64;
    DVec3::new(
        (pixel.x - w / 2.0) * physical_size.x / w,
        (pixel.y - h / 2.0) * physical_size.y / h,
        0.0,
    )
}

/// Detect features on a pyramid of the target image and build a [`ReferenceTarget`].
///
/// Level `i` of the pyramid is downscaled by `scale_factor^i`. Detections are mapped
/// back to full resolution, then onto the target plane.
///
/// # Errors
///
/// Invalid scale factor or physical size, or no detection on any level.
pub fn register_reference(
    id: u32,
    image: &ImageView<'_>,
    registration: &Registration,
    detector: &dyn FeatureSource,
    intrinsics: CameraIntrinsics,
) -> Result<ReferenceTarget, TrackingError> {
    let physical_size = DVec2::new(registration.physical_width, registration.physical_height);
    if !(physical_size.x > 0.0 && physical_size.y > 0.0) {
        return Err(TrackingError::InvalidPhysicalSize(
            physical_size.x,
            physical_size.y,
        ));
    }

    let levels = scale_pyramid(image, registration.scale_factor, registration.scale_steps)?;
    let full_size = image.size();

    let mut features = Vec::new();
    for (level, (scale, level_image)) in levels.iter().enumerate() {
        let detections = detector.detect(&level_image.view(), registration.threshold);
        log::debug!(
            "target {id}: level {level} (scale {scale:.3}) gave {} features",
            detections.len()
        );
        for mut f in detections {
            f.position /= *scale;
            f.size /= *scale;
            f.world = Some(pixel_to_world(f.position, full_size, physical_size));
            features.push(f);
        }
    }

    let target = ReferenceTarget::from_features(id, features, physical_size, intrinsics)?;
    log::info!(
        "registered target {id} with {} features over {} levels",
        target.len(),
        levels.len()
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use posetrack_image::GrayImage;

    /// Reports one feature at the centre of whatever image it sees.
    struct CentreDetector;

    impl FeatureSource for CentreDetector {
        fn detect(&self, image: &ImageView<'_>, _threshold: f64) -> Vec<FeaturePoint> {
            let centre = DVec2::new(image.width() as f64 / 2.0, image.height() as f64 / 4.0);
            vec![FeaturePoint::new(centre, 2.0, 0.0, vec![1.0])]
        }
    }

    #[test]
    fn world_mapping() {
        let size = ImageSize {
            width: 200,
            height: 100,
        };
        let physical = DVec2::new(0.4, 0.2);
        assert_eq!(
            pixel_to_world(DVec2::new(100.0, 50.0), size, physical),
            DVec3::ZERO
        );
        let p = pixel_to_world(DVec2::new(200.0, 0.0), size, physical);
        assert_relative_eq!(p.x, 0.2);
        assert_relative_eq!(p.y, -0.1);
    }

    #[test]
    fn register_maps_levels_to_full_resolution() -> Result<(), TrackingError> {
        let image = GrayImage::from_size_val([64, 32].into(), 128)?;
        let registration = Registration {
            physical_width: 0.64,
            physical_height: 0.32,
            scale_factor: 0.5,
            scale_steps: 3,
            ..Default::default()
        };
        let target = register_reference(
            3,
            &image.view(),
            &registration,
            &CentreDetector,
            CameraIntrinsics::default(),
        )?;

        assert_eq!(target.len(), 3);
        for (i, f) in target.features().iter().enumerate() {
            assert_eq!(f.index, i);
            assert_eq!(f.object_id, 3);
            assert_relative_eq!(f.position.x, 32.0);
            assert_relative_eq!(f.position.y, 8.0);
            let world = f.world.unwrap_or_default();
            assert_relative_eq!(world.x, 0.0);
            assert_relative_eq!(world.y, -0.08);
        }
        assert_relative_eq!(target.features()[2].size, 8.0);
        Ok(())
    }

    #[test]
    fn register_rejects_bad_inputs() {
        let image = GrayImage::from_size_val([8, 8].into(), 0).unwrap();
        let bad_size = Registration {
            physical_width: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            register_reference(0, &image.view(), &bad_size, &CentreDetector, Default::default()),
            Err(TrackingError::InvalidPhysicalSize(..))
        ));

        let bad_scale = Registration {
            scale_factor: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            register_reference(0, &image.view(), &bad_scale, &CentreDetector, Default::default()),
            Err(TrackingError::Image(_))
        ));
    }
}
