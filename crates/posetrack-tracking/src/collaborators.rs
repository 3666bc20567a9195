use std::sync::Arc;

use glam::DVec2;
use posetrack_image::ImageView;

use crate::feature::{FeatureMatch, FeaturePoint};

/// Detects and describes feature points on a grayscale image.
pub trait FeatureSource: Send + Sync {
    /// Detect features whose response is at least `threshold`.
    ///
    /// A higher threshold yields fewer features.
    fn detect(&self, image: &ImageView<'_>, threshold: f64) -> Vec<FeaturePoint>;
}

/// Matches scene descriptors against reference descriptors.
pub trait DescriptorMatcher: Send + Sync {
    /// Return the accepted matches, at most one per reference feature.
    fn match_features(&self, reference: &[FeaturePoint], scene: &[FeaturePoint])
        -> Vec<FeatureMatch>;
}

/// Result of tracking one point between two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowPoint {
    /// Position in the current frame.
    pub position: DVec2,
    /// Whether the point was found.
    pub found: bool,
}

impl FlowPoint {
    /// A point that was tracked to `position`.
    pub fn found(position: DVec2) -> Self {
        Self {
            position,
            found: true,
        }
    }

    /// A point that was lost.
    pub fn lost(position: DVec2) -> Self {
        Self {
            position,
            found: false,
        }
    }
}

/// Sparse optical flow between two frames.
pub trait OpticalFlow: Send + Sync {
    /// Track `points` from `previous` to `current`.
    ///
    /// Returns one [`FlowPoint`] per input point, in input order.
    fn track(
        &self,
        previous: &ImageView<'_>,
        current: &ImageView<'_>,
        points: &[DVec2],
    ) -> Vec<FlowPoint>;
}

impl<T: FeatureSource + ?Sized> FeatureSource for Arc<T> {
    fn detect(&self, image: &ImageView<'_>, threshold: f64) -> Vec<FeaturePoint> {
        (**self).detect(image, threshold)
    }
}

impl<T: DescriptorMatcher + ?Sized> DescriptorMatcher for Arc<T> {
    fn match_features(
        &self,
        reference: &[FeaturePoint],
        scene: &[FeaturePoint],
    ) -> Vec<FeatureMatch> {
        (**self).match_features(reference, scene)
    }
}

impl<T: OpticalFlow + ?Sized> OpticalFlow for Arc<T> {
    fn track(
        &self,
        previous: &ImageView<'_>,
        current: &ImageView<'_>,
        points: &[DVec2],
    ) -> Vec<FlowPoint> {
        (**self).track(previous, current, points)
    }
}
