use glam::{DVec2, DVec3};

/// A detected or reference feature point.
///
/// Points are owned by the list that holds them; a frame's detections are dropped
/// with the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePoint {
    /// Position in the image, in pixels.
    pub position: DVec2,
    /// Position on the target in world units, for reference points.
    pub world: Option<DVec3>,
    /// Scale of the feature (keypoint size).
    pub size: f64,
    /// Orientation in radians.
    pub orientation: f64,
    /// Descriptor vector.
    pub descriptor: Vec<f32>,
    /// Set when the point was rejected by the outlier checker.
    pub outlier: bool,
    /// Index of the point in its repository.
    pub index: usize,
    /// Id of the object that owns the point.
    pub object_id: u32,
    /// RGBA color sampled at the point.
    pub color: [f32; 4],
    /// Distance of the last descriptor match.
    pub distance: f64,
}

impl Default for FeaturePoint {
    fn default() -> Self {
        Self {
            position: DVec2::ZERO,
            world: None,
            size: 1.0,
            orientation: 0.0,
            descriptor: Vec::new(),
            outlier: false,
            index: 0,
            object_id: 0,
            color: [0.0, 0.0, 0.0, 1.0],
            distance: 0.0,
        }
    }
}

impl FeaturePoint {
    /// Create a detection with a descriptor.
    pub fn new(position: DVec2, size: f64, orientation: f64, descriptor: Vec<f32>) -> Self {
        Self {
            position,
            size,
            orientation,
            descriptor,
            ..Default::default()
        }
    }

    /// Dimension of the descriptor.
    pub fn descriptor_len(&self) -> usize {
        self.descriptor.len()
    }
}

/// A match between a reference feature and a scene feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    /// Index into the reference features.
    pub reference: usize,
    /// Index into the scene features.
    pub scene: usize,
    /// Descriptor distance of the match.
    pub distance: f64,
}
