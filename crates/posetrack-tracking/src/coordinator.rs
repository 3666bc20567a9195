use posetrack_geometry::{EstimationMethod, Transform};
use posetrack_image::{GrayImage, ImageView};
use rayon::prelude::*;

use crate::collaborators::{DescriptorMatcher, FeatureSource, OpticalFlow};
use crate::config::{validate_estimator, TrackerConfig};
use crate::error::TrackingError;
use crate::matcher::BruteForceMatcher;
use crate::reference::{register_reference, CameraParameter, ReferenceTarget, Registration};
use crate::session::{FrameInput, TrackingSession};
use crate::threshold::AdaptiveThreshold;

/// Runs one [`TrackingSession`] per registered target over a shared frame stream.
///
/// Per frame the detector runs at most once, and only when a session needs a full
/// detection. Sessions then run in parallel. After they are joined the coordinator
/// alone updates the shared threshold from the detector's feature count and pushes it
/// to every session.
pub struct MultiTargetTracker {
    config: TrackerConfig,
    detector: Box<dyn FeatureSource>,
    matcher: Box<dyn DescriptorMatcher>,
    flow: Box<dyn OpticalFlow>,
    sessions: Vec<TrackingSession>,
    threshold: AdaptiveThreshold,
    previous: Option<GrayImage>,
    last_feature_count: Option<usize>,
}

impl MultiTargetTracker {
    /// Create a coordinator with the brute-force matcher configured in `config`.
    ///
    /// # Errors
    ///
    /// If the configuration does not validate.
    pub fn new(
        config: TrackerConfig,
        detector: Box<dyn FeatureSource>,
        flow: Box<dyn OpticalFlow>,
    ) -> Result<Self, TrackingError> {
        config.validate()?;
        let matcher = Box::new(BruteForceMatcher::new(config.matcher.clone()));
        let threshold = AdaptiveThreshold::new(config.threshold.clone());
        Ok(Self {
            config,
            detector,
            matcher,
            flow,
            sessions: Vec::new(),
            threshold,
            previous: None,
            last_feature_count: None,
        })
    }

    /// Replace the descriptor matcher.
    pub fn with_matcher(mut self, matcher: Box<dyn DescriptorMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Current configuration, including values changed by the setters.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Register a target from its image and start a session for it.
    ///
    /// Returns the index of the new target.
    pub fn register_reference(
        &mut self,
        image: &ImageView<'_>,
        registration: &Registration,
    ) -> Result<usize, TrackingError> {
        let id = self.sessions.len() as u32;
        let target = register_reference(
            id,
            image,
            registration,
            self.detector.as_ref(),
            self.config.intrinsics,
        )?;
        Ok(self.add_target(target))
    }

    /// Start a session for an already built target, e.g. one loaded from a repository.
    pub fn add_target(&mut self, target: ReferenceTarget) -> usize {
        let index = self.sessions.len();
        let mut config = self.config.session.clone();
        config.seed = config.seed.map(|s| s.wrapping_add(index as u64));
        let mut session = TrackingSession::new(target, config);
        session.set_threshold(self.threshold.value());
        self.sessions.push(session);
        index
    }

    /// Process one frame and return the total number of inliers over all targets.
    pub fn update_camera_pose(&mut self, frame: &ImageView<'_>) -> usize {
        let has_previous = self.previous.is_some();
        let needs_detection = self
            .sessions
            .iter()
            .any(|s| s.needs_detection(has_previous));

        let features = needs_detection.then(|| self.detector.detect(frame, self.threshold.value()));

        let input = FrameInput {
            current: *frame,
            previous: self.previous.as_ref().map(|p| p.view()),
            features: features.as_deref(),
        };
        let matcher = self.matcher.as_ref();
        let flow = self.flow.as_ref();
        let total: usize = self
            .sessions
            .par_iter_mut()
            .map(|s| s.update(&input, matcher, flow))
            .sum();

        if let Some(features) = &features {
            let value = self.threshold.update(features.len());
            for s in &mut self.sessions {
                s.set_threshold(value);
            }
            log::debug!(
                "detector found {} features, threshold now {value:.2}",
                features.len()
            );
        }
        self.last_feature_count = features.as_ref().map(Vec::len);
        self.previous = Some(frame.to_image());
        total
    }

    /// Last published transform of target `i`.
    pub fn get_transform(&self, i: usize) -> Result<&Transform, TrackingError> {
        Ok(self.session(i)?.transform())
    }

    /// Inliers of target `i` on the last frame.
    pub fn get_matched_count(&self, i: usize) -> Result<usize, TrackingError> {
        Ok(self.session(i)?.matched_count())
    }

    /// Camera intrinsics and pose relative to target `i`.
    pub fn get_camera_parameter(&self, i: usize) -> Result<&CameraParameter, TrackingError> {
        Ok(self.session(i)?.camera())
    }

    /// Number of registered targets.
    pub fn get_tracker_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session of target `i`.
    pub fn session(&self, i: usize) -> Result<&TrackingSession, TrackingError> {
        self.sessions
            .get(i)
            .ok_or(TrackingError::UnknownTarget(i, self.sessions.len()))
    }

    /// All sessions, in registration order.
    pub fn sessions(&self) -> &[TrackingSession] {
        &self.sessions
    }

    /// Current shared feature threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold.value()
    }

    /// Features returned by the detector on the last frame, `None` if it did not run.
    pub fn last_feature_count(&self) -> Option<usize> {
        self.last_feature_count
    }

    /// Switch the estimation method of every session.
    pub fn set_pose_estimation_method(&mut self, method: EstimationMethod) {
        self.config.session.method = method;
        for s in &mut self.sessions {
            s.set_pose_estimation_method(method);
        }
    }

    /// Set the inlier threshold in pixels.
    pub fn set_reprojection_error(&mut self, px: f64) -> Result<(), TrackingError> {
        let mut params = self.config.session.estimator.clone();
        params.reprojection_error = px;
        validate_estimator(&params)?;
        self.config.session.estimator = params;
        self.sessions
            .iter_mut()
            .try_for_each(|s| s.set_reprojection_error(px))
    }

    /// Set the iteration cap of the robust estimator.
    pub fn set_max_iteration(&mut self, n: usize) -> Result<(), TrackingError> {
        let mut params = self.config.session.estimator.clone();
        params.max_iterations = n;
        validate_estimator(&params)?;
        self.config.session.estimator = params;
        self.sessions.iter_mut().try_for_each(|s| s.set_max_iteration(n))
    }

    /// Set the RANSAC confidence.
    pub fn set_confidence(&mut self, p: f64) -> Result<(), TrackingError> {
        let mut params = self.config.session.estimator.clone();
        params.confidence = p;
        validate_estimator(&params)?;
        self.config.session.estimator = params;
        self.sessions.iter_mut().try_for_each(|s| s.set_confidence(p))
    }

    /// Set the number of frames between full detections.
    pub fn set_detection_ratio(&mut self, frames: usize) -> Result<(), TrackingError> {
        if frames == 0 {
            return Err(TrackingError::InvalidConfig(
                "detection_interval must be positive".to_string(),
            ));
        }
        self.config.session.detection_interval = frames;
        self.sessions
            .iter_mut()
            .try_for_each(|s| s.set_detection_ratio(frames))
    }
}
