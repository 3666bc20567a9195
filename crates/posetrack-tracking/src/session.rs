use std::collections::BTreeMap;

use glam::DVec2;
use posetrack_geometry::{
    classify, estimate, pose_from_homography, refine, CorrespondenceSet, EstimationMethod,
    Homography, ReferencePoint, ScenePoint, Transform, TransformKind,
};
use posetrack_image::ImageView;
use rand::{rngs::StdRng, SeedableRng};

use crate::collaborators::{DescriptorMatcher, OpticalFlow};
use crate::config::{validate_estimator, SessionConfig};
use crate::error::TrackingError;
use crate::feature::FeaturePoint;
use crate::reference::{CameraParameter, ReferenceTarget};
use crate::state::{FrameOutcome, SessionState};

/// Everything a session sees of one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// The current grayscale frame.
    pub current: ImageView<'a>,
    /// The previous frame, if any.
    pub previous: Option<ImageView<'a>>,
    /// Detections on the current frame, when the detector ran.
    pub features: Option<&'a [FeaturePoint]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedPoint {
    position: DVec2,
    distance: f64,
}

/// Tracks one reference target through a frame stream.
///
/// Each frame either runs a full detection and descriptor matching, or advances the
/// previous frame's inliers with optical flow. The resulting correspondences go
/// through robust estimation, outlier classification and refinement; a transform is
/// published only when it keeps at least the configured minimum of inliers, otherwise
/// the previous one is held and the session is [`SessionState::Lost`].
pub struct TrackingSession {
    target: ReferenceTarget,
    config: SessionConfig,
    state: SessionState,
    transform: Transform,
    matched_count: usize,
    threshold: f64,
    frames_since_detection: usize,
    // scene positions of the last inliers, keyed by repository index
    flow_cache: BTreeMap<usize, CachedPoint>,
    scene_points: Vec<FeaturePoint>,
    rng: StdRng,
}

impl TrackingSession {
    /// Create a session for `target`.
    pub fn new(target: ReferenceTarget, config: SessionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let transform = initial_transform(config.method, target.camera());
        Self {
            target,
            config,
            state: SessionState::Idle,
            transform,
            matched_count: 0,
            threshold: 0.0,
            frames_since_detection: 0,
            flow_cache: BTreeMap::new(),
            scene_points: Vec::new(),
            rng,
        }
    }

    /// The tracked target.
    pub fn target(&self) -> &ReferenceTarget {
        &self.target
    }

    /// Camera intrinsics and current pose relative to the target.
    pub fn camera(&self) -> &CameraParameter {
        self.target.camera()
    }

    /// Session parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last published transform, held across failed frames.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Inliers of the last frame, 0 if it failed.
    pub fn matched_count(&self) -> usize {
        self.matched_count
    }

    /// Feature threshold pushed by the coordinator.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Frames processed since the last full detection.
    pub fn frames_since_detection(&self) -> usize {
        self.frames_since_detection
    }

    /// Number of points that the next propagation starts from.
    pub fn cached_points(&self) -> usize {
        self.flow_cache.len()
    }

    /// Scene side of the last published correspondences, flagged by the outlier checker.
    ///
    /// `index` is the matched reference index and `world` its target position; the
    /// list is empty after a failed frame.
    pub fn scene_points(&self) -> &[FeaturePoint] {
        &self.scene_points
    }

    /// Whether the next frame must run a full detection.
    ///
    /// `has_previous` tells whether a previous frame is available for optical flow.
    pub fn needs_detection(&self, has_previous: bool) -> bool {
        !has_previous
            || self.state.requires_detection()
            || self.flow_cache.is_empty()
            || self.frames_since_detection + 1 >= self.config.detection_interval
    }

    /// Process one frame and return the number of inliers published, 0 on failure.
    pub fn update(
        &mut self,
        input: &FrameInput<'_>,
        matcher: &dyn DescriptorMatcher,
        flow: &dyn OpticalFlow,
    ) -> usize {
        let was_tracking = self.state.is_tracking();
        self.state = self.state.begin_frame();

        let outcome = match input.previous {
            Some(previous) if !self.needs_detection(true) => {
                self.propagate(&previous, &input.current, flow)
            }
            _ => match input.features {
                Some(features) => self.redetect(features, matcher),
                None => {
                    log::debug!(
                        "target {}: detection needed but no features were given",
                        self.target.id()
                    );
                    self.fail();
                    FrameOutcome::Failed
                }
            },
        };
        self.state = self.state.finish_frame(outcome);

        match (was_tracking, self.state.is_tracking()) {
            (false, true) => log::info!(
                "target {}: tracking with {} inliers",
                self.target.id(),
                self.matched_count
            ),
            (true, false) => log::warn!("target {}: lost, pose held", self.target.id()),
            _ => {}
        }
        self.matched_count
    }

    fn redetect(&mut self, features: &[FeaturePoint], matcher: &dyn DescriptorMatcher) -> FrameOutcome {
        self.frames_since_detection = 0;

        let reference = self.target.features();
        let matches = matcher.match_features(reference, features);
        let mut set = CorrespondenceSet::with_capacity(matches.len());
        for m in &matches {
            let (Some(r), Some(s)) = (reference.get(m.reference), features.get(m.scene)) else {
                continue;
            };
            let Some(world) = r.world else {
                continue;
            };
            set.push(
                ReferencePoint::new(world, m.reference),
                ScenePoint::new(s.position, m.distance),
            );
        }
        log::debug!(
            "target {}: redetect, {} matches from {} features",
            self.target.id(),
            set.len(),
            features.len()
        );
        self.solve_and_publish(set, FrameOutcome::Detected)
    }

    fn propagate(
        &mut self,
        previous: &ImageView<'_>,
        current: &ImageView<'_>,
        flow: &dyn OpticalFlow,
    ) -> FrameOutcome {
        self.frames_since_detection += 1;

        let (indices, cached): (Vec<usize>, Vec<CachedPoint>) =
            self.flow_cache.iter().map(|(&i, &c)| (i, c)).unzip();
        let points: Vec<DVec2> = cached.iter().map(|c| c.position).collect();
        let tracked = flow.track(previous, current, &points);

        let mut set = CorrespondenceSet::with_capacity(points.len());
        for ((&index, c), t) in indices.iter().zip(&cached).zip(&tracked) {
            if !t.found {
                continue;
            }
            let Some(world) = self.target.features().get(index).and_then(|f| f.world) else {
                continue;
            };
            set.push(
                ReferencePoint::new(world, index),
                ScenePoint::new(t.position, c.distance),
            );
        }
        log::debug!(
            "target {}: propagate, {}/{} points found",
            self.target.id(),
            set.len(),
            points.len()
        );

        if set.len() < self.config.min_inliers() {
            log::debug!(
                "target {}: too few propagated points, redetecting next frame",
                self.target.id()
            );
            self.fail();
            return FrameOutcome::Failed;
        }
        self.solve_and_publish(set, FrameOutcome::Propagated)
    }

    fn solve_and_publish(&mut self, mut set: CorrespondenceSet, outcome: FrameOutcome) -> FrameOutcome {
        match self.solve(&mut set) {
            Some((transform, inliers)) => {
                self.publish(transform, &set, inliers);
                outcome
            }
            None => {
                self.fail();
                FrameOutcome::Failed
            }
        }
    }

    /// Estimate, gate on the inlier count, then refine with fallback.
    fn solve(&mut self, set: &mut CorrespondenceSet) -> Option<(Transform, usize)> {
        let id = self.target.id();
        let min_inliers = self.config.min_inliers();
        let intrinsics = self.target.camera().intrinsics;
        let params = &self.config.estimator;

        if set.len() < min_inliers {
            log::debug!("target {id}: {} correspondences, need {min_inliers}", set.len());
            return None;
        }

        let summary = match estimate(set, self.config.method, &intrinsics, params, &mut self.rng) {
            Ok(summary) => summary,
            Err(e) => {
                log::debug!("target {id}: {e}");
                return None;
            }
        };

        let mut transform = summary.model;
        let mut inliers = classify(&transform, set, &intrinsics, params.reprojection_error);
        if inliers < min_inliers {
            log::debug!("target {id}: {inliers} inliers, need {min_inliers}");
            return None;
        }

        if self.config.refine_enabled {
            let mut refined = transform;
            match refine(&mut refined, &set.inliers(), &intrinsics, &self.config.refine) {
                Ok(report) => {
                    let n = classify(&refined, set, &intrinsics, params.reprojection_error);
                    if n >= min_inliers {
                        log::trace!(
                            "target {id}: refined rmse {:.3} -> {:.3} in {} iterations",
                            report.initial_rmse,
                            report.final_rmse,
                            report.iterations
                        );
                        transform = refined;
                        inliers = n;
                    } else {
                        log::warn!(
                            "target {id}: refinement left {n} inliers, keeping the estimate"
                        );
                        inliers = classify(&transform, set, &intrinsics, params.reprojection_error);
                    }
                }
                Err(e) => log::warn!("target {id}: refinement failed ({e}), keeping the estimate"),
            }
        }
        Some((transform, inliers))
    }

    fn publish(&mut self, transform: Transform, set: &CorrespondenceSet, inliers: usize) {
        let camera = self.target.camera_mut();
        match &transform {
            Transform::Pose(pose) => camera.pose = *pose,
            Transform::Homography(h) => {
                if let Some(pose) = pose_from_homography(h, &camera.intrinsics) {
                    camera.pose = pose;
                }
            }
        }
        self.transform = transform;
        self.matched_count = inliers;
        self.flow_cache = set
            .iter()
            .filter(|(_, _, outlier)| !outlier)
            .map(|(r, s, _)| {
                (
                    r.index,
                    CachedPoint {
                        position: s.image,
                        distance: s.distance,
                    },
                )
            })
            .collect();
        let object_id = self.target.id();
        self.scene_points = set
            .iter()
            .map(|(r, s, outlier)| FeaturePoint {
                position: s.image,
                world: Some(r.world),
                outlier,
                index: r.index,
                object_id,
                distance: s.distance,
                ..Default::default()
            })
            .collect();
    }

    fn fail(&mut self) {
        self.matched_count = 0;
        self.flow_cache.clear();
        self.scene_points.clear();
    }

    /// Switch the estimation method.
    ///
    /// When the transform kind changes, the held transform is rebuilt from the current
    /// camera pose.
    pub fn set_pose_estimation_method(&mut self, method: EstimationMethod) {
        let kind_changed = method.transform_kind() != self.config.method.transform_kind();
        self.config.method = method;
        if kind_changed {
            self.transform = initial_transform(method, self.target.camera());
        }
    }

    /// Set the inlier threshold in pixels.
    pub fn set_reprojection_error(&mut self, px: f64) -> Result<(), TrackingError> {
        self.set_estimator(|p| p.reprojection_error = px)
    }

    /// Set the iteration cap of the robust estimator.
    pub fn set_max_iteration(&mut self, n: usize) -> Result<(), TrackingError> {
        self.set_estimator(|p| p.max_iterations = n)
    }

    /// Set the RANSAC confidence.
    pub fn set_confidence(&mut self, p: f64) -> Result<(), TrackingError> {
        self.set_estimator(|params| params.confidence = p)
    }

    /// Set the number of frames between full detections.
    pub fn set_detection_ratio(&mut self, frames: usize) -> Result<(), TrackingError> {
        if frames == 0 {
            return Err(TrackingError::InvalidConfig(
                "detection_interval must be positive".to_string(),
            ));
        }
        self.config.detection_interval = frames;
        Ok(())
    }

    /// Set the feature threshold.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    fn set_estimator(
        &mut self,
        f: impl FnOnce(&mut posetrack_geometry::EstimatorParams),
    ) -> Result<(), TrackingError> {
        let mut params = self.config.estimator.clone();
        f(&mut params);
        validate_estimator(&params)?;
        self.config.estimator = params;
        Ok(())
    }
}

fn initial_transform(method: EstimationMethod, camera: &CameraParameter) -> Transform {
    match method.transform_kind() {
        TransformKind::Pose => Transform::Pose(camera.pose),
        TransformKind::Homography => Transform::Homography(
            camera
                .pose
                .plane_homography(&camera.intrinsics)
                .unwrap_or(Homography::IDENTITY),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FlowPoint;
    use crate::matcher::BruteForceMatcher;
    use glam::DVec3;
    use posetrack_geometry::CameraIntrinsics;
    use posetrack_image::GrayImage;
    use rand::Rng;

    struct ShiftFlow(DVec2);

    impl OpticalFlow for ShiftFlow {
        fn track(&self, _: &ImageView<'_>, _: &ImageView<'_>, points: &[DVec2]) -> Vec<FlowPoint> {
            points.iter().map(|&p| FlowPoint::found(p + self.0)).collect()
        }
    }

    struct LoseAll;

    impl OpticalFlow for LoseAll {
        fn track(&self, _: &ImageView<'_>, _: &ImageView<'_>, points: &[DVec2]) -> Vec<FlowPoint> {
            points.iter().map(|&p| FlowPoint::lost(p)).collect()
        }
    }

    fn truth() -> Homography {
        Homography::from_rows([[400.0, 20.0, 320.0], [-10.0, 380.0, 240.0], [0.02, 0.01, 1.0]])
            .unwrap_or(Homography::IDENTITY)
    }

    fn target() -> ReferenceTarget {
        let mut rng = StdRng::seed_from_u64(1);
        let features = (0..36)
            .map(|i| {
                let world = DVec3::new(
                    (i % 6) as f64 * 0.1 - 0.25,
                    (i / 6) as f64 * 0.08 - 0.2,
                    0.0,
                );
                let descriptor = (0..16).map(|_| rng.random_range(0.0..1.0)).collect();
                FeaturePoint {
                    world: Some(world),
                    ..FeaturePoint::new(world.truncate(), 1.0, 0.0, descriptor)
                }
            })
            .collect();
        ReferenceTarget::from_features(
            0,
            features,
            DVec2::new(0.6, 0.48),
            CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0),
        )
        .unwrap()
    }

    fn scene(target: &ReferenceTarget, h: &Homography) -> Vec<FeaturePoint> {
        target
            .features()
            .iter()
            .rev()
            .map(|f| {
                let p = h.apply(f.position).unwrap_or_default();
                FeaturePoint::new(p, 1.0, 0.0, f.descriptor.clone())
            })
            .collect()
    }

    fn session(interval: usize) -> TrackingSession {
        let config = SessionConfig {
            detection_interval: interval,
            seed: Some(5),
            ..Default::default()
        };
        TrackingSession::new(target(), config)
    }

    #[test]
    fn detect_then_propagate() {
        let image = GrayImage::from_size_val([64, 48].into(), 0).unwrap();
        let mut s = session(3);
        let features = scene(s.target(), &truth());
        let matcher = BruteForceMatcher::default();
        let flow = ShiftFlow(DVec2::new(2.0, -1.0));

        let input = FrameInput {
            current: image.view(),
            previous: None,
            features: Some(&features),
        };
        assert_eq!(s.update(&input, &matcher, &flow), 36);
        assert_eq!(
            s.state(),
            SessionState::Tracking(crate::state::TrackingMode::Redetecting)
        );
        let h = *s.transform().as_homography().unwrap();
        assert!(h.frobenius_distance(&truth()) < 1e-3);
        assert_eq!(s.cached_points(), 36);
        assert!(s.camera().pose.translation.z > 0.0);

        let input = FrameInput {
            current: image.view(),
            previous: Some(image.view()),
            features: None,
        };
        assert!(!s.needs_detection(true));
        assert_eq!(s.update(&input, &matcher, &flow), 36);
        assert_eq!(
            s.state(),
            SessionState::Tracking(crate::state::TrackingMode::Propagating)
        );
        assert_eq!(s.frames_since_detection(), 1);
        let moved = s.transform().as_homography().unwrap().apply(DVec2::ZERO).unwrap();
        let before = h.apply(DVec2::ZERO).unwrap();
        assert!(moved.distance(before + DVec2::new(2.0, -1.0)) < 1e-3);

        // third frame since detection hits the interval
        assert_eq!(s.update(&input, &matcher, &flow), 36);
        assert!(s.needs_detection(true));
    }

    #[test]
    fn all_points_lost_forces_redetection() {
        let image = GrayImage::from_size_val([64, 48].into(), 0).unwrap();
        let mut s = session(10);
        let features = scene(s.target(), &truth());
        let matcher = BruteForceMatcher::default();

        let first = FrameInput {
            current: image.view(),
            previous: None,
            features: Some(&features),
        };
        assert_eq!(s.update(&first, &matcher, &LoseAll), 36);
        let held = *s.transform();

        let next = FrameInput {
            current: image.view(),
            previous: Some(image.view()),
            features: None,
        };
        assert_eq!(s.update(&next, &matcher, &LoseAll), 0);
        assert_eq!(s.state(), SessionState::Lost);
        assert_eq!(*s.transform(), held);
        assert!(s.needs_detection(true));

        let redetect = FrameInput {
            current: image.view(),
            previous: Some(image.view()),
            features: Some(&features),
        };
        assert_eq!(s.update(&redetect, &matcher, &LoseAll), 36);
        assert_eq!(s.frames_since_detection(), 0);
    }

    #[test]
    fn rejected_matches_are_flagged_and_not_cached() {
        let image = GrayImage::from_size_val([64, 48].into(), 0).unwrap();
        let mut s = session(3);
        let mut features = scene(s.target(), &truth());
        // scene features are in reverse order: scene j holds reference 35 - j
        for f in features.iter_mut().step_by(6) {
            f.position += DVec2::new(40.0, -30.0);
        }

        let input = FrameInput {
            current: image.view(),
            previous: None,
            features: Some(&features),
        };
        assert_eq!(s.update(&input, &BruteForceMatcher::default(), &LoseAll), 30);
        assert_eq!(s.cached_points(), 30);
        for j in (0..36).step_by(6) {
            assert!(!s.flow_cache.contains_key(&(35 - j)), "reference {}", 35 - j);
        }

        let points = s.scene_points();
        assert_eq!(points.len(), 36);
        for p in points {
            assert_eq!(p.outlier, (35 - p.index) % 6 == 0, "reference {}", p.index);
        }
        assert_eq!(points.iter().filter(|p| !p.outlier).count(), s.matched_count());

        // a failed frame clears the flags with the cache
        let next = FrameInput {
            current: image.view(),
            previous: Some(image.view()),
            features: None,
        };
        assert_eq!(s.update(&next, &BruteForceMatcher::default(), &LoseAll), 0);
        assert!(s.scene_points().is_empty());
    }

    #[test]
    fn too_few_matches_holds_transform() {
        let image = GrayImage::from_size_val([64, 48].into(), 0).unwrap();
        let mut s = session(1);
        let initial = *s.transform();
        let features: Vec<FeaturePoint> = scene(s.target(), &truth()).into_iter().take(3).collect();

        let input = FrameInput {
            current: image.view(),
            previous: None,
            features: Some(&features),
        };
        assert_eq!(s.update(&input, &BruteForceMatcher::default(), &LoseAll), 0);
        assert_eq!(s.state(), SessionState::Lost);
        assert_eq!(*s.transform(), initial);
        assert_eq!(s.cached_points(), 0);
    }

    #[test]
    fn setters_validate() {
        let mut s = session(1);
        assert!(s.set_confidence(1.5).is_err());
        assert!(s.set_reprojection_error(-1.0).is_err());
        assert!(s.set_max_iteration(0).is_err());
        assert!(s.set_detection_ratio(0).is_err());
        assert!(s.set_confidence(0.95).is_ok());
        assert_eq!(s.config().estimator.confidence, 0.95);

        s.set_pose_estimation_method(EstimationMethod::EpnpRansac);
        assert!(s.transform().as_pose().is_some());
        assert_eq!(s.config().min_inliers(), 5);
    }
}
