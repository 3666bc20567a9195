use std::path::Path;

use posetrack_geometry::{
    CameraIntrinsics, EstimationMethod, EstimatorParams, RefineParams, TransformKind,
};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// Parameters of a single tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Robust estimation method.
    pub method: EstimationMethod,
    /// Parameters of the robust estimator.
    pub estimator: EstimatorParams,
    /// Run the Levenberg-Marquardt refiner after estimation.
    pub refine_enabled: bool,
    /// Parameters of the refiner.
    pub refine: RefineParams,
    /// A full detection runs every `detection_interval` frames; the frames in between
    /// propagate the previous inliers with optical flow. `1` detects on every frame.
    pub detection_interval: usize,
    /// Minimum inliers to publish a homography.
    pub min_inliers_homography: usize,
    /// Minimum inliers to publish a pose.
    pub min_inliers_pose: usize,
    /// Seed of the session RNG. `None` seeds from the operating system.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            method: EstimationMethod::Ransac,
            estimator: EstimatorParams::default(),
            refine_enabled: true,
            refine: RefineParams::default(),
            detection_interval: 5,
            min_inliers_homography: 4,
            min_inliers_pose: 5,
            seed: None,
        }
    }
}

impl SessionConfig {
    /// Minimum inliers for the kind of transform the configured method estimates.
    pub fn min_inliers(&self) -> usize {
        match self.method.transform_kind() {
            TransformKind::Homography => self.min_inliers_homography,
            TransformKind::Pose => self.min_inliers_pose,
        }
    }
}

/// Bounds and watermarks of the adaptive feature threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Threshold used on the first frame.
    pub initial: f64,
    /// Lower clamp.
    pub min: f64,
    /// Upper clamp.
    pub max: f64,
    /// Change applied per frame.
    pub step: f64,
    /// Below this many detected features the threshold is lowered.
    pub low_water: usize,
    /// Above this many detected features the threshold is raised.
    pub high_water: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            initial: 20.0,
            min: 5.0,
            max: 80.0,
            step: 1.0,
            low_water: 300,
            high_water: 800,
        }
    }
}

/// Filters of the brute-force descriptor matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Discard matches with an L2 distance above this value.
    pub max_distance: Option<f64>,
    /// Lowe's ratio test: keep a match only if `best / second_best < max_ratio`.
    pub max_ratio: Option<f64>,
    /// Keep only mutual nearest neighbours.
    pub cross_check: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_distance: None,
            max_ratio: Some(0.8),
            cross_check: false,
        }
    }
}

/// Top-level configuration of a [`MultiTargetTracker`](crate::MultiTargetTracker).
///
/// # Examples
///
/// ```
/// use posetrack_tracking::TrackerConfig;
///
/// let config = TrackerConfig::from_json_str(r#"{ "session": { "method": "prosac" } }"#).unwrap();
/// assert_eq!(config.session.method.to_string(), "prosac");
/// assert_eq!(config.session.detection_interval, 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Camera intrinsics shared by all targets.
    pub intrinsics: CameraIntrinsics,
    /// Parameters applied to every session.
    pub session: SessionConfig,
    /// Adaptive threshold controller.
    pub threshold: ThresholdConfig,
    /// Descriptor matcher.
    pub matcher: MatcherConfig,
}

impl TrackerConfig {
    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, TrackingError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, TrackingError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), TrackingError> {
        self.intrinsics
            .validate()
            .map_err(|e| TrackingError::InvalidConfig(e.to_string()))?;
        validate_estimator(&self.session.estimator)?;

        let session = &self.session;
        ensure(session.detection_interval > 0, "detection_interval must be positive")?;
        ensure(
            session.min_inliers_homography >= 4,
            "min_inliers_homography must be at least 4",
        )?;
        ensure(session.min_inliers_pose >= 5, "min_inliers_pose must be at least 5")?;
        ensure(
            session.refine.max_iterations > 0,
            "refine.max_iterations must be positive",
        )?;
        ensure(
            session.refine.min_inliers >= 6,
            "refine.min_inliers must be at least 6",
        )?;

        let t = &self.threshold;
        ensure(t.min <= t.max, "threshold min must not exceed max")?;
        ensure(t.step > 0.0, "threshold step must be positive")?;
        ensure(
            t.low_water <= t.high_water,
            "threshold low_water must not exceed high_water",
        )?;

        if let Some(ratio) = self.matcher.max_ratio {
            ensure(ratio > 0.0 && ratio <= 1.0, "matcher max_ratio must be in (0, 1]")?;
        }
        Ok(())
    }
}

/// Range checks shared by the configuration and the runtime setters.
pub(crate) fn validate_estimator(params: &EstimatorParams) -> Result<(), TrackingError> {
    ensure(
        params.reprojection_error > 0.0,
        "reprojection_error must be positive",
    )?;
    ensure(params.max_iterations > 0, "max_iterations must be positive")?;
    ensure(
        params.confidence > 0.0 && params.confidence < 1.0,
        "confidence must be in (0, 1)",
    )
}

fn ensure(cond: bool, msg: &str) -> Result<(), TrackingError> {
    if cond {
        Ok(())
    } else {
        Err(TrackingError::InvalidConfig(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn json_roundtrip_keeps_values() -> Result<(), TrackingError> {
        let mut config = TrackerConfig::default();
        config.session.method = EstimationMethod::EpnpRansac;
        config.session.seed = Some(17);
        config.threshold.step = 2.5;

        let json = config.to_json_string()?;
        let restored = TrackerConfig::from_json_str(&json)?;
        assert_eq!(restored, config);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range() {
        let mut config = TrackerConfig::default();
        config.session.estimator.confidence = 1.0;
        assert!(matches!(
            config.validate(),
            Err(TrackingError::InvalidConfig(_))
        ));

        let mut config = TrackerConfig::default();
        config.session.detection_interval = 0;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.threshold.low_water = 900;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.threshold.min = 100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn refinement_needs_six_inliers() -> Result<(), TrackingError> {
        let res = TrackerConfig::from_json_str(r#"{ "session": { "refine": { "min_inliers": 1 } } }"#);
        assert!(matches!(res, Err(TrackingError::InvalidConfig(_))));

        let config = TrackerConfig::from_json_str(r#"{ "session": { "refine": { "min_inliers": 8 } } }"#)?;
        assert_eq!(config.session.refine.min_inliers, 8);
        Ok(())
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let res = TrackerConfig::from_json_str(r#"{ "session": { "method": "magic" } }"#);
        assert!(matches!(res, Err(TrackingError::Json(_))));
    }

    #[test]
    fn min_inliers_follow_method() {
        let mut session = SessionConfig::default();
        assert_eq!(session.min_inliers(), 4);
        session.method = EstimationMethod::EpnpRansac;
        assert_eq!(session.min_inliers(), 5);
    }
}
