//! Synthetic detector and optical flow for planar targets seen by a known camera.
//!
//! A [`SyntheticScene`] owns the ground-truth pose of every target. The detector
//! projects the reference features through the current poses, adds pixel noise,
//! relocates a fraction of them and adds clutter; the flow maps points from the
//! previous poses to the current ones and drops a fraction of them. Images are only
//! used for their size.

use std::sync::{PoisonError, RwLock};

use glam::{DVec2, DVec3};
use posetrack_geometry::{CameraIntrinsics, Pose};
use posetrack_image::ImageView;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::collaborators::{FeatureSource, FlowPoint, OpticalFlow};
use crate::error::TrackingError;
use crate::feature::FeaturePoint;
use crate::reference::ReferenceTarget;

/// Noise model of a [`SyntheticScene`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Uniform pixel noise added to detections and flow, in pixels.
    pub noise_px: f64,
    /// Fraction of detections moved to a random image position.
    pub outlier_ratio: f64,
    /// Random features with random descriptors added per frame.
    pub clutter: usize,
    /// Fraction of flow points reported lost.
    pub flow_loss: f64,
    /// Dimension of the generated descriptors.
    pub descriptor_len: usize,
    /// Uniform noise added to each descriptor component.
    pub descriptor_noise: f32,
    /// Base seed; each frame derives its own RNG from it.
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            noise_px: 0.3,
            outlier_ratio: 0.1,
            clutter: 20,
            flow_loss: 0.05,
            descriptor_len: 32,
            descriptor_noise: 0.02,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct SceneTarget {
    features: Vec<FeaturePoint>,
    responses: Vec<f64>,
    half_size: DVec2,
    pose: Pose,
    previous_pose: Pose,
}

#[derive(Debug, Default)]
struct SceneState {
    targets: Vec<SceneTarget>,
    frame: u64,
}

/// Planar targets with known poses, acting as detector and optical flow.
#[derive(Debug)]
pub struct SyntheticScene {
    config: SceneConfig,
    intrinsics: CameraIntrinsics,
    state: RwLock<SceneState>,
}

fn jitter<R: Rng>(rng: &mut R, amount: f64) -> DVec2 {
    if amount > 0.0 {
        DVec2::new(
            rng.random_range(-amount..amount),
            rng.random_range(-amount..amount),
        )
    } else {
        DVec2::ZERO
    }
}

fn in_bounds(p: DVec2, image: &ImageView<'_>) -> bool {
    p.x >= 0.0 && p.y >= 0.0 && p.x < image.width() as f64 && p.y < image.height() as f64
}

impl SyntheticScene {
    /// Create an empty scene.
    pub fn new(config: SceneConfig, intrinsics: CameraIntrinsics) -> Self {
        Self {
            config,
            intrinsics,
            state: RwLock::new(SceneState::default()),
        }
    }

    /// Noise model in use.
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Add a target of `count` random features and return its reference.
    ///
    /// The target starts at the identity pose; move it with [`advance`](Self::advance).
    pub fn add_target(
        &self,
        physical_size: DVec2,
        count: usize,
    ) -> Result<ReferenceTarget, TrackingError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let id = state.targets.len() as u32;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1000 + id as u64));

        let half_size = physical_size / 2.0;
        let mut features = Vec::with_capacity(count);
        let mut responses = Vec::with_capacity(count);
        for _ in 0..count {
            let world = DVec3::new(
                rng.random_range(-half_size.x..half_size.x),
                rng.random_range(-half_size.y..half_size.y),
                0.0,
            );
            let descriptor = (0..self.config.descriptor_len)
                .map(|_| rng.random_range(0.0..1.0))
                .collect();
            features.push(FeaturePoint {
                world: Some(world),
                ..FeaturePoint::new(world.truncate(), 1.0, 0.0, descriptor)
            });
            responses.push(rng.random_range(0.0..100.0));
        }

        let target =
            ReferenceTarget::from_features(id, features.clone(), physical_size, self.intrinsics)?;
        state.targets.push(SceneTarget {
            features,
            responses,
            half_size,
            pose: Pose::IDENTITY,
            previous_pose: Pose::IDENTITY,
        });
        Ok(target)
    }

    /// Start a new frame with the given target poses; missing entries keep their pose.
    pub fn advance(&self, poses: &[Pose]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.frame += 1;
        for (i, target) in state.targets.iter_mut().enumerate() {
            target.previous_pose = target.pose;
            if let Some(pose) = poses.get(i) {
                target.pose = *pose;
            }
        }
    }

    /// Ground-truth pose of target `i` in the current frame.
    pub fn pose(&self, i: usize) -> Option<Pose> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.targets.get(i).map(|t| t.pose)
    }

    fn frame_rng(&self, frame: u64, salt: u64) -> StdRng {
        StdRng::seed_from_u64(
            self.config
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(frame.wrapping_mul(31).wrapping_add(salt)),
        )
    }
}

impl FeatureSource for SyntheticScene {
    fn detect(&self, image: &ImageView<'_>, threshold: f64) -> Vec<FeaturePoint> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut rng = self.frame_rng(state.frame, 1);
        let size = DVec2::new(image.width() as f64, image.height() as f64);
        let mut out = Vec::new();

        for target in &state.targets {
            for (f, &response) in target.features.iter().zip(&target.responses) {
                if response < threshold {
                    continue;
                }
                let Some(world) = f.world else {
                    continue;
                };
                let Some(px) = target.pose.project(world, &self.intrinsics) else {
                    continue;
                };
                if !in_bounds(px, image) {
                    continue;
                }
                let position = if rng.random_bool(self.config.outlier_ratio.clamp(0.0, 1.0)) {
                    DVec2::new(rng.random_range(0.0..size.x), rng.random_range(0.0..size.y))
                } else {
                    px + jitter(&mut rng, self.config.noise_px)
                };
                let noise = self.config.descriptor_noise;
                let descriptor = f
                    .descriptor
                    .iter()
                    .map(|&v| {
                        if noise > 0.0 {
                            v + rng.random_range(-noise..noise)
                        } else {
                            v
                        }
                    })
                    .collect();
                out.push(FeaturePoint::new(position, f.size, f.orientation, descriptor));
            }
        }

        for _ in 0..self.config.clutter {
            let position = DVec2::new(rng.random_range(0.0..size.x), rng.random_range(0.0..size.y));
            let descriptor = (0..self.config.descriptor_len)
                .map(|_| rng.random_range(0.0..1.0))
                .collect();
            if rng.random_range(0.0..100.0) >= threshold {
                out.push(FeaturePoint::new(position, 1.0, 0.0, descriptor));
            }
        }
        out
    }
}

impl OpticalFlow for SyntheticScene {
    fn track(
        &self,
        _previous: &ImageView<'_>,
        current: &ImageView<'_>,
        points: &[DVec2],
    ) -> Vec<FlowPoint> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut rng = self.frame_rng(state.frame, 2);
        let mappings: Vec<_> = state
            .targets
            .iter()
            .filter_map(|t| {
                let before = t.previous_pose.plane_homography(&self.intrinsics)?.inverse()?;
                Some((before, t.pose, t.half_size))
            })
            .collect();

        points
            .iter()
            .map(|&p| {
                let moved = mappings.iter().find_map(|(before, pose, half)| {
                    let w = before.apply(p)?;
                    (w.x.abs() <= half.x && w.y.abs() <= half.y)
                        .then(|| pose.project(w.extend(0.0), &self.intrinsics))
                        .flatten()
                });
                let dropped = rng.random_bool(self.config.flow_loss.clamp(0.0, 1.0));
                match moved {
                    Some(q) if !dropped => {
                        let q = q + jitter(&mut rng, self.config.noise_px);
                        if in_bounds(q, current) {
                            FlowPoint::found(q)
                        } else {
                            FlowPoint::lost(q)
                        }
                    }
                    _ => FlowPoint::lost(p),
                }
            })
            .collect()
    }
}
