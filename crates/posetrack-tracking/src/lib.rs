#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//! A [`TrackingSession`] follows one registered [`ReferenceTarget`] through a frame
//! stream: full detection and descriptor matching on some frames, optical-flow
//! propagation of the previous inliers on the others, then robust estimation, outlier
//! classification and refinement from `posetrack-geometry`. The
//! [`MultiTargetTracker`] runs all sessions of a stream in parallel and drives the
//! shared feature threshold.

/// Error types for the tracking crate.
pub mod error;

/// Configuration structures.
pub mod config;

/// Detected and reference feature points.
pub mod feature;

/// Traits for the external detector, matcher and optical-flow collaborators.
pub mod collaborators;

/// Brute-force descriptor matching.
pub mod matcher;

/// Reference targets and their registration.
pub mod reference;

/// Text persistence of reference repositories.
pub mod repository;

/// Session state machine.
pub mod state;

/// Per-target tracking session.
pub mod session;

/// Adaptive feature-threshold controller.
pub mod threshold;

/// Multi-target coordinator.
pub mod coordinator;

/// Synthetic collaborators driven by known camera poses.
pub mod synthetic;

pub use crate::collaborators::{DescriptorMatcher, FeatureSource, FlowPoint, OpticalFlow};
pub use crate::config::{MatcherConfig, SessionConfig, ThresholdConfig, TrackerConfig};
pub use crate::coordinator::MultiTargetTracker;
pub use crate::error::{RepositoryError, TrackingError};
pub use crate::feature::{FeatureMatch, FeaturePoint};
pub use crate::matcher::BruteForceMatcher;
pub use crate::reference::{register_reference, CameraParameter, ReferenceTarget, Registration};
pub use crate::session::{FrameInput, TrackingSession};
pub use crate::state::{SessionState, TrackingMode};
pub use crate::threshold::AdaptiveThreshold;
