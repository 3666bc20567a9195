//! Tracking session state machine.
//!
//! `Idle -> Detecting -> Tracking(Propagating) <-> Tracking(Redetecting)`, with `Lost`
//! entered from any state when a frame fails. `Lost` forces a full detection on the
//! next frame. There is no terminal state.

/// How the last successful frame obtained its correspondences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Previous inliers advanced by optical flow.
    Propagating,
    /// Full detection and descriptor matching.
    Redetecting,
}

/// State of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No frame processed yet.
    #[default]
    Idle,
    /// First detection in progress.
    Detecting,
    /// A transform was published on the last frame.
    Tracking(TrackingMode),
    /// The last frame failed; the transform is held.
    Lost,
}

/// Result of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Published from a full detection.
    Detected,
    /// Published from optical-flow propagation.
    Propagated,
    /// Nothing published.
    Failed,
}

impl SessionState {
    /// State while a frame is being processed.
    pub fn begin_frame(self) -> Self {
        match self {
            SessionState::Idle => SessionState::Detecting,
            state => state,
        }
    }

    /// State after a frame with the given outcome.
    pub fn finish_frame(self, outcome: FrameOutcome) -> Self {
        match outcome {
            FrameOutcome::Detected => SessionState::Tracking(TrackingMode::Redetecting),
            FrameOutcome::Propagated => SessionState::Tracking(TrackingMode::Propagating),
            FrameOutcome::Failed => SessionState::Lost,
        }
    }

    /// Whether a transform was published on the last frame.
    pub fn is_tracking(&self) -> bool {
        matches!(self, SessionState::Tracking(_))
    }

    /// Whether the next frame must run a full detection.
    pub fn requires_detection(&self) -> bool {
        !self.is_tracking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let s = SessionState::default();
        assert!(s.requires_detection());

        let s = s.begin_frame();
        assert_eq!(s, SessionState::Detecting);

        let s = s.finish_frame(FrameOutcome::Detected);
        assert_eq!(s, SessionState::Tracking(TrackingMode::Redetecting));
        assert!(!s.requires_detection());

        let s = s.begin_frame().finish_frame(FrameOutcome::Propagated);
        assert_eq!(s, SessionState::Tracking(TrackingMode::Propagating));

        let s = s.begin_frame().finish_frame(FrameOutcome::Failed);
        assert_eq!(s, SessionState::Lost);
        assert!(s.requires_detection());
        assert_eq!(s.begin_frame(), SessionState::Lost);

        let s = s.finish_frame(FrameOutcome::Detected);
        assert!(s.is_tracking());
    }

    #[test]
    fn first_frame_failure_is_lost() {
        let s = SessionState::Idle.begin_frame().finish_frame(FrameOutcome::Failed);
        assert_eq!(s, SessionState::Lost);
    }
}
