use crate::config::ThresholdConfig;

/// Hysteresis controller for the shared feature-detection threshold.
///
/// More features than the high-water mark raise the threshold by one step, fewer than
/// the low-water mark lower it by one step. The value is always clamped to
/// `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThreshold {
    config: ThresholdConfig,
    value: f64,
}

impl AdaptiveThreshold {
    /// Start at the configured initial value, clamped.
    pub fn new(config: ThresholdConfig) -> Self {
        let value = config.initial.clamp(config.min, config.max);
        Self { config, value }
    }

    /// Current threshold.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Feed the number of features detected on the last frame; returns the new value.
    pub fn update(&mut self, feature_count: usize) -> f64 {
        let c = &self.config;
        if feature_count > c.high_water {
            self.value += c.step;
        } else if feature_count < c.low_water {
            self.value -= c.step;
        }
        self.value = self.value.clamp(c.min, c.max);
        self.value
    }
}
