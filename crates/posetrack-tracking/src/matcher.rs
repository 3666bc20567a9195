use crate::collaborators::DescriptorMatcher;
use crate::config::MatcherConfig;
use crate::feature::{FeatureMatch, FeaturePoint};

/// Euclidean distance between two descriptors of equal length.
#[inline]
fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = (x - y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Brute-force nearest neighbour matching of float descriptors.
///
/// For each reference descriptor the nearest scene descriptor is found. Matches can be
/// filtered by maximum distance, mutual nearest neighbour and Lowe's ratio test.
/// Descriptors whose length differs from the reference descriptor are never matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BruteForceMatcher {
    config: MatcherConfig,
}

impl BruteForceMatcher {
    /// Create a matcher with the given filters.
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Filters in use.
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }
}

impl DescriptorMatcher for BruteForceMatcher {
    fn match_features(
        &self,
        reference: &[FeaturePoint],
        scene: &[FeaturePoint],
    ) -> Vec<FeatureMatch> {
        let m = reference.len();
        let n = scene.len();
        if m == 0 || n == 0 {
            return vec![];
        }

        // Forward pass: best and second best scene descriptor per reference.
        let mut best_j = vec![usize::MAX; m];
        let mut best_dist = vec![f64::INFINITY; m];
        let mut second_dist = vec![f64::INFINITY; m];
        let mut rev_best_i = vec![usize::MAX; n];
        let mut rev_dist = vec![f64::INFINITY; n];

        for (i, r) in reference.iter().enumerate() {
            if r.descriptor.is_empty() {
                continue;
            }
            for (j, s) in scene.iter().enumerate() {
                if s.descriptor.len() != r.descriptor.len() {
                    continue;
                }
                let dist = l2_distance(&r.descriptor, &s.descriptor);
                if dist < best_dist[i] {
                    second_dist[i] = best_dist[i];
                    best_dist[i] = dist;
                    best_j[i] = j;
                } else if dist < second_dist[i] {
                    second_dist[i] = dist;
                }
                if dist < rev_dist[j] {
                    rev_dist[j] = dist;
                    rev_best_i[j] = i;
                }
            }
        }

        let mut matches = Vec::new();
        for i in 0..m {
            let j = best_j[i];
            if j == usize::MAX {
                continue;
            }
            let dist = best_dist[i];

            if let Some(max_dist) = self.config.max_distance {
                if dist > max_dist {
                    continue;
                }
            }

            if self.config.cross_check && rev_best_i[j] != i {
                continue;
            }

            if let Some(ratio) = self.config.max_ratio {
                if ratio < 1.0 && second_dist[i].is_finite() {
                    let denom = second_dist[i].max(f64::EPSILON);
                    if dist / denom >= ratio {
                        continue;
                    }
                }
            }

            matches.push(FeatureMatch {
                reference: i,
                scene: j,
                distance: dist,
            });
        }

        matches
    }
}
