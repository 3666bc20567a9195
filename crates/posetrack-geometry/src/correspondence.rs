use glam::{DVec2, DVec3};

/// Reference side of a correspondence: a point on the registered target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    /// World position of the point (the target plane is `Z = 0`).
    pub world: DVec3,
    /// Index of the point in the reference repository.
    pub index: usize,
}

impl ReferencePoint {
    /// Create a reference point.
    pub fn new(world: DVec3, index: usize) -> Self {
        Self { world, index }
    }
}

/// Scene side of a correspondence: a point observed in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePoint {
    /// Pixel position in the current frame.
    pub image: DVec2,
    /// Descriptor distance of the match, lower is better.
    pub distance: f64,
}

impl ScenePoint {
    /// Create a scene point.
    pub fn new(image: DVec2, distance: f64) -> Self {
        Self { image, distance }
    }
}

/// Paired reference and scene points with one outlier flag per pair.
///
/// Both sequences always have the same length and index `i` refers to the same match in
/// each. The outlier flag belongs to the pair, so there is no way to mark one side only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceSet {
    reference: Vec<ReferencePoint>,
    scene: Vec<ScenePoint>,
    outlier: Vec<bool>,
}

impl CorrespondenceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for `capacity` pairs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            reference: Vec::with_capacity(capacity),
            scene: Vec::with_capacity(capacity),
            outlier: Vec::with_capacity(capacity),
        }
    }

    /// Append a pair, initially flagged as inlier.
    pub fn push(&mut self, reference: ReferencePoint, scene: ScenePoint) {
        self.reference.push(reference);
        self.scene.push(scene);
        self.outlier.push(false);
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    /// Whether the set has no pairs.
    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Reference side, in pair order.
    pub fn reference(&self) -> &[ReferencePoint] {
        &self.reference
    }

    /// Scene side, in pair order.
    pub fn scene(&self) -> &[ScenePoint] {
        &self.scene
    }

    /// Outlier flags, in pair order.
    pub fn outliers(&self) -> &[bool] {
        &self.outlier
    }

    /// Whether pair `i` is flagged as outlier. Out of range pairs are outliers.
    pub fn is_outlier(&self, i: usize) -> bool {
        self.outlier.get(i).copied().unwrap_or(true)
    }

    /// Set the outlier flag of pair `i`. Out of range indices are ignored.
    pub fn set_outlier(&mut self, i: usize, outlier: bool) {
        if let Some(flag) = self.outlier.get_mut(i) {
            *flag = outlier;
        }
    }

    /// Mark every pair as inlier.
    pub fn reset_flags(&mut self) {
        self.outlier.iter_mut().for_each(|f| *f = false);
    }

    /// Number of pairs not flagged as outlier.
    pub fn inlier_count(&self) -> usize {
        self.outlier.iter().filter(|&&o| !o).count()
    }

    /// Indices of pairs not flagged as outlier.
    pub fn inlier_indices(&self) -> Vec<usize> {
        self.outlier
            .iter()
            .enumerate()
            .filter_map(|(i, &o)| (!o).then_some(i))
            .collect()
    }

    /// New set holding only the inlier pairs.
    pub fn inliers(&self) -> Self {
        self.iter()
            .filter(|(_, _, outlier)| !outlier)
            .map(|(r, s, _)| (*r, *s))
            .collect()
    }

    /// Iterate over `(reference, scene, outlier)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&ReferencePoint, &ScenePoint, bool)> + '_ {
        self.reference
            .iter()
            .zip(self.scene.iter())
            .zip(self.outlier.iter())
            .map(|((r, s), &o)| (r, s, o))
    }

    /// Remove all pairs.
    pub fn clear(&mut self) {
        self.reference.clear();
        self.scene.clear();
        self.outlier.clear();
    }
}

impl FromIterator<(ReferencePoint, ScenePoint)> for CorrespondenceSet {
    fn from_iter<T: IntoIterator<Item = (ReferencePoint, ScenePoint)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (r, s) in iter {
            set.push(r, s);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set(n: usize) -> CorrespondenceSet {
        (0..n)
            .map(|i| {
                let f = i as f64;
                (
                    ReferencePoint::new(DVec3::new(f, -f, 0.0), i),
                    ScenePoint::new(DVec2::new(2.0 * f, f), f * 0.1),
                )
            })
            .collect()
    }

    #[test]
    fn parallel_lengths() {
        let set = sample_set(5);
        assert_eq!(set.len(), 5);
        assert_eq!(set.reference().len(), set.scene().len());
        assert_eq!(set.outliers().len(), 5);
        assert_eq!(set.inlier_count(), 5);
    }

    #[test]
    fn flag_is_per_pair() {
        let mut set = sample_set(4);
        set.set_outlier(1, true);
        set.set_outlier(3, true);
        set.set_outlier(10, true);
        assert!(set.is_outlier(1));
        assert!(!set.is_outlier(2));
        assert!(set.is_outlier(10));
        assert_eq!(set.inlier_indices(), vec![0, 2]);

        let inliers = set.inliers();
        assert_eq!(inliers.len(), 2);
        assert_eq!(inliers.reference()[1].index, 2);
        assert_eq!(inliers.scene()[1].image, DVec2::new(4.0, 2.0));

        set.reset_flags();
        assert_eq!(set.inlier_count(), 4);
    }

    #[test]
    fn empty_set() {
        let mut set = sample_set(3);
        set.clear();
        assert!(set.is_empty());
        assert!(set.inliers().is_empty());
    }
}
