use crate::ops::{argmin, from_na};
use crate::transform::Homography;
use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, Matrix3};
use thiserror::Error;

/// Error types for homography estimation.
#[derive(Debug, Error, PartialEq)]
pub enum HomographyError {
    /// Fewer than four correspondences were given.
    #[error("Homography requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },

    /// Source and destination lengths differ.
    #[error("Mismatched array lengths: source ({0}) != destination ({1})")]
    MismatchedArrayLengths(usize, usize),

    /// The points do not determine a unique, non-singular homography.
    #[error("Degenerate point configuration")]
    Degenerate,
}

/// Similarity transform moving the centroid to the origin and the mean distance to sqrt(2).
fn normalization(pts: &[DVec2]) -> Option<DMat3> {
    let n = pts.len() as f64;
    let c = pts.iter().fold(DVec2::ZERO, |acc, &p| acc + p) / n;
    let mean_dist = pts.iter().map(|p| p.distance(c)).sum::<f64>() / n;
    if !(mean_dist > f64::EPSILON) {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(DMat3::from_cols(
        DVec3::new(s, 0.0, 0.0),
        DVec3::new(0.0, s, 0.0),
        DVec3::new(-s * c.x, -s * c.y, 1.0),
    ))
}

/// Estimate the homography mapping `src` to `dst` with the normalized DLT.
///
/// Both point sets are conditioned (Hartley normalization) before solving, and the
/// result is denormalized and scaled so `H[2][2] == 1`. With more than four points the
/// result is the algebraic least-squares solution.
///
/// # Errors
///
/// Fails with fewer than four points, mismatched lengths, or a degenerate configuration.
pub fn homography_dlt(src: &[DVec2], dst: &[DVec2]) -> Result<Homography, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::MismatchedArrayLengths(src.len(), dst.len()));
    }
    let n = src.len();
    if n < 4 {
        return Err(HomographyError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let t_src = normalization(src).ok_or(HomographyError::Degenerate)?;
    let t_dst = normalization(dst).ok_or(HomographyError::Degenerate)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let p = t_src * s.extend(1.0);
        let q = t_dst * d.extend(1.0);
        let (x, y) = (p.x, p.y);
        let (u, v) = (q.x, q.y);

        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    // null vector of A from the 9x9 normal matrix, avoids the truncated V of a thin SVD
    let ata = a.transpose() * &a;
    let eig = ata.symmetric_eigen();
    let k = argmin(eig.eigenvalues.as_slice());
    let h = eig.eigenvectors.column(k);

    let hn = from_na(&Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]));
    let denorm = t_dst.inverse() * hn * t_src;

    Homography::new(denorm).ok_or(HomographyError::Degenerate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ground_truth() -> Homography {
        Homography::from_rows([[1.2, 0.1, 30.0], [-0.05, 0.9, 12.0], [1e-4, -2e-4, 1.0]]).unwrap()
    }

    #[test]
    fn dlt_minimal() -> Result<(), HomographyError> {
        let h = ground_truth();
        let src = [
            DVec2::new(0.0, 0.0),
            DVec2::new(100.0, 0.0),
            DVec2::new(100.0, 80.0),
            DVec2::new(0.0, 80.0),
        ];
        let dst: Vec<DVec2> = src.iter().map(|&p| h.apply(p).unwrap()).collect();
        let est = homography_dlt(&src, &dst)?;
        for (a, b) in est.to_rows().iter().flatten().zip(h.to_rows().iter().flatten()) {
            assert_relative_eq!(a, b, epsilon = 1e-8);
        }
        Ok(())
    }

    #[test]
    fn dlt_overdetermined() -> Result<(), HomographyError> {
        let h = ground_truth();
        let src: Vec<DVec2> = (0..30)
            .map(|i| DVec2::new((i % 6) as f64 * 17.0 - 40.0, (i / 6) as f64 * 13.0 - 25.0))
            .collect();
        let dst: Vec<DVec2> = src.iter().map(|&p| h.apply(p).unwrap()).collect();
        let est = homography_dlt(&src, &dst)?;
        assert!(est.frobenius_distance(&h) < 1e-8);
        Ok(())
    }

    #[test]
    fn dlt_errors() {
        let pts = [DVec2::ZERO; 3];
        assert_eq!(
            homography_dlt(&pts, &pts),
            Err(HomographyError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        );
        assert_eq!(
            homography_dlt(&[DVec2::ZERO; 4], &[DVec2::ZERO; 5]),
            Err(HomographyError::MismatchedArrayLengths(4, 5))
        );
        assert_eq!(
            homography_dlt(&[DVec2::ONE; 4], &[DVec2::ONE; 4]),
            Err(HomographyError::Degenerate)
        );
    }
}
