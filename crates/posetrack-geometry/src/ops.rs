use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Matrix4, SMatrix, SVector, Vector3, Vector4};

const EPSILON: f64 = 1e-12;
const NUM_CONTROL_POINTS: usize = 4;
const MAX_ITERATIONS: usize = 6;
pub(crate) const PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
const NUM_PAIRS: usize = PAIRS.len();

/// Mean of a set of points.
pub(crate) fn centroid(pts: &[DVec3]) -> DVec3 {
    let n = pts.len().max(1) as f64;
    pts.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / n
}

pub(crate) fn to_na(m: &DMat3) -> Matrix3<f64> {
    Matrix3::from_column_slice(&m.to_cols_array())
}

pub(crate) fn from_na(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols_slice(m.as_slice())
}

/// Index of the smallest value of a slice.
pub(crate) fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(bi, bv), (i, &v)| {
            if v < bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

/// Whether three 2D points are (nearly) collinear, relative to their spread.
pub(crate) fn is_collinear(a: DVec2, b: DVec2, c: DVec2) -> bool {
    let ab = b - a;
    let ac = c - a;
    let area2 = ab.perp_dot(ac).abs();
    let scale = ab.length_squared().max(ac.length_squared());
    scale < EPSILON || area2 <= 1e-6 * scale
}

/// Whether any three points of the slice are collinear.
pub(crate) fn has_collinear_triple(pts: &[DVec2]) -> bool {
    let n = pts.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                if is_collinear(pts[i], pts[j], pts[k]) {
                    return true;
                }
            }
        }
    }
    false
}

/// Sample covariance of a point cloud around its centroid.
pub(crate) fn covariance(pts: &[DVec3], c: DVec3) -> Matrix3<f64> {
    let mut cov = Matrix3::zeros();
    for p in pts {
        let d = Vector3::new(p.x - c.x, p.y - c.y, p.z - c.z);
        cov += d * d.transpose();
    }
    cov / pts.len().max(1) as f64
}

/// Eigen decomposition of a symmetric 3x3 matrix, sorted by descending eigenvalue.
pub(crate) fn sorted_eigen3(m: &Matrix3<f64>) -> [(f64, DVec3); 3] {
    let eig = m.symmetric_eigen();
    let mut pairs = [0usize, 1, 2].map(|i| {
        let v = eig.eigenvectors.column(i);
        (eig.eigenvalues[i], DVec3::new(v[0], v[1], v[2]))
    });
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));
    pairs
}

/// Closest rotation matrix (in the Frobenius sense) to `m`.
pub(crate) fn nearest_rotation(m: &DMat3) -> Option<DMat3> {
    let svd = to_na(m).svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut d = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        let k = argmin(svd.singular_values.as_slice());
        d[(k, k)] = -1.0;
    }
    let r = from_na(&(u * d * v_t));
    r.is_finite().then_some(r)
}

/// Least-squares rigid alignment `dst ≈ R * src + t` (Kabsch).
///
/// Works for coplanar point sets as long as they are not collinear.
pub(crate) fn rigid_alignment(src: &[DVec3], dst: &[DVec3]) -> Option<(DMat3, DVec3)> {
    if src.len() != dst.len() || src.len() < 3 {
        return None;
    }
    let cs = centroid(src);
    let cd = centroid(dst);

    let mut h = Matrix3::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let a = Vector3::new(s.x - cs.x, s.y - cs.y, s.z - cs.z);
        let b = Vector3::new(d.x - cd.x, d.y - cd.y, d.z - cd.z);
        h += a * b.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let mut d = Matrix3::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        let k = argmin(svd.singular_values.as_slice());
        d[(k, k)] = -1.0;
    }
    let r = from_na(&(v * d * u.transpose()));
    let t = cd - r * cs;
    (r.is_finite() && t.is_finite()).then_some((r, t))
}

/// Solves the linear system A * x = b for a 4x4 symmetric positive-definite matrix A
/// using an unrolled Cholesky decomposition.
///
/// Returns `None` if `A` is not positive-definite.
#[inline(always)]
pub(crate) fn solve_4x4_cholesky(a: &Matrix4<f64>, b: &Vector4<f64>) -> Option<Vector4<f64>> {
    // L * L^T = A
    let l_11 = a.m11.sqrt();
    if !(l_11 > EPSILON) {
        return None;
    }
    let l_21 = a.m21 / l_11;
    let l_31 = a.m31 / l_11;
    let l_41 = a.m41 / l_11;

    let l_22_sq = a.m22 - l_21 * l_21;
    if l_22_sq < EPSILON {
        return None;
    }
    let l_22 = l_22_sq.sqrt();
    let l_32 = (a.m32 - l_31 * l_21) / l_22;
    let l_42 = (a.m42 - l_41 * l_21) / l_22;

    let l_33_sq = a.m33 - l_31 * l_31 - l_32 * l_32;
    if l_33_sq < EPSILON {
        return None;
    }
    let l_33 = l_33_sq.sqrt();
    let l_43 = (a.m43 - l_41 * l_31 - l_42 * l_32) / l_33;

    let l_44_sq = a.m44 - l_41 * l_41 - l_42 * l_42 - l_43 * l_43;
    if l_44_sq < EPSILON {
        return None;
    }
    let l_44 = l_44_sq.sqrt();

    // L * y = b
    let y1 = b[0] / l_11;
    let y2 = (b[1] - l_21 * y1) / l_22;
    let y3 = (b[2] - (l_31 * y1 + l_32 * y2)) / l_33;
    let y4 = (b[3] - (l_41 * y1 + l_42 * y2 + l_43 * y3)) / l_44;

    // L^T * x = y
    let x4 = y4 / l_44;
    let x3 = (y3 - l_43 * x4) / l_33;
    let x2 = (y2 - (l_32 * x3 + l_42 * x4)) / l_22;
    let x1 = (y1 - (l_21 * x2 + l_31 * x3 + l_41 * x4)) / l_11;
    Some(Vector4::new(x1, x2, x3, x4))
}

/// Gauss-Newton refinement of the EPnP betas against the control point distances.
pub(crate) fn gauss_newton(beta_init: [f64; 4], null4: &DMatrix<f64>, rho: &[f64; 6]) -> [f64; 4] {
    const DAMPING: f64 = 1e-12;
    const STOP_EPS: f64 = 1e-12;

    let mut bet = Vector4::from(beta_init);
    let rho_vec = SVector::<f64, NUM_PAIRS>::from_row_slice(rho);

    for _ in 0..MAX_ITERATIONS {
        let mut vs = [Vector3::zeros(); NUM_CONTROL_POINTS];
        for (i, v) in vs.iter_mut().enumerate() {
            let m: Matrix3x4<f64> = null4.fixed_view::<3, 4>(i * 3, 0).into();
            *v = m * bet;
        }

        let mut f = SVector::<f64, NUM_PAIRS>::zeros();
        let mut j = SMatrix::<f64, NUM_PAIRS, NUM_CONTROL_POINTS>::zeros();

        for (r, &(i, jj)) in PAIRS.iter().enumerate() {
            let diff = vs[i] - vs[jj];
            f[r] = diff.norm_squared();

            let rows_i = null4.fixed_rows::<3>(i * 3);
            let rows_jj = null4.fixed_rows::<3>(jj * 3);
            for k in 0..NUM_CONTROL_POINTS {
                let d_col = rows_i.column(k) - rows_jj.column(k);
                j[(r, k)] = 2.0 * diff.dot(&d_col);
            }
        }

        f -= rho_vec;

        let mut a = j.transpose() * j;
        let b = j.transpose() * f;
        for k in 0..NUM_CONTROL_POINTS {
            a[(k, k)] += DAMPING;
        }

        match solve_4x4_cholesky(&a, &b) {
            Some(delta) => {
                bet -= delta;
                if delta.norm() < STOP_EPS {
                    break;
                }
            }
            None => break,
        }
    }

    bet.into()
}
