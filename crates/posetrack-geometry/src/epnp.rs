//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp

use crate::camera::CameraIntrinsics;
use crate::ops::{centroid, covariance, gauss_newton, rigid_alignment, sorted_eigen3, PAIRS};
use crate::transform::Pose;
use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, DVector, Vector4};
use thiserror::Error;

/// Error types for PnP solvers.
#[derive(Debug, Error, PartialEq)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the solver
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths
    #[error("Mismatched array lengths: world points ({0}) != image points ({1})")]
    MismatchedArrayLengths(usize, usize),

    /// World points do not span three dimensions.
    #[error("Degenerate world point configuration: {0}")]
    DegenerateConfiguration(String),

    /// None of the beta approximations produced a finite pose.
    #[error("EPnP failed to produce a valid pose")]
    NoSolution,
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone)]
pub struct EPnPParams {
    /// Tolerance of the least-squares solves on the L matrix.
    pub svd_eps: f64,
    /// Minimum ratio between the smallest and largest principal spread of the world points.
    pub min_spread_ratio: f64,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            svd_eps: 1e-12,
            min_spread_ratio: 1e-6,
        }
    }
}

/// Pose returned by [`solve_epnp`] together with its reprojection error.
#[derive(Debug, Clone, Copy)]
pub struct EPnPResult {
    /// Estimated world -> camera pose.
    pub pose: Pose,
    /// Root-mean-square reprojection error in pixels.
    pub reproj_rmse: f64,
}

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the world frame, `N ≥ 4`, not coplanar.
/// * `points_image` – Corresponding pixel coordinates.
/// * `intrinsics` – Camera intrinsics.
///
/// The returned pose maps **world → camera**.
pub fn solve_epnp(
    points_world: &[DVec3],
    points_image: &[DVec2],
    intrinsics: &CameraIntrinsics,
    params: &EPnPParams,
) -> Result<EPnPResult, PnPError> {
    let n = points_world.len();
    if n != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths(n, points_image.len()));
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let cw = select_control_points(points_world, params.min_spread_ratio)?;
    let alphas = compute_barycentric(points_world, &cw)?;

    let m = build_m(&alphas, points_image, intrinsics);

    // null space of M from the 12x12 normal matrix, columns by ascending eigenvalue
    let mtm = m.transpose() * &m;
    let eig = mtm.symmetric_eigen();
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let mut null4 = DMatrix::<f64>::zeros(12, 4);
    for (c, &idx) in order.iter().take(4).enumerate() {
        null4.set_column(c, &eig.eigenvectors.column(idx));
    }

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let betas = [
        estimate_beta(&[0, 1, 3, 6], &l, &rho_vec, params.svd_eps).and_then(betas_approx_1),
        estimate_beta(&[0, 1, 2], &l, &rho_vec, params.svd_eps).and_then(betas_approx_2),
        estimate_beta(&[0, 1, 2, 3, 4], &l, &rho_vec, params.svd_eps).and_then(betas_approx_3),
    ];

    let mut best: Option<EPnPResult> = None;
    for beta in betas.into_iter().flatten() {
        let refined = gauss_newton(beta, &null4, &rho);
        let Some(pose) = pose_from_betas(&refined, &null4, points_world, &alphas) else {
            continue;
        };
        let err = rmse_px(points_world, points_image, &pose, intrinsics);
        if err.is_finite() && best.map_or(true, |b| err < b.reproj_rmse) {
            best = Some(EPnPResult {
                pose,
                reproj_rmse: err,
            });
        }
    }

    best.ok_or(PnPError::NoSolution)
}

/// Pick the centroid plus the three principal axes, scaled by their spread.
fn select_control_points(points_world: &[DVec3], min_ratio: f64) -> Result<[DVec3; 4], PnPError> {
    let c = centroid(points_world);
    let axes = sorted_eigen3(&covariance(points_world, c));

    let largest = axes[0].0.max(0.0).sqrt();
    let smallest = axes[2].0.max(0.0).sqrt();
    if !(largest > 0.0) || smallest < min_ratio * largest {
        return Err(PnPError::DegenerateConfiguration(format!(
            "principal spreads {largest:.3e} / {smallest:.3e}"
        )));
    }

    let mut cw = [c; 4];
    for (i, (lambda, axis)) in axes.iter().enumerate() {
        cw[i + 1] = c + lambda.max(0.0).sqrt() * *axis;
    }
    Ok(cw)
}

/// Barycentric coordinates of the world points with respect to the control points.
///
/// Each result `[a0, a1, a2, a3]` sums to one and `pw = Σ aj * cw[j]`.
fn compute_barycentric(points_world: &[DVec3], cw: &[DVec3; 4]) -> Result<Vec<[f64; 4]>, PnPError> {
    let b = DMat3::from_cols(cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]);
    if b.determinant().abs() < f64::EPSILON {
        return Err(PnPError::DegenerateConfiguration(
            "singular control point basis".to_string(),
        ));
    }
    let b_inv = b.inverse();

    Ok(points_world
        .iter()
        .map(|&p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Construct the 2N×12 design matrix **M**.
fn build_m(alphas: &[[f64; 4]], points_image: &[DVec2], k: &CameraIntrinsics) -> DMatrix<f64> {
    let n = alphas.len();
    let mut m = DMatrix::<f64>::zeros(2 * n, 12);

    for (i, (a, uv)) in alphas.iter().zip(points_image.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * k.fx;
            m[(row_x, base + 2)] = alpha * (k.cx - uv.x);
            m[(row_y, base + 1)] = alpha * k.fy;
            m[(row_y, base + 2)] = alpha * (k.cy - uv.y);
        }
    }

    m
}

/// Build the 6×10 matrix **L** from the null-space basis (column 0 = smallest eigenvalue).
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let blocks: Vec<[DVec3; 4]> = (0..4)
        .map(|c| {
            let col = null4.column(c);
            std::array::from_fn(|k| DVec3::new(col[3 * k], col[3 * k + 1], col[3 * k + 2]))
        })
        .collect();

    let dv: Vec<[DVec3; 6]> = blocks
        .iter()
        .map(|v| PAIRS.map(|(a, b)| v[a] - v[b]))
        .collect();

    let mut l = [[0.0; 10]; 6];
    for (j, row) in l.iter_mut().enumerate() {
        row[0] = dv[0][j].dot(dv[0][j]);
        row[1] = 2.0 * dv[0][j].dot(dv[1][j]);
        row[2] = dv[1][j].dot(dv[1][j]);
        row[3] = 2.0 * dv[0][j].dot(dv[2][j]);
        row[4] = 2.0 * dv[1][j].dot(dv[2][j]);
        row[5] = dv[2][j].dot(dv[2][j]);
        row[6] = 2.0 * dv[0][j].dot(dv[3][j]);
        row[7] = 2.0 * dv[1][j].dot(dv[3][j]);
        row[8] = 2.0 * dv[2][j].dot(dv[3][j]);
        row[9] = dv[3][j].dot(dv[3][j]);
    }
    l
}

/// Least-squares solve of the selected L columns against rho.
fn estimate_beta(cols: &[usize], l: &[[f64; 10]; 6], rho: &DVector<f64>, eps: f64) -> Option<Vec<f64>> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    let l_sub = DMatrix::<f64>::from_column_slice(6, cols.len(), &data);
    let sol = l_sub.svd(true, true).solve(rho, eps).ok()?;
    Some(sol.iter().copied().collect())
}

/// betas from `[B11 B12 B13 B14]`.
fn betas_approx_1(b: Vec<f64>) -> Option<[f64; 4]> {
    let (b0, sign) = if b[0] < 0.0 { ((-b[0]).sqrt(), -1.0) } else { (b[0].sqrt(), 1.0) };
    if b0 == 0.0 {
        return None;
    }
    Some([b0, sign * b[1] / b0, sign * b[2] / b0, sign * b[3] / b0])
}

/// betas from `[B11 B12 B22]`.
fn betas_approx_2(b: Vec<f64>) -> Option<[f64; 4]> {
    let (mut b0, b1) = if b[0] < 0.0 {
        ((-b[0]).sqrt(), if b[2] < 0.0 { (-b[2]).sqrt() } else { 0.0 })
    } else {
        (b[0].sqrt(), if b[2] > 0.0 { b[2].sqrt() } else { 0.0 })
    };
    if b[1] < 0.0 {
        b0 = -b0;
    }
    Some([b0, b1, 0.0, 0.0])
}

/// betas from `[B11 B12 B22 B13 B23]`.
fn betas_approx_3(b: Vec<f64>) -> Option<[f64; 4]> {
    let (mut b0, b1) = if b[0] < 0.0 {
        ((-b[0]).sqrt(), if b[2] < 0.0 { (-b[2]).sqrt() } else { 0.0 })
    } else {
        (b[0].sqrt(), if b[2] > 0.0 { b[2].sqrt() } else { 0.0 })
    };
    if b[1] < 0.0 {
        b0 = -b0;
    }
    if b0 == 0.0 {
        return None;
    }
    Some([b0, b1, b[3] / b0, 0.0])
}

/// Compute the pose from a set of betas using the null-space vectors.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    points_world: &[DVec3],
    alphas: &[[f64; 4]],
) -> Option<Pose> {
    let cc_flat = null4 * Vector4::from(*betas);
    let cc: [DVec3; 4] =
        std::array::from_fn(|i| DVec3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]));

    let mut pcs: Vec<DVec3> = alphas
        .iter()
        .map(|a| a[0] * cc[0] + a[1] * cc[1] + a[2] * cc[2] + a[3] * cc[3])
        .collect();

    // the solution is defined up to sign, keep the points in front of the camera
    if pcs.first().is_some_and(|p| p.z < 0.0) {
        pcs.iter_mut().for_each(|p| *p = -*p);
    }

    let (rotation, translation) = rigid_alignment(points_world, &pcs)?;
    Some(Pose::new(rotation, translation))
}

/// The six squared distances between the control points.
fn rho_ctrlpts(cw: &[DVec3; 4]) -> [f64; 6] {
    PAIRS.map(|(i, j)| cw[i].distance_squared(cw[j]))
}

/// Root-mean-square reprojection error in pixels.
fn rmse_px(points_world: &[DVec3], points_image: &[DVec2], pose: &Pose, k: &CameraIntrinsics) -> f64 {
    let sum_sq: f64 = points_world
        .iter()
        .zip(points_image.iter())
        .map(|(&pw, &uv)| match pose.project(pw, k) {
            Some(p) => p.distance_squared(uv),
            None => f64::INFINITY,
        })
        .sum();
    (sum_sq / points_world.len() as f64).sqrt()
}
