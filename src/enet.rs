//! Elastic-net primitives: norm, ball projection, ball scaling and solvers.
//!
//! All functions share one mixing convention. For a ratio `r ∈ [0, 1]`:
//!
//! ```text
//! enet_norm(v, r) = Σ_i  r·|v_i| + (1 − r)·v_i²
//! ```
//!
//! so `r = 0` is the squared Euclidean norm and `r = 1` the L1 norm. The
//! projection and scaling routines target the ball `{ u : enet_norm(u, r) ≤ radius }`
//! under exactly this convention, which is what lets the dictionary sweep
//! account for the out-of-subset norm mass of an atom by simple addition.

use nalgebra::{DMatrix, DVector};

use crate::error::{DictFactError, Result};
use crate::matrix::dot;

/// Bisection steps used by [`enet_projection`]; enough to reach `f64` resolution.
const PROJECTION_MAX_STEPS: usize = 200;

/// Elastic-net norm of `v`.
#[inline]
pub fn enet_norm(v: &[f64], l1_ratio: f64) -> f64 {
    v.iter()
        .map(|&x| {
            let a = x.abs();
            a * (l1_ratio + (1.0 - l1_ratio) * a)
        })
        .sum()
}

/// Euclidean projection of `v` onto the elastic-net ball of `radius`, written to `out`.
///
/// Vectors already inside the ball are copied unchanged. A non-positive
/// radius collapses the output to zero. Otherwise the solution has the form
///
/// ```text
/// u_i = sign(v_i) · max(|v_i| − λ·r, 0) / (1 + 2λ·(1 − r))
/// ```
///
/// for the unique `λ > 0` putting `u` on the sphere; `λ` is found by
/// bisection and the feasible end of the bracket is returned, so
/// `enet_norm(out) ≤ radius` always holds.
pub fn enet_projection(v: &[f64], out: &mut [f64], radius: f64, l1_ratio: f64) {
    debug_assert_eq!(v.len(), out.len());
    if radius <= 0.0 {
        out.fill(0.0);
        return;
    }
    if enet_norm(v, l1_ratio) <= radius {
        out.copy_from_slice(v);
        return;
    }

    if l1_ratio <= 0.0 {
        let scale = (radius / dot(v, v)).sqrt();
        for (o, &x) in out.iter_mut().zip(v) {
            *o = x * scale;
        }
        return;
    }

    let shrink = |lambda: f64, out: &mut [f64]| {
        let denom = 1.0 + 2.0 * lambda * (1.0 - l1_ratio);
        for (o, &x) in out.iter_mut().zip(v) {
            let mag = (x.abs() - lambda * l1_ratio).max(0.0) / denom;
            *o = mag.copysign(x);
        }
    };

    // At lambda = max|v| / r every coordinate is thresholded to zero.
    let max_abs = v.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
    let mut lo = 0.0f64;
    let mut hi = max_abs / l1_ratio;
    if l1_ratio < 1.0 {
        // Ignoring the threshold, u = v / d is feasible once
        // (1 − r)·||v||²/d² + r·||v||₁/d <= radius, i.e. at the d below.
        let a = (1.0 - l1_ratio) * dot(v, v);
        let b = l1_ratio * v.iter().map(|x| x.abs()).sum::<f64>();
        let t = (-b + (b * b + 4.0 * a * radius).sqrt()) / (2.0 * a);
        let d = 1.0 / t;
        if d.is_finite() && d > 1.0 {
            hi = hi.min((d - 1.0) / (2.0 * (1.0 - l1_ratio)));
        }
    }
    for _ in 0..PROJECTION_MAX_STEPS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        shrink(mid, out);
        if enet_norm(out, l1_ratio) > radius {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    shrink(hi, out);
}

/// Rescale `v` in place so that `enet_norm(v, l1_ratio) == radius`.
///
/// Zero vectors are left untouched.
pub fn enet_scale(v: &mut [f64], l1_ratio: f64, radius: f64) {
    let l1: f64 = v.iter().map(|x| x.abs()).sum();
    let l2 = dot(v, v);
    if l1 == 0.0 {
        return;
    }
    // Solve (1 − r)·l2·s² + r·l1·s − radius = 0 for s > 0.
    let a = (1.0 - l1_ratio) * l2;
    let b = l1_ratio * l1;
    let s = if a > 0.0 {
        (-b + (b * b + 4.0 * a * radius).sqrt()) / (2.0 * a)
    } else {
        radius / b
    };
    for x in v.iter_mut() {
        *x *= s;
    }
}

// =============================================================================
// Coordinate descent
// =============================================================================

/// Parameters of the Gram-form elastic-net coordinate descent.
#[derive(Clone, Copy, Debug)]
pub struct CdParams {
    /// L1 penalty weight.
    pub alpha: f64,
    /// L2 penalty weight.
    pub beta: f64,
    pub max_iter: usize,
    /// Relative tolerance, scaled by `||y||²` for the duality gap.
    pub tol: f64,
    pub positive: bool,
}

/// Coordinate descent for
///
/// ```text
/// min_w  1/2 wᵗ·G·w − qᵗ·w + alpha·||w||₁ + beta/2·||w||²
/// ```
///
/// where `G` (flat row-major, `n × n`) and `q` are the Gram matrix and
/// cross-products of a design against the target row `y`. `w` is used as the
/// warm start and overwritten. Iterates cyclically until the duality gap
/// falls under `tol·||y||²` or `max_iter` sweeps are spent; hitting the cap
/// is not an error. Returns the number of sweeps performed.
pub fn enet_coordinate_descent_gram(
    w: &mut [f64],
    gram: &[f64],
    q: &[f64],
    y: &[f64],
    params: &CdParams,
) -> usize {
    let n = w.len();
    debug_assert_eq!(gram.len(), n * n);
    debug_assert_eq!(q.len(), n);

    let CdParams {
        alpha,
        beta,
        max_iter,
        tol,
        positive,
    } = *params;
    let y_norm2 = dot(y, y);
    let gap_tol = tol * y_norm2;
    let d_w_tol = tol;

    // h = G·w
    let mut h: Vec<f64> = (0..n).map(|i| dot(&gram[i * n..(i + 1) * n], w)).collect();

    for n_iter in 0..max_iter {
        let mut w_max = 0.0f64;
        let mut d_w_max = 0.0f64;

        for ii in 0..n {
            let g_row = &gram[ii * n..(ii + 1) * n];
            let g_ii = g_row[ii];
            if g_ii == 0.0 {
                continue;
            }
            let w_ii = w[ii];
            if w_ii != 0.0 {
                for (hj, &gj) in h.iter_mut().zip(g_row) {
                    *hj -= w_ii * gj;
                }
            }

            let tmp = q[ii] - h[ii];
            w[ii] = if positive && tmp < 0.0 {
                0.0
            } else {
                (tmp.abs() - alpha).max(0.0).copysign(tmp) / (g_ii + beta)
            };

            if w[ii] != 0.0 {
                let w_new = w[ii];
                for (hj, &gj) in h.iter_mut().zip(g_row) {
                    *hj += w_new * gj;
                }
            }

            d_w_max = d_w_max.max((w[ii] - w_ii).abs());
            w_max = w_max.max(w[ii].abs());
        }

        if w_max == 0.0 || d_w_max / w_max < d_w_tol || n_iter + 1 == max_iter {
            let gap = duality_gap(w, &h, q, y_norm2, alpha, beta, positive);
            if gap < gap_tol {
                return n_iter + 1;
            }
        }
    }
    max_iter
}

fn duality_gap(
    w: &[f64],
    h: &[f64],
    q: &[f64],
    y_norm2: f64,
    alpha: f64,
    beta: f64,
    positive: bool,
) -> f64 {
    let q_dot_w = dot(w, q);
    let dual_norm = w
        .iter()
        .zip(h)
        .zip(q)
        .map(|((&wi, &hi), &qi)| {
            let xta = qi - hi - beta * wi;
            if positive {
                xta
            } else {
                xta.abs()
            }
        })
        .fold(f64::NEG_INFINITY, f64::max);
    let r_norm2 = y_norm2 + dot(h, w) - 2.0 * q_dot_w;
    let w_norm2 = dot(w, w);

    let (constant, mut gap) = if dual_norm > alpha {
        let c = alpha / dual_norm;
        (c, 0.5 * (r_norm2 + r_norm2 * c * c))
    } else {
        (1.0, r_norm2)
    };
    let l1_norm: f64 = w.iter().map(|x| x.abs()).sum();
    gap += alpha * l1_norm - constant * y_norm2
        + constant * q_dot_w
        + 0.5 * beta * (1.0 + constant * constant) * w_norm2;
    gap
}

// =============================================================================
// Ridge
// =============================================================================

/// Factorization of `G + alpha·I`, reused across every row solved against it.
pub enum RidgeFactor {
    Cholesky(nalgebra::Cholesky<f64, nalgebra::Dyn>),
    Lu(nalgebra::LU<f64, nalgebra::Dyn, nalgebra::Dyn>),
}

impl RidgeFactor {
    /// Factor `gram + alpha·I` (`gram` flat row-major `n × n`).
    ///
    /// Falls back to LU when the system is not numerically positive
    /// definite, and fails only when it is singular.
    pub fn new(gram: &[f64], n: usize, alpha: f64) -> Result<Self> {
        if gram.len() != n * n {
            return Err(DictFactError::DimensionMismatch {
                expected: n * n,
                got: gram.len(),
            });
        }
        let mut a = DMatrix::from_row_slice(n, n, gram);
        for i in 0..n {
            a[(i, i)] += alpha;
        }
        if let Some(chol) = a.clone().cholesky() {
            return Ok(RidgeFactor::Cholesky(chol));
        }
        let lu = a.lu();
        if !lu.is_invertible() {
            return Err(DictFactError::Numerical(format!(
                "ridge system of size {n} with alpha={alpha} is singular"
            )));
        }
        Ok(RidgeFactor::Lu(lu))
    }

    /// Overwrite `rhs` with the solution of `(G + alpha·I)·x = rhs`.
    pub fn solve_in_place(&self, rhs: &mut [f64]) -> Result<()> {
        let b = DVector::from_column_slice(rhs);
        let x = match self {
            RidgeFactor::Cholesky(chol) => chol.solve(&b),
            RidgeFactor::Lu(lu) => lu
                .solve(&b)
                .ok_or_else(|| DictFactError::Numerical("LU solve failed".into()))?,
        };
        rhs.copy_from_slice(x.as_slice());
        Ok(())
    }
}
