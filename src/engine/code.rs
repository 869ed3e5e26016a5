//! Code inference: elastic-net codes for a batch of rows.
//!
//! Each row `x` gets the code
//!
//! ```text
//! a = argmin 1/2 aᵗ·G·a − aᵗ·Dx + alpha·(r·||a||₁ + (1 − r)·||a||²/2)
//! ```
//!
//! where `G ≈ D·Dᵗ` and `Dx ≈ D·x` come from one of three [`Aggregation`]
//! regimes, picked independently for `G` and `Dx`:
//!
//! | Regime    | Estimate                                               | Cost / batch      |
//! |-----------|--------------------------------------------------------|-------------------|
//! | `Full`    | exact, over all features                               | O(k · n_features) |
//! | `Masked`  | subset product × reduction (unbiased, high variance)   | O(k · subset)     |
//! | `Average` | masked estimate blended into a per-sample running mean | O(k · subset)     |
//!
//! With `r = 0` and no sign constraint the code is the ridge solution
//! `(G + alpha·I)⁻¹·Dx`; otherwise it comes from warm-started coordinate descent.

use std::borrow::Cow;

use crate::config::{Aggregation, DictFactConfig};
use crate::enet::{enet_coordinate_descent_gram, CdParams, RidgeFactor};
use crate::engine::parallel::Executor;
use crate::engine::statistics::{blend, SampleCache};
use crate::error::{DictFactError, Result};
use crate::matrix::Matrix;

/// Sweep cap of the per-row coordinate descent.
pub const CD_MAX_ITER: usize = 100;
/// Duality-gap tolerance of the per-row coordinate descent.
pub const CD_TOL: f64 = 1e-2;

/// Code penalty and constraint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CodeParams {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub positive: bool,
}

impl CodeParams {
    pub fn from_config(config: &DictFactConfig) -> Self {
        Self {
            alpha: config.code_alpha,
            l1_ratio: config.code_l1_ratio,
            positive: config.code_pos,
        }
    }

    /// Unconstrained pure-L2 penalty: solved in closed form. A positive
    /// ridge goes through coordinate descent with a zero L1 weight.
    fn is_ridge(&self) -> bool {
        self.l1_ratio == 0.0 && !self.positive
    }

    fn cd_params(&self) -> CdParams {
        CdParams {
            alpha: self.alpha * self.l1_ratio,
            beta: self.alpha * (1.0 - self.l1_ratio),
            max_iter: CD_MAX_ITER,
            tol: CD_TOL,
            positive: self.positive,
        }
    }
}

/// Gram matrix (or matrices) the codes are solved against.
#[derive(Clone, Copy, Debug)]
pub enum GramRef<'a> {
    /// One `k × k` matrix shared by every row.
    Shared(&'a Matrix),
    /// One flattened `k × k` matrix per row (`rows × k²`).
    PerSample(&'a Matrix),
}

/// One batch of rows to infer codes for.
#[derive(Clone, Copy, Debug)]
pub struct CodeBatch<'a> {
    /// Batch rows, `batch × n_features`.
    pub x: &'a Matrix,
    /// Sample id of every batch row.
    pub ids: &'a [usize],
    /// Per-sample averaging weights, aligned with `ids`.
    pub sample_weights: &'a [f64],
    /// Active feature subset, sorted.
    pub subset: &'a [usize],
}

/// Infer codes for `batch` and write them into the rows `batch.ids` of `code`.
///
/// `gram` is the maintained `D·Dᵗ`, required when the Gram aggregation is
/// `Full` (it is recomputed if missing). Updates the `Average` caches of
/// `cache` for the batch samples; nothing else outside `code` is written.
pub fn compute_code(
    executor: &Executor,
    config: &DictFactConfig,
    components: &Matrix,
    gram: Option<&Matrix>,
    cache: &mut SampleCache,
    code: &mut Matrix,
    batch: CodeBatch<'_>,
) -> Result<()> {
    let CodeBatch {
        x,
        ids,
        sample_weights,
        subset,
    } = batch;
    let k = components.rows();
    let reduction = config.reduction;

    let components_subset = if config.dx_agg != Aggregation::Full || config.g_agg != Aggregation::Full
    {
        let mut block = Matrix::zeros(0, 0);
        components.gather_columns(subset, &mut block);
        Some(block)
    } else {
        None
    };

    // Cross-products, batch × k
    let dx = match (config.dx_agg, &components_subset) {
        (Aggregation::Full, _) | (_, None) => x.mul_transpose(components),
        (agg, Some(comp_sub)) => {
            let mut x_sub = Matrix::zeros(0, 0);
            x.gather_columns(subset, &mut x_sub);
            let mut dx = x_sub.mul_transpose(comp_sub);
            dx.scale(reduction);
            if agg == Aggregation::Average {
                if let Some(dx_average) = cache.dx_average.as_mut() {
                    for (i, &id) in ids.iter().enumerate() {
                        let avg = dx_average.row_mut(id);
                        blend(avg, dx.row(i), sample_weights[i]);
                        dx.row_mut(i).copy_from_slice(avg);
                    }
                }
            }
            dx
        }
    };

    // Gram matrix
    let per_sample;
    let shared: Cow<'_, Matrix>;
    let gram_ref = match (config.g_agg, &components_subset) {
        (Aggregation::Full, _) | (_, None) => {
            shared = match gram {
                Some(g) => Cow::Borrowed(g),
                None => Cow::Owned(components.gram()),
            };
            GramRef::Shared(&shared)
        }
        (Aggregation::Masked, Some(comp_sub)) => {
            let mut g = comp_sub.gram();
            g.scale(reduction);
            shared = Cow::Owned(g);
            GramRef::Shared(&shared)
        }
        (Aggregation::Average, Some(comp_sub)) => {
            let mut estimate = comp_sub.gram();
            estimate.scale(reduction);
            let g_average = cache.g_average.as_mut().ok_or_else(|| {
                DictFactError::InvalidConfig(
                    "Average Gram aggregation needs a per-sample Gram cache".into(),
                )
            })?;
            let mut rows = g_average.select_rows(ids);
            executor.for_each_row_block(rows.data_mut(), k * k, |first, block| {
                for (r, g_row) in block.chunks_mut(k * k).enumerate() {
                    blend(g_row, estimate.data(), sample_weights[first + r]);
                }
                Ok(())
            })?;
            g_average.scatter_rows(ids, &rows);
            per_sample = rows;
            GramRef::PerSample(&per_sample)
        }
    };

    let mut this_code = code.select_rows(ids);
    solve_codes(
        executor,
        gram_ref,
        &dx,
        x,
        &mut this_code,
        &CodeParams::from_config(config),
    )?;
    code.scatter_rows(ids, &this_code);
    Ok(())
}

/// Solve every row of `codes` in place (the current values are the warm start).
///
/// Rows are split into contiguous blocks, one per worker; each block reads
/// the shared `gram`, `dx` and `x` and writes only its own code rows.
pub fn solve_codes(
    executor: &Executor,
    gram: GramRef<'_>,
    dx: &Matrix,
    x: &Matrix,
    codes: &mut Matrix,
    params: &CodeParams,
) -> Result<()> {
    let k = codes.cols();
    let cd = params.cd_params();
    let ridge = params.is_ridge();

    match gram {
        GramRef::Shared(g) if ridge => {
            let factor = RidgeFactor::new(g.data(), k, params.alpha)?;
            executor.for_each_row_block(codes.data_mut(), k, |first, block| {
                for (r, a) in block.chunks_mut(k).enumerate() {
                    a.copy_from_slice(dx.row(first + r));
                    factor.solve_in_place(a)?;
                }
                Ok(())
            })
        }
        GramRef::Shared(g) => executor.for_each_row_block(codes.data_mut(), k, |first, block| {
            for (r, a) in block.chunks_mut(k).enumerate() {
                let i = first + r;
                enet_coordinate_descent_gram(a, g.data(), dx.row(i), x.row(i), &cd);
            }
            Ok(())
        }),
        GramRef::PerSample(gs) => executor.for_each_row_block(codes.data_mut(), k, |first, block| {
            for (r, a) in block.chunks_mut(k).enumerate() {
                let i = first + r;
                if ridge {
                    let factor = RidgeFactor::new(gs.row(i), k, params.alpha)?;
                    a.copy_from_slice(dx.row(i));
                    factor.solve_in_place(a)?;
                } else {
                    enet_coordinate_descent_gram(a, gs.row(i), dx.row(i), x.row(i), &cd);
                }
            }
            Ok(())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_matrix(rows: usize, cols: usize, state: &mut u64) -> Matrix {
        let data = (0..rows * cols)
            .map(|_| {
                *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((*state >> 33) as f64) / (u32::MAX as f64) * 2.0 - 1.0
            })
            .collect();
        Matrix::from_vec(rows, cols, data).unwrap()
    }

    fn ridge_config(agg: Aggregation) -> DictFactConfig {
        DictFactConfig::default()
            .with_components(3)
            .with_code_penalty(0.5, 0.0)
            .with_aggregation(agg)
    }

    #[test]
    fn test_full_ridge_codes_satisfy_normal_equations() {
        let mut rng = 3u64;
        let d = lcg_matrix(3, 8, &mut rng);
        let x = lcg_matrix(4, 8, &mut rng);
        let config = ridge_config(Aggregation::Full);
        let gram = d.gram();
        let mut cache = SampleCache::new(4, 3, config.dx_agg, config.g_agg);
        let mut code = Matrix::filled(4, 3, 1.0);
        let subset: Vec<usize> = (0..8).collect();
        let ids = [0usize, 1, 2, 3];
        let weights = [1.0; 4];

        compute_code(
            &Executor::serial(),
            &config,
            &d,
            Some(&gram),
            &mut cache,
            &mut code,
            CodeBatch {
                x: &x,
                ids: &ids,
                sample_weights: &weights,
                subset: &subset,
            },
        )
        .unwrap();

        // (G + alpha I) a = D x
        let dx = x.mul_transpose(&d);
        for i in 0..4 {
            for r in 0..3 {
                let lhs: f64 = (0..3).map(|c| gram[(r, c)] * code[(i, c)]).sum::<f64>()
                    + 0.5 * code[(i, r)];
                assert!((lhs - dx[(i, r)]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_masked_with_full_subset_equals_full() {
        let mut rng = 8u64;
        let d = lcg_matrix(3, 6, &mut rng);
        let x = lcg_matrix(5, 6, &mut rng);
        let subset: Vec<usize> = (0..6).collect();
        let ids: Vec<usize> = (0..5).collect();
        let weights = vec![1.0; 5];

        let mut codes = Vec::new();
        for agg in [Aggregation::Full, Aggregation::Masked, Aggregation::Average] {
            let config = ridge_config(agg);
            let gram = d.gram();
            let mut cache = SampleCache::new(5, 3, config.dx_agg, config.g_agg);
            let mut code = Matrix::filled(5, 3, 1.0);
            compute_code(
                &Executor::serial(),
                &config,
                &d,
                Some(&gram),
                &mut cache,
                &mut code,
                CodeBatch {
                    x: &x,
                    ids: &ids,
                    sample_weights: &weights,
                    subset: &subset,
                },
            )
            .unwrap();
            codes.push(code);
        }
        for other in &codes[1..] {
            for (a, b) in codes[0].data().iter().zip(other.data()) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_only_batch_rows_are_written() {
        let mut rng = 12u64;
        let d = lcg_matrix(2, 5, &mut rng);
        let x = lcg_matrix(2, 5, &mut rng);
        let config = DictFactConfig::default()
            .with_components(2)
            .with_code_penalty(0.1, 0.5)
            .with_aggregation(Aggregation::Average);
        let mut cache = SampleCache::new(6, 2, config.dx_agg, config.g_agg);
        let mut code = Matrix::filled(6, 2, 1.0);
        let ids = [4usize, 1];
        let subset = [0usize, 3];

        compute_code(
            &Executor::serial(),
            &config,
            &d,
            None,
            &mut cache,
            &mut code,
            CodeBatch {
                x: &x,
                ids: &ids,
                sample_weights: &[1.0, 1.0],
                subset: &subset,
            },
        )
        .unwrap();

        for row in [0usize, 2, 3, 5] {
            assert_eq!(code.row(row), &[1.0, 1.0]);
        }
        let g_average = cache.g_average().unwrap();
        assert!(g_average.row(4).iter().any(|&v| v != 0.0));
        assert!(g_average.row(0).iter().all(|&v| v == 0.0));
        let dx_average = cache.dx_average().unwrap();
        assert!(dx_average.row(1).iter().any(|&v| v != 0.0));
        assert!(dx_average.row(2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_positive_codes_and_parallel_agreement() {
        let mut rng = 21u64;
        let d = lcg_matrix(4, 10, &mut rng);
        let x = lcg_matrix(9, 10, &mut rng);
        let gram = d.gram();
        let dx = x.mul_transpose(&d);
        let params = CodeParams {
            alpha: 0.05,
            l1_ratio: 0.7,
            positive: true,
        };

        let mut serial = Matrix::filled(9, 4, 1.0);
        solve_codes(&Executor::serial(), GramRef::Shared(&gram), &dx, &x, &mut serial, &params)
            .unwrap();
        let mut parallel = Matrix::filled(9, 4, 1.0);
        solve_codes(
            &Executor::new(3).unwrap(),
            GramRef::Shared(&gram),
            &dx,
            &x,
            &mut parallel,
            &params,
        )
        .unwrap();

        assert!(serial.data().iter().all(|&v| v >= 0.0));
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_positive_ridge_codes_are_nonnegative_kkt_points() {
        let mut rng = 27u64;
        let d = lcg_matrix(4, 10, &mut rng);
        let x = lcg_matrix(6, 10, &mut rng);
        let gram = d.gram();
        let dx = x.mul_transpose(&d);
        let params = CodeParams {
            alpha: 0.1,
            l1_ratio: 0.0,
            positive: true,
        };

        let mut codes = Matrix::filled(6, 4, 1.0);
        solve_codes(&Executor::serial(), GramRef::Shared(&gram), &dx, &x, &mut codes, &params)
            .unwrap();
        let mut per_sample = Matrix::zeros(6, 16);
        for i in 0..6 {
            per_sample.row_mut(i).copy_from_slice(gram.data());
        }
        let mut codes_ps = Matrix::filled(6, 4, 1.0);
        solve_codes(
            &Executor::serial(),
            GramRef::PerSample(&per_sample),
            &dx,
            &x,
            &mut codes_ps,
            &params,
        )
        .unwrap();

        assert!(codes.data().iter().all(|&v| v >= 0.0));
        assert_eq!(codes, codes_ps);
        // Active coordinates have zero gradient, inactive ones a non-negative one
        for i in 0..6 {
            for r in 0..4 {
                let grad: f64 = (0..4).map(|c| gram[(r, c)] * codes[(i, c)]).sum::<f64>()
                    + 0.1 * codes[(i, r)]
                    - dx[(i, r)];
                if codes[(i, r)] > 0.0 {
                    assert!(grad.abs() < 5e-2, "active gradient {grad}");
                } else {
                    assert!(grad > -5e-2, "inactive gradient {grad}");
                }
            }
        }
    }
}
