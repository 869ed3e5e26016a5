//! Stream-wide sufficient statistics and per-sample caches.
//!
//! `C = EWMA(AᵗA / batch)` and `B = EWMA(AᵗX / batch)` summarize every batch
//! seen so far; they are all the dictionary update needs from past data.
//! The per-sample cache holds the visit counters and, for the `Average`
//! aggregation modes, each sample's running partial estimates.

use crate::config::Aggregation;
use crate::matrix::Matrix;

/// Exponentially weighted code/code and code/data moments.
#[derive(Clone, Debug)]
pub struct SufficientStatistics {
    /// `n_components × n_components`, symmetric PSD.
    pub(crate) c: Matrix,
    /// `n_components × n_features`.
    pub(crate) b: Matrix,
}

impl SufficientStatistics {
    pub fn new(n_components: usize, n_features: usize) -> Self {
        Self {
            c: Matrix::zeros(n_components, n_components),
            b: Matrix::zeros(n_components, n_features),
        }
    }

    pub fn c(&self) -> &Matrix {
        &self.c
    }

    pub fn b(&self) -> &Matrix {
        &self.b
    }

    pub fn update_c(&mut self, code: &Matrix, w: f64) {
        update_c(&mut self.c, code, w);
    }

    pub fn update_b(&mut self, x: &Matrix, code: &Matrix, w: f64) {
        update_b(&mut self.b, x, code, w);
    }
}

/// `C ← (1 − w)·C + w·codeᵗ·code / batch_size`.
///
/// Only the upper triangle is accumulated and then mirrored, so `C` stays
/// exactly symmetric.
pub fn update_c(c: &mut Matrix, code: &Matrix, w: f64) {
    let batch_size = code.rows() as f64;
    c.scale(1.0 - w);
    let k = code.cols();
    let scale = w / batch_size;
    for r in 0..code.rows() {
        let a = code.row(r);
        for i in 0..k {
            if a[i] == 0.0 {
                continue;
            }
            let ai = scale * a[i];
            for j in i..k {
                c[(i, j)] += ai * a[j];
            }
        }
    }
    for i in 0..k {
        for j in (i + 1)..k {
            c[(j, i)] = c[(i, j)];
        }
    }
}

/// `B ← (1 − w)·B + w·codeᵗ·X / batch_size`.
pub fn update_b(b: &mut Matrix, x: &Matrix, code: &Matrix, w: f64) {
    let batch_size = x.rows() as f64;
    b.scale(1.0 - w);
    b.add_transpose_mul(w / batch_size, code, x);
}

// =============================================================================
// Per-sample cache
// =============================================================================

/// Visit counters and per-sample running estimates.
#[derive(Clone, Debug)]
pub struct SampleCache {
    visits: Vec<u64>,
    /// `n_samples × n_components`, present under `Aggregation::Average` for `Dx`.
    pub(crate) dx_average: Option<Matrix>,
    /// `n_samples × n_components²`, present under `Aggregation::Average` for `G`.
    pub(crate) g_average: Option<Matrix>,
}

impl SampleCache {
    pub fn new(n_samples: usize, n_components: usize, dx_agg: Aggregation, g_agg: Aggregation) -> Self {
        Self {
            visits: vec![0; n_samples],
            dx_average: (dx_agg == Aggregation::Average)
                .then(|| Matrix::zeros(n_samples, n_components)),
            g_average: (g_agg == Aggregation::Average)
                .then(|| Matrix::zeros(n_samples, n_components * n_components)),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.visits.len()
    }

    pub fn visits(&self) -> &[u64] {
        &self.visits
    }

    pub fn dx_average(&self) -> Option<&Matrix> {
        self.dx_average.as_ref()
    }

    pub fn g_average(&self) -> Option<&Matrix> {
        self.g_average.as_ref()
    }

    /// Count one more visit for each id and return the per-sample averaging
    /// weights `count^(-sample_learning_rate)`.
    pub fn record_visits(&mut self, ids: &[usize], sample_learning_rate: f64) -> Vec<f64> {
        ids.iter()
            .map(|&id| {
                self.visits[id] += 1;
                (self.visits[id] as f64).powf(-sample_learning_rate)
            })
            .collect()
    }
}

/// Blend `estimate` into `avg` with weight `w`: `avg ← (1 − w)·avg + w·estimate`.
#[inline]
pub fn blend(avg: &mut [f64], estimate: &[f64], w: f64) {
    for (a, &e) in avg.iter_mut().zip(estimate) {
        *a = (1.0 - w) * *a + w * e;
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

    #[test]
    fn test_first_update_with_unit_weight_is_batch_moment() {
        let mut rng = 5u64;
        let code = lcg_matrix(4, 3, &mut rng);
        let x = lcg_matrix(4, 6, &mut rng);
        let mut stats = SufficientStatistics::new(3, 6);
        stats.update_c(&code, 1.0);
        stats.update_b(&x, &code, 1.0);

        let mut expected_c = code.transpose_mul(&code);
        expected_c.scale(0.25);
        let mut expected_b = code.transpose_mul(&x);
        expected_b.scale(0.25);
        for (a, e) in stats.c().data().iter().zip(expected_c.data()) {
            assert!((a - e).abs() < 1e-12);
        }
        for (a, e) in stats.b().data().iter().zip(expected_b.data()) {
            assert!((a - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_c_stays_symmetric_with_nonnegative_diagonal() {
        let mut rng = 9u64;
        let mut stats = SufficientStatistics::new(5, 2);
        for step in 1..20 {
            let code = lcg_matrix(3, 5, &mut rng);
            stats.update_c(&code, 1.0 / step as f64);
            assert_eq!(stats.c().max_asymmetry(), 0.0);
            for i in 0..5 {
                assert!(stats.c()[(i, i)] >= 0.0);
            }
        }
    }

    #[test]
    fn test_ewma_contracts_old_statistics() {
        let mut stats = SufficientStatistics::new(1, 1);
        let one = Matrix::filled(1, 1, 1.0);
        let zero = Matrix::zeros(1, 1);
        stats.update_b(&one, &one, 1.0);
        assert_eq!(stats.b()[(0, 0)], 1.0);
        stats.update_b(&zero, &one, 0.25);
        assert_eq!(stats.b()[(0, 0)], 0.75);
    }

    #[test]
    fn test_sample_cache_visits_and_weights() {
        let mut cache = SampleCache::new(4, 2, Aggregation::Average, Aggregation::Masked);
        assert!(cache.dx_average().is_some());
        assert!(cache.g_average().is_none());
        assert_eq!(cache.n_samples(), 4);

        let w = cache.record_visits(&[1, 3], 0.5);
        assert_eq!(w, vec![1.0, 1.0]);
        let w = cache.record_visits(&[1], 0.5);
        assert!((w[0] - 0.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(cache.visits(), &[0, 2, 0, 1]);
    }

    #[test]
    fn test_blend() {
        let mut avg = vec![1.0, 2.0];
        blend(&mut avg, &[3.0, 4.0], 0.5);
        assert_eq!(avg, vec![2.0, 3.0]);
        blend(&mut avg, &[0.0, 0.0], 1.0);
        assert_eq!(avg, vec![0.0, 0.0]);
    }
}
