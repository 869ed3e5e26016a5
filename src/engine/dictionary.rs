//! Block coordinate descent on the dictionary, restricted to a feature subset.
//!
//! Given the running statistics `(C, B)`, one batch minimizes the surrogate
//!
//! ```text
//! 1/2 tr(D·Dᵗ·C) − tr(Dᵗ·B)   s.t.  enet_norm(D[k]) ≤ 1  for every atom k
//! ```
//!
//! over the columns of `D` in the sampled subset `S`, one atom at a time in
//! a random order. The gradient block `B_S − C·D_S` is kept current across the
//! sweep with two rank-1 updates per atom, so every atom sees the atoms
//! already updated in the same batch.
//!
//! # Norm budget
//!
//! Only the subset part of an atom is visible during the sweep, but the ball
//! constraint is on the whole atom. `comp_norm[k]` tracks the unused budget
//! `1 − enet_norm(D[k])`; the subset part may use `comp_norm[k] + enet_norm(D_S[k])`,
//! which is exactly `1 − enet_norm(D[k] outside S)`.
//!
//! # Gram maintenance
//!
//! When the Gram aggregation is `Full` the engine keeps `G = D·Dᵗ`. If the
//! subset covers less than half the features the block contribution
//! `D_S·D_Sᵗ` is subtracted before the sweep and added back after it;
//! otherwise `G` is recomputed from scratch.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::enet::{enet_norm, enet_projection};
use crate::matrix::Matrix;

/// Atoms whose self second moment `C[k,k]` is at or below this floor are not
/// moved by a sweep.
pub const DEGENERATE_ATOM_FLOOR: f64 = 1e-20;

/// Owner of the dictionary, its Gram matrix and the sweep workspace.
#[derive(Clone, Debug)]
pub struct DictionaryUpdater {
    components: Matrix,
    gram: Option<Matrix>,
    comp_norm: Vec<f64>,
    l1_ratio: f64,
    positive: bool,
    rng: ChaCha8Rng,
    order: Vec<usize>,

    // Workspace reused across batches, shaped to the active subset.
    block: Matrix,
    gradient: Matrix,
    x_block: Matrix,
    atom_temp: Vec<f64>,
}

impl DictionaryUpdater {
    /// Take ownership of an initial dictionary whose atoms already lie in the ball.
    pub fn new(
        components: Matrix,
        maintain_gram: bool,
        l1_ratio: f64,
        positive: bool,
        seed: u64,
    ) -> Self {
        let n_components = components.rows();
        let comp_norm = (0..n_components)
            .map(|k| 1.0 - enet_norm(components.row(k), l1_ratio))
            .collect();
        let gram = maintain_gram.then(|| components.gram());
        Self {
            components,
            gram,
            comp_norm,
            l1_ratio,
            positive,
            rng: ChaCha8Rng::seed_from_u64(seed),
            order: (0..n_components).collect(),
            block: Matrix::zeros(0, 0),
            gradient: Matrix::zeros(0, 0),
            x_block: Matrix::zeros(0, 0),
            atom_temp: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn components(&self) -> &Matrix {
        &self.components
    }

    /// Maintained `D·Dᵗ`, when Gram maintenance is on.
    pub fn gram(&self) -> Option<&Matrix> {
        self.gram.as_ref()
    }

    /// Unused elastic-net budget per atom.
    pub fn comp_norm(&self) -> &[f64] {
        &self.comp_norm
    }

    pub fn n_components(&self) -> usize {
        self.components.rows()
    }

    pub fn n_features(&self) -> usize {
        self.components.cols()
    }

    // --- Gradient staging ---

    /// Seed the gradient block with `B_S`.
    pub fn load_gradient(&mut self, b: &Matrix, subset: &[usize]) {
        b.gather_columns(subset, &mut self.gradient);
    }

    /// Apply the `B` EWMA to the staged block directly:
    /// `gradient ← (1 − w)·gradient + w·codeᵗ·X_S / batch_size`.
    ///
    /// Used when `B` itself is being updated concurrently.
    pub fn blend_gradient(&mut self, x: &Matrix, code: &Matrix, subset: &[usize], w: f64) {
        x.gather_columns(subset, &mut self.x_block);
        self.gradient.scale(1.0 - w);
        self.gradient
            .add_transpose_mul(w / x.rows() as f64, code, &self.x_block);
    }

    // --- Sweep ---

    /// One block coordinate descent pass over all atoms on `subset`, given `C`.
    ///
    /// The gradient block must hold `B_S` (see [`load_gradient`](Self::load_gradient)).
    pub fn update(&mut self, subset: &[usize], c: &Matrix) {
        let n_features = self.components.cols();
        let small_subset = 2 * subset.len() < n_features;

        self.components.gather_columns(subset, &mut self.block);
        if let Some(gram) = self.gram.as_mut() {
            if small_subset {
                self.block.add_gram_to(gram, -1.0);
            }
        }

        // gradient = B_S − C·D_S
        self.gradient.add_mul(-1.0, c, &self.block);

        self.atom_temp.clear();
        self.atom_temp.resize(subset.len(), 0.0);
        self.order.shuffle(&mut self.rng);

        for &k in &self.order {
            let c_kk = c[(k, k)];
            if c_kk <= DEGENERATE_ATOM_FLOOR {
                log::trace!("atom {} left unchanged: C[k,k] = {:e}", k, c_kk);
                continue;
            }

            self.comp_norm[k] += enet_norm(self.block.row(k), self.l1_ratio);

            // Remove atom k's own contribution from the gradient
            self.gradient.ger(1.0, c.row(k), self.block.row(k));

            let grad_k = self.gradient.row(k);
            for (d, &g) in self.block.row_mut(k).iter_mut().zip(grad_k) {
                *d = g / c_kk;
            }

            if self.positive {
                for d in self.block.row_mut(k) {
                    if *d < 0.0 {
                        *d = 0.0;
                    }
                }
            }

            enet_projection(
                self.block.row(k),
                &mut self.atom_temp,
                self.comp_norm[k],
                self.l1_ratio,
            );
            self.block.row_mut(k).copy_from_slice(&self.atom_temp);
            self.comp_norm[k] -= enet_norm(&self.atom_temp, self.l1_ratio);

            self.gradient.ger(-1.0, c.row(k), self.block.row(k));
        }

        self.components.scatter_columns(subset, &self.block);

        if let Some(gram) = self.gram.as_mut() {
            if small_subset {
                self.block.add_gram_to(gram, 1.0);
            } else {
                *gram = self.components.gram();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enet::enet_scale;
    use crate::engine::statistics::{update_b, update_c};

    fn lcg_matrix(rows: usize, cols: usize, state: &mut u64) -> Matrix {
        let data = (0..rows * cols)
            .map(|_| {
                *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((*state >> 33) as f64) / (u32::MAX as f64) * 2.0 - 1.0
            })
            .collect();
        Matrix::from_vec(rows, cols, data).unwrap()
    }

    fn unit_dictionary(k: usize, n: usize, l1_ratio: f64, state: &mut u64) -> Matrix {
        let mut d = lcg_matrix(k, n, state);
        for i in 0..k {
            enet_scale(d.row_mut(i), l1_ratio, 1.0);
        }
        d
    }

    /// Random statistics for a batch of codes/rows, with unit weight.
    fn statistics(k: usize, n: usize, state: &mut u64) -> (Matrix, Matrix) {
        let code = lcg_matrix(8, k, state);
        let x = lcg_matrix(8, n, state);
        let mut c = Matrix::zeros(k, k);
        let mut b = Matrix::zeros(k, n);
        update_c(&mut c, &code, 1.0);
        update_b(&mut b, &x, &code, 1.0);
        (c, b)
    }

    fn assert_gram_current(updater: &DictionaryUpdater) {
        let exact = updater.components().gram();
        let kept = updater.gram().unwrap();
        for (a, e) in kept.data().iter().zip(exact.data()) {
            assert!((a - e).abs() < 1e-9, "maintained Gram drifted: {a} vs {e}");
        }
    }

    #[test]
    fn test_atoms_stay_in_ball() {
        let mut rng = 17u64;
        for &ratio in &[0.0, 0.3, 1.0] {
            let d = unit_dictionary(4, 20, ratio, &mut rng);
            let mut updater = DictionaryUpdater::new(d, false, ratio, false, 1);
            for round in 0..10 {
                let (c, b) = statistics(4, 20, &mut rng);
                let subset: Vec<usize> = (0..20).filter(|j| (j + round) % 3 == 0).collect();
                updater.load_gradient(&b, &subset);
                updater.update(&subset, &c);
                for k in 0..4 {
                    let n = enet_norm(updater.components().row(k), ratio);
                    assert!(n <= 1.0 + 1e-8, "ratio {ratio}: atom {k} norm {n}");
                }
            }
        }
    }

    #[test]
    fn test_columns_outside_subset_untouched() {
        let mut rng = 23u64;
        let d = unit_dictionary(3, 10, 0.0, &mut rng);
        let before = d.clone();
        let mut updater = DictionaryUpdater::new(d, true, 0.0, false, 2);
        let (c, b) = statistics(3, 10, &mut rng);
        let subset = [4usize];
        updater.load_gradient(&b, &subset);
        updater.update(&subset, &c);
        for k in 0..3 {
            for j in 0..10 {
                if j != 4 {
                    assert_eq!(updater.components()[(k, j)], before[(k, j)]);
                }
            }
        }
        assert_gram_current(&updater);
    }

    #[test]
    fn test_gram_maintained_on_small_and_large_subsets() {
        let mut rng = 31u64;
        let d = unit_dictionary(4, 12, 0.2, &mut rng);
        let mut updater = DictionaryUpdater::new(d, true, 0.2, false, 3);
        for subset in [vec![0usize, 5, 7], (0..12).collect::<Vec<_>>(), vec![1, 2, 3, 4, 8, 11]] {
            let (c, b) = statistics(4, 12, &mut rng);
            updater.load_gradient(&b, &subset);
            updater.update(&subset, &c);
            assert_gram_current(&updater);
        }
    }

    #[test]
    fn test_degenerate_atom_is_not_moved() {
        let mut rng = 37u64;
        let d = unit_dictionary(2, 6, 0.0, &mut rng);
        let before = d.clone();
        let mut updater = DictionaryUpdater::new(d, false, 0.0, false, 4);
        // Atom 1 has received no weight at all
        let c = Matrix::from_vec(2, 2, vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let b = lcg_matrix(2, 6, &mut rng);
        let subset: Vec<usize> = (0..6).collect();
        updater.load_gradient(&b, &subset);
        updater.update(&subset, &c);
        assert_eq!(updater.components().row(1), before.row(1));
        assert_ne!(updater.components().row(0), before.row(0));
    }

    #[test]
    fn test_positive_atoms() {
        let mut rng = 41u64;
        let mut d = unit_dictionary(3, 8, 0.5, &mut rng);
        for v in d.data_mut() {
            *v = v.abs();
        }
        let mut updater = DictionaryUpdater::new(d, false, 0.5, true, 5);
        for _ in 0..5 {
            let (c, b) = statistics(3, 8, &mut rng);
            let subset: Vec<usize> = (0..8).collect();
            updater.load_gradient(&b, &subset);
            updater.update(&subset, &c);
            assert!(updater.components().data().iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_blend_gradient_matches_updated_b() {
        let mut rng = 43u64;
        let d = unit_dictionary(3, 9, 0.0, &mut rng);
        let mut updater = DictionaryUpdater::new(d, false, 0.0, false, 6);
        let (_, mut b) = statistics(3, 9, &mut rng);
        let code = lcg_matrix(5, 3, &mut rng);
        let x = lcg_matrix(5, 9, &mut rng);
        let subset = [0usize, 2, 8];

        updater.load_gradient(&b, &subset);
        updater.blend_gradient(&x, &code, &subset, 0.3);
        update_b(&mut b, &x, &code, 0.3);

        let mut expected = Matrix::zeros(0, 0);
        b.gather_columns(&subset, &mut expected);
        for (a, e) in updater.gradient.data().iter().zip(expected.data()) {
            assert!((a - e).abs() < 1e-12);
        }
    }
}
