//! Feature sampler: randomized feature subsets with balanced long-run coverage.
//!
//! Each batch of the fitting engine only touches `n_features / reduction`
//! dictionary columns. The sampler decides which ones. Without replacement it
//! walks a shuffled permutation of all features, so every feature is visited
//! exactly once per cycle and no column starves; with replacement every call
//! is an independent uniform draw.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution};

/// Stateful generator of sorted, distinct feature-index subsets.
#[derive(Clone, Debug)]
pub struct FeatureSampler {
    n_features: usize,
    random_size: bool,
    replacement: bool,
    rng: ChaCha8Rng,
    permutation: Vec<usize>,
    /// Next unread position in `permutation` (without-replacement mode).
    cursor: usize,
    subset: Vec<usize>,
    taken: Vec<bool>,
}

impl FeatureSampler {
    /// Create a sampler over `0..n_features`.
    ///
    /// - `random_size`: draw the subset length from `Binomial(n_features, 1/reduction)`
    ///   instead of using `n_features / reduction`
    /// - `replacement`: draw every subset independently instead of cycling
    ///   through a permutation
    pub fn new(n_features: usize, random_size: bool, replacement: bool, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut permutation: Vec<usize> = (0..n_features).collect();
        permutation.shuffle(&mut rng);
        Self {
            n_features,
            random_size,
            replacement,
            rng,
            permutation,
            cursor: 0,
            subset: Vec::with_capacity(n_features),
            taken: vec![false; n_features],
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Length of the next subset for a given `reduction` (always in `1..=n_features`).
    fn subset_len(&mut self, reduction: f64) -> usize {
        let n = self.n_features;
        let len = if self.random_size {
            let fixed = (n as f64 / reduction) as usize;
            Binomial::new(n as u64, (1.0 / reduction).clamp(0.0, 1.0))
                .map(|b| b.sample(&mut self.rng) as usize)
                .unwrap_or(fixed)
        } else {
            (n as f64 / reduction) as usize
        };
        len.clamp(1, n.max(1))
    }

    /// Produce the next subset of about `n_features / reduction` features.
    ///
    /// Indices are distinct and sorted ascending. The slice is valid until the
    /// next call.
    pub fn yield_subset(&mut self, reduction: f64) -> &[usize] {
        self.subset.clear();
        if self.n_features == 0 {
            return &self.subset;
        }
        let len = self.subset_len(reduction);

        if self.replacement {
            let (chosen, _) = self.permutation.partial_shuffle(&mut self.rng, len);
            self.subset.extend_from_slice(chosen);
        } else {
            self.take_cyclic(len);
        }

        self.subset.sort_unstable();
        &self.subset
    }

    /// Take `len` features from the running permutation, reshuffling when a
    /// cycle ends. Features left over from the old cycle are not repeated
    /// from the head of the new one.
    fn take_cyclic(&mut self, len: usize) {
        let n = self.n_features;
        let from_tail = len.min(n - self.cursor);
        self.subset
            .extend_from_slice(&self.permutation[self.cursor..self.cursor + from_tail]);
        self.cursor += from_tail;
        if self.subset.len() == len {
            return;
        }

        for &j in &self.subset {
            self.taken[j] = true;
        }
        self.permutation.shuffle(&mut self.rng);
        self.cursor = 0;

        // Move the already-taken features behind the ones still needed so the
        // new cycle visits each of them exactly once.
        let (mut head, mut tail) = (0usize, n);
        while head < tail {
            if self.taken[self.permutation[head]] {
                tail -= 1;
                self.permutation.swap(head, tail);
            } else {
                head += 1;
            }
        }
        let need = len - self.subset.len();
        self.subset.extend_from_slice(&self.permutation[..need]);
        self.cursor = need;

        for &j in &self.subset {
            self.taken[j] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn check_subset(subset: &[usize], n: usize) {
        assert!(subset.windows(2).all(|w| w[0] < w[1]), "subset must be sorted and distinct");
        assert!(subset.iter().all(|&j| j < n));
    }

    #[test]
    fn test_fixed_size_subsets() {
        let mut sampler = FeatureSampler::new(100, false, false, 7);
        assert_eq!(sampler.n_features(), 100);
        for _ in 0..20 {
            let subset = sampler.yield_subset(4.0).to_vec();
            assert_eq!(subset.len(), 25);
            check_subset(&subset, 100);
        }
    }

    #[test]
    fn test_reduction_equal_to_features_gives_single_feature() {
        let mut sampler = FeatureSampler::new(6, false, false, 1);
        for _ in 0..10 {
            let subset = sampler.yield_subset(6.0);
            assert_eq!(subset.len(), 1);
        }
        let mut sampler = FeatureSampler::new(6, false, true, 1);
        assert_eq!(sampler.yield_subset(6.0).len(), 1);
    }

    #[test]
    fn test_without_replacement_covers_every_feature_per_cycle() {
        let n = 30;
        let mut sampler = FeatureSampler::new(n, false, false, 3);
        // 30 / 4 = 7 per call; cycles do not align with call boundaries
        let mut counts = vec![0usize; n];
        for _ in 0..60 {
            let subset = sampler.yield_subset(4.0).to_vec();
            check_subset(&subset, n);
            for j in subset {
                counts[j] += 1;
            }
        }
        // 420 draws = exactly 14 cycles
        assert!(counts.iter().all(|&c| c == 14), "unbalanced coverage: {:?}", counts);
    }

    #[test]
    fn test_replacement_and_random_size() {
        let mut sampler = FeatureSampler::new(200, true, true, 11);
        let mut lens = HashSet::new();
        for _ in 0..30 {
            let subset = sampler.yield_subset(2.0).to_vec();
            check_subset(&subset, 200);
            assert!(!subset.is_empty() && subset.len() <= 200);
            lens.insert(subset.len());
        }
        assert!(lens.len() > 1, "binomial sizes should vary");
    }

    #[test]
    fn test_deterministic_given_seed() {
        let mut a = FeatureSampler::new(50, false, false, 42);
        let mut b = FeatureSampler::new(50, false, false, 42);
        for _ in 0..10 {
            assert_eq!(a.yield_subset(3.0), b.yield_subset(3.0));
        }
    }

    #[test]
    fn test_no_reduction_returns_all_features() {
        let mut sampler = FeatureSampler::new(9, false, false, 0);
        let subset = sampler.yield_subset(1.0).to_vec();
        assert_eq!(subset, (0..9).collect::<Vec<_>>());
    }
}
