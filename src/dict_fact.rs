//! Streaming matrix factorization `X ≈ A·D` by stochastic majorization-minimization.
//!
//! [`DictFact`] learns a dictionary `D` (`n_components × n_features`) and a
//! per-sample code matrix `A` (`n_samples × n_components`) from mini-batches.
//! Each batch:
//!
//! 1. draws a feature subset of about `n_features / reduction` columns
//! 2. infers elastic-net codes for the batch rows from (possibly subsampled)
//!    `D·x` and `D·Dᵗ` estimates
//! 3. folds the codes into the running statistics `C` and `B`
//! 4. runs one block coordinate descent sweep over the atoms, touching only
//!    the sampled columns
//!
//! All state is allocated once by [`prepare`](DictFact::prepare) and then
//! mutated batch by batch; per-row state (codes, visit counters, per-sample
//! averages) is addressed by the caller's row ids.
//!
//! # Usage
//!
//! ```rust
//! use dictfact::{Aggregation, DictFact, DictFactConfig, Matrix};
//!
//! let x = Matrix::from_rows(&[
//!     vec![1.0, 0.0, 2.0, 0.5],
//!     vec![0.0, 1.0, 1.0, 0.0],
//!     vec![1.0, 1.0, 3.0, 0.5],
//! ]).unwrap();
//!
//! let config = DictFactConfig::default()
//!     .with_components(2)
//!     .with_batch_size(2)
//!     .with_aggregation(Aggregation::Full)
//!     .with_seed(0);
//! let mut engine = DictFact::new(config).unwrap();
//! engine.fit(&x).unwrap();
//!
//! let codes = engine.transform(&x).unwrap();
//! assert_eq!(codes.shape(), (3, 2));
//! ```

use std::borrow::Cow;
use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::{Aggregation, DictFactConfig};
use crate::enet::enet_scale;
use crate::engine::code::{compute_code, solve_codes, CodeBatch, CodeParams, GramRef};
use crate::engine::dictionary::DictionaryUpdater;
use crate::engine::parallel::Executor;
use crate::engine::statistics::{update_b, update_c, SampleCache, SufficientStatistics};
use crate::error::{DictFactError, Result};
use crate::matrix::Matrix;
use crate::sampler::FeatureSampler;
use crate::schedule::batch_weight;

/// Progress hook, invoked at each verbosity checkpoint with the engine.
pub type Callback = Box<dyn FnMut(&DictFact) + Send>;

/// Everything `prepare` allocates.
struct FitState {
    rng: ChaCha8Rng,
    sampler: FeatureSampler,
    stats: SufficientStatistics,
    cache: SampleCache,
    dictionary: DictionaryUpdater,
    code: Matrix,
    n_iter: u64,
    checkpoints: VecDeque<f64>,
}

impl FitState {
    fn n_samples(&self) -> usize {
        self.cache.n_samples()
    }

    fn n_features(&self) -> usize {
        self.dictionary.n_features()
    }
}

/// Streaming dictionary-learning engine.
pub struct DictFact {
    config: DictFactConfig,
    executor: Executor,
    callback: Option<Callback>,
    state: Option<FitState>,
}

impl DictFact {
    /// Validate `config` and build the worker pool. No state is allocated
    /// until [`prepare`](Self::prepare) or [`fit`](Self::fit).
    pub fn new(config: DictFactConfig) -> Result<Self> {
        config.validate()?;
        let executor = Executor::new(config.n_threads)?;
        Ok(Self {
            config,
            executor,
            callback: None,
            state: None,
        })
    }

    /// Attach a progress callback (see [`DictFactConfig::verbose`]).
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&DictFact) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    // =========================================================================
    // Preparation
    // =========================================================================

    /// Allocate all state for `n_samples × n_features` data, discarding any
    /// previous fit.
    ///
    /// With `x`, its shape is used (an explicit `n_samples` still overrides
    /// the row count) and the dictionary starts from a random selection of
    /// its rows. Without `x`, both dimensions are required and the dictionary
    /// starts from standard normal draws.
    pub fn prepare(
        &mut self,
        n_samples: Option<usize>,
        n_features: Option<usize>,
        x: Option<&Matrix>,
    ) -> Result<()> {
        let (n_samples, n_features) = match x {
            Some(x) => {
                if let Some(expected) = n_features {
                    if expected != x.cols() {
                        return Err(DictFactError::DimensionMismatch {
                            expected,
                            got: x.cols(),
                        });
                    }
                }
                if x.rows() == 0 {
                    return Err(DictFactError::EmptyInput(
                        "cannot initialise a dictionary from zero rows".into(),
                    ));
                }
                (n_samples.unwrap_or(x.rows()), x.cols())
            }
            None => match (n_samples, n_features) {
                (Some(n), Some(p)) => (n, p),
                _ => return Err(DictFactError::MissingShape),
            },
        };
        if n_features == 0 {
            return Err(DictFactError::EmptyInput("data has no features".into()));
        }

        let config = &self.config;
        let k = config.n_components;
        let mut rng = match config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut components = match x {
            Some(x) => {
                let mut perm: Vec<usize> = (0..x.rows()).collect();
                perm.shuffle(&mut rng);
                let ids: Vec<usize> = (0..k).map(|i| perm[i % perm.len()]).collect();
                x.select_rows(&ids)
            }
            None => {
                let data = (0..k * n_features)
                    .map(|_| rng.sample::<f64, _>(StandardNormal))
                    .collect();
                Matrix::from_vec(k, n_features, data)?
            }
        };
        if config.comp_pos {
            for v in components.data_mut() {
                *v = v.abs();
            }
        }
        for atom in 0..k {
            enet_scale(components.row_mut(atom), config.comp_l1_ratio, 1.0);
        }

        let sampler = FeatureSampler::new(
            n_features,
            config.random_subset_size,
            config.subset_replacement,
            rng.gen(),
        );
        let dictionary = DictionaryUpdater::new(
            components,
            config.g_agg == Aggregation::Full,
            config.comp_l1_ratio,
            config.comp_pos,
            rng.gen(),
        );

        let checkpoints = verbose_checkpoints(
            config.verbose,
            n_samples * config.n_epochs,
            config.batch_size,
        );

        log::debug!(
            "Prepared {} samples x {} features, {} components",
            n_samples,
            n_features,
            k
        );

        self.state = Some(FitState {
            rng,
            sampler,
            stats: SufficientStatistics::new(k, n_features),
            cache: SampleCache::new(n_samples, k, config.dx_agg, config.g_agg),
            dictionary,
            code: Matrix::filled(n_samples, k, 1.0),
            n_iter: 0,
            checkpoints,
        });
        Ok(())
    }

    /// [`prepare`](Self::prepare) from an explicit shape.
    pub fn prepare_with_shape(&mut self, n_samples: usize, n_features: usize) -> Result<()> {
        self.prepare(Some(n_samples), Some(n_features), None)
    }

    /// [`prepare`](Self::prepare) from a data sample.
    pub fn prepare_with_data(&mut self, x: &Matrix) -> Result<()> {
        self.prepare(None, None, Some(x))
    }

    // =========================================================================
    // Fitting
    // =========================================================================

    /// Prepare from `x` and run `n_epochs` passes over it, each in a fresh
    /// random row order.
    pub fn fit(&mut self, x: &Matrix) -> Result<()> {
        self.prepare_with_data(x)?;
        for epoch in 0..self.config.n_epochs {
            let perm = {
                let state = self.state.as_mut().ok_or(DictFactError::NotPrepared)?;
                let mut perm: Vec<usize> = (0..x.rows()).collect();
                perm.shuffle(&mut state.rng);
                perm
            };
            log::debug!("Epoch {}", epoch);
            let permuted = x.select_rows(&perm);
            self.partial_fit(&permuted, Some(&perm))?;
        }
        Ok(())
    }

    /// Stream the rows of `x` through the engine in batches of `batch_size`.
    ///
    /// `row_ids[i]` is the sample id of row `i` (default `0..x.rows()`); it
    /// selects which code row, visit counter and per-sample averages the row
    /// uses. A worker error aborts the call; batches already processed stay
    /// applied.
    pub fn partial_fit(&mut self, x: &Matrix, row_ids: Option<&[usize]>) -> Result<()> {
        let state = self.state.as_ref().ok_or(DictFactError::NotPrepared)?;
        if x.cols() != state.n_features() {
            return Err(DictFactError::DimensionMismatch {
                expected: state.n_features(),
                got: x.cols(),
            });
        }
        let ids: Cow<'_, [usize]> = match row_ids {
            Some(ids) => {
                if ids.len() != x.rows() {
                    return Err(DictFactError::DimensionMismatch {
                        expected: x.rows(),
                        got: ids.len(),
                    });
                }
                Cow::Borrowed(ids)
            }
            None => Cow::Owned((0..x.rows()).collect()),
        };
        if let Some(&index) = ids.iter().find(|&&id| id >= state.n_samples()) {
            return Err(DictFactError::SampleIndexOutOfRange {
                index,
                n_samples: state.n_samples(),
            });
        }

        let batch_size = self.config.batch_size;
        let mut start = 0;
        while start < x.rows() {
            let end = (start + batch_size).min(x.rows());
            let batch = x.slice_rows(start, end);
            self.single_batch_fit(&batch, &ids[start..end])?;
            start = end;
        }
        Ok(())
    }

    fn single_batch_fit(&mut self, x: &Matrix, ids: &[usize]) -> Result<()> {
        self.report_progress();

        let config = &self.config;
        let executor = &self.executor;
        let state = self.state.as_mut().ok_or(DictFactError::NotPrepared)?;

        let subset = state.sampler.yield_subset(config.reduction);
        let batch_size = x.rows();
        state.n_iter += batch_size as u64;
        let sample_weights = state
            .cache
            .record_visits(ids, config.sample_learning_rate);
        let w = batch_weight(state.n_iter, batch_size, config.learning_rate, 0.0);

        compute_code(
            executor,
            config,
            state.dictionary.components(),
            state.dictionary.gram(),
            &mut state.cache,
            &mut state.code,
            CodeBatch {
                x,
                ids,
                sample_weights: &sample_weights,
                subset,
            },
        )?;
        let this_code = state.code.select_rows(ids);

        if executor.is_parallel() {
            // B is written by one task while the other needs B_S, so the
            // dictionary task applies the B update to its own staged copy.
            state.dictionary.load_gradient(&state.stats.b, subset);
            let dictionary = &mut state.dictionary;
            let c = &mut state.stats.c;
            let b = &mut state.stats.b;
            executor.join(
                || {
                    update_c(c, &this_code, w);
                    dictionary.blend_gradient(x, &this_code, subset, w);
                    dictionary.update(subset, c);
                },
                || update_b(b, x, &this_code, w),
            );
        } else {
            state.stats.update_c(&this_code, w);
            state.stats.update_b(x, &this_code, w);
            state.dictionary.load_gradient(&state.stats.b, subset);
            state.dictionary.update(subset, &state.stats.c);
        }

        log::debug!(
            "Batch of {} samples on {} features, weight {:.4}, {} samples seen",
            batch_size,
            subset.len(),
            w,
            state.n_iter
        );
        Ok(())
    }

    /// Log and call back once for every checkpoint passed since the last batch.
    fn report_progress(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let n_iter = state.n_iter as f64;
        let mut due = false;
        while state.checkpoints.front().is_some_and(|&t| n_iter >= t) {
            state.checkpoints.pop_front();
            due = true;
        }
        if !due {
            return;
        }
        log::info!("Iteration {}", state.n_iter);
        if let Some(mut callback) = self.callback.take() {
            callback(self);
            self.callback = Some(callback);
        }
    }

    // =========================================================================
    // Inference
    // =========================================================================

    /// Codes of `x` against the current dictionary. Does not change any state.
    pub fn transform(&self, x: &Matrix) -> Result<Matrix> {
        let state = self.state.as_ref().ok_or(DictFactError::NotPrepared)?;
        if x.cols() != state.n_features() {
            return Err(DictFactError::DimensionMismatch {
                expected: state.n_features(),
                got: x.cols(),
            });
        }
        let components = state.dictionary.components();
        let gram = match state.dictionary.gram() {
            Some(g) => Cow::Borrowed(g),
            None => Cow::Owned(components.gram()),
        };
        let dx = x.mul_transpose(components);
        let mut codes = Matrix::filled(x.rows(), state.dictionary.n_components(), 1.0);
        solve_codes(
            &self.executor,
            GramRef::Shared(&gram),
            &dx,
            x,
            &mut codes,
            &CodeParams::from_config(&self.config),
        )?;
        Ok(codes)
    }

    /// Mean per-row objective of `x`: reconstruction error plus code penalty.
    ///
    /// ```text
    /// (1/2·||X − A·D||² + alpha·(r·||A||₁ + (1 − r)·||A||²/2)) / n_rows
    /// ```
    pub fn score(&self, x: &Matrix) -> Result<f64> {
        if x.rows() == 0 {
            return Err(DictFactError::EmptyInput("cannot score zero rows".into()));
        }
        let code = self.transform(x)?;
        let components = self
            .components()
            .ok_or(DictFactError::NotPrepared)?;

        let mut residual = x.clone();
        residual.add_mul(-1.0, &code, components);
        let loss = 0.5 * residual.squared_norm();

        let r = self.config.code_l1_ratio;
        let l1: f64 = code.data().iter().map(|v| v.abs()).sum();
        let l2 = code.squared_norm();
        let penalty = self.config.code_alpha * (r * l1 + (1.0 - r) * l2 / 2.0);

        Ok((loss + penalty) / x.rows() as f64)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &DictFactConfig {
        &self.config
    }

    pub fn is_prepared(&self) -> bool {
        self.state.is_some()
    }

    /// The dictionary `D`, `n_components × n_features`.
    pub fn components(&self) -> Option<&Matrix> {
        self.state.as_ref().map(|s| s.dictionary.components())
    }

    /// The warm-started code matrix `A`, `n_samples × n_components`.
    pub fn code(&self) -> Option<&Matrix> {
        self.state.as_ref().map(|s| &s.code)
    }

    /// Maintained `D·Dᵗ` (only under `Full` Gram aggregation).
    pub fn gram(&self) -> Option<&Matrix> {
        self.state.as_ref().and_then(|s| s.dictionary.gram())
    }

    pub fn c(&self) -> Option<&Matrix> {
        self.state.as_ref().map(|s| s.stats.c())
    }

    pub fn b(&self) -> Option<&Matrix> {
        self.state.as_ref().map(|s| s.stats.b())
    }

    /// Unused elastic-net budget `1 − norm` per atom.
    pub fn comp_norm(&self) -> Option<&[f64]> {
        self.state.as_ref().map(|s| s.dictionary.comp_norm())
    }

    /// How many times each sample has been visited.
    pub fn sample_n_iter(&self) -> Option<&[u64]> {
        self.state.as_ref().map(|s| s.cache.visits())
    }

    /// Total samples processed since the last `prepare`.
    pub fn n_iter(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.n_iter)
    }
}

impl std::fmt::Debug for DictFact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictFact")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .field("prepared", &self.is_prepared())
            .field("n_iter", &self.n_iter())
            .finish()
    }
}

/// Log-spaced sample counts at which progress is reported:
/// `(10^linspace(0, log10(total / batch_size), n) − 1) · batch_size`.
fn verbose_checkpoints(n: usize, total_samples: usize, batch_size: usize) -> VecDeque<f64> {
    if n == 0 {
        return VecDeque::new();
    }
    let stop = (total_samples as f64 / batch_size as f64).max(1.0).log10();
    (0..n)
        .map(|i| {
            let t = if n == 1 {
                0.0
            } else {
                stop * i as f64 / (n - 1) as f64
            };
            (10f64.powf(t) - 1.0) * batch_size as f64
        })
        .collect()
}
