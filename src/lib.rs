//! # dictfact: Streaming Dictionary Learning
//!
//! dictfact factorizes a data matrix `X ≈ A·D` into a dictionary `D` of
//! `n_components` atoms and per-sample codes `A`, one mini-batch at a time.
//! Each batch only touches a random subset of the features, so the cost of a
//! dictionary update scales with `n_features / reduction` rather than with
//! the full width of the data.
//!
//! ## Quick Start
//!
//! ```rust
//! use dictfact::{DictFact, DictFactConfig, Matrix};
//!
//! let x = Matrix::from_rows(&[
//!     vec![1.0, 2.0, 0.0, 1.0, 3.0, 0.0],
//!     vec![0.0, 1.0, 1.0, 2.0, 1.0, 1.0],
//!     vec![2.0, 4.0, 0.0, 2.0, 6.0, 0.0],
//!     vec![1.0, 3.0, 1.0, 3.0, 4.0, 1.0],
//! ])?;
//!
//! let config = DictFactConfig::default()
//!     .with_components(2)
//!     .with_batch_size(2)
//!     .with_reduction(2.0)
//!     .with_code_penalty(0.1, 0.5)
//!     .with_seed(0);
//!
//! let mut engine = DictFact::new(config)?;
//! engine.fit(&x)?;
//!
//! let codes = engine.transform(&x)?;
//! println!("score: {:.4}", engine.score(&x)?);
//! # assert_eq!(codes.shape(), (4, 2));
//! # Ok::<(), dictfact::DictFactError>(())
//! ```
//!
//! ## Core Concepts
//!
//! - **Atoms**: rows of `D`, each held inside the elastic-net unit ball
//! - **Codes**: elastic-net regressions of each sample on the atoms
//! - **Statistics**: running `C = AᵗA` and `B = AᵗX` moments that stand in for
//!   all past data
//! - **Reduction**: features per batch is `n_features / reduction`
//! - **Aggregation**: how subsampled `D·x` and `D·Dᵗ` estimates are formed
//!   (`Full`, `Masked` or `Average`)

pub mod config;
pub mod dict_fact;
pub mod enet;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod sampler;
pub mod schedule;

// Re-exports for convenience
pub use config::{Aggregation, DictFactConfig};
pub use dict_fact::{Callback, DictFact};
pub use error::{DictFactError, Result};
pub use matrix::Matrix;
pub use sampler::FeatureSampler;
