//! Engine layer: the per-batch pieces the fit driver composes.
//!
//! - [`code`]: elastic-net code inference under the three Gram/cross-product
//!   aggregation regimes
//! - [`statistics`]: the `C`/`B` sufficient statistics and per-sample caches
//! - [`dictionary`]: block coordinate descent on the active feature subset,
//!   with incremental Gram maintenance
//! - [`parallel`]: row-block fan-out and the two-task statistics fork/join
//!
//! Each piece owns disjoint state so the driver can hand them to different
//! workers within a batch without locking.

pub mod code;
pub mod dictionary;
pub mod parallel;
pub mod statistics;

pub use code::{compute_code, solve_codes, CodeBatch, CodeParams, GramRef};
pub use dictionary::DictionaryUpdater;
pub use parallel::Executor;
pub use statistics::{SampleCache, SufficientStatistics};
