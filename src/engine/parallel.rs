//! Data-parallel fan-out for the fitting engine.
//!
//! Two shapes of parallelism are needed, and nothing else:
//!
//! - a row-block map: a flat row-major buffer is cut into contiguous blocks of
//!   `ceil(rows / n_threads)` rows, each handed to one task with the index of
//!   its first row; blocks never overlap so no locking is needed
//! - a two-task fork/join for the independent statistic streams of a batch
//!
//! With a single thread no pool is built and both run inline on the caller.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::Result;

/// Optional fixed-size worker pool.
pub struct Executor {
    pool: Option<ThreadPool>,
    n_threads: usize,
}

impl Executor {
    /// Build a pool of `n_threads` workers, or none for `n_threads <= 1`.
    pub fn new(n_threads: usize) -> Result<Self> {
        let pool = if n_threads > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .thread_name(|i| format!("dictfact-worker-{i}"))
                .build()?;
            log::info!("Started worker pool with {} threads", n_threads);
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            pool,
            n_threads: n_threads.max(1),
        })
    }

    /// Single-threaded executor.
    pub fn serial() -> Self {
        Self {
            pool: None,
            n_threads: 1,
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Rows per block when splitting `n_rows` rows across the workers.
    pub fn block_rows(&self, n_rows: usize) -> usize {
        n_rows.div_ceil(self.n_threads).max(1)
    }

    /// Run `f(first_row, block)` over contiguous row blocks of `data`
    /// (`width` entries per row) and wait for all of them.
    ///
    /// The first error returned by any block aborts the call.
    pub fn for_each_row_block<F>(&self, data: &mut [f64], width: usize, f: F) -> Result<()>
    where
        F: Fn(usize, &mut [f64]) -> Result<()> + Send + Sync,
    {
        if width == 0 || data.is_empty() {
            return Ok(());
        }
        let n_rows = data.len() / width;
        match &self.pool {
            None => f(0, data),
            Some(pool) => {
                let block = self.block_rows(n_rows);
                pool.install(|| {
                    data.par_chunks_mut(block * width)
                        .enumerate()
                        .try_for_each(|(b, chunk)| f(b * block, chunk))
                })
            }
        }
    }

    /// Run two independent tasks concurrently and wait for both.
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        match &self.pool {
            None => {
                let ra = a();
                let rb = b();
                (ra, rb)
            }
            Some(pool) => pool.install(|| rayon::join(a, b)),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("n_threads", &self.n_threads)
            .field("parallel", &self.is_parallel())
            .finish()
    }
}
