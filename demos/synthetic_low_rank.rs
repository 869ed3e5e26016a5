//! Low-Rank Recovery with Feature Subsampling
//!
//! Builds a 500 x 200 matrix from 5 hidden factors plus noise, then learns a
//! 5-atom dictionary while each batch only looks at a quarter of the columns.
//! Compares the three aggregation modes on final score and wall time.
//!
//! Run: cargo run --example synthetic_low_rank

use dictfact::{Aggregation, DictFact, DictFactConfig, Matrix};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::time::Instant;

const N_SAMPLES: usize = 500;
const N_FEATURES: usize = 200;
const RANK: usize = 5;

/// X = U·V + noise, with non-negative sparse factors.
fn generate_data(seed: u64) -> Matrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let u: Vec<f64> = (0..N_SAMPLES * RANK)
        .map(|_| if rng.gen::<f64>() < 0.4 { rng.gen::<f64>() } else { 0.0 })
        .collect();
    let u = Matrix::from_vec(N_SAMPLES, RANK, u).unwrap();

    let v: Vec<f64> = (0..RANK * N_FEATURES)
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    let v = Matrix::from_vec(RANK, N_FEATURES, v).unwrap();

    let mut x = u.matmul(&v);
    for value in x.data_mut() {
        *value += 0.05 * rng.sample::<f64, _>(StandardNormal);
    }
    x
}

fn main() {
    println!("=== Streaming dictionary learning on a rank-{} matrix ===\n", RANK);

    let x = generate_data(42);
    println!("Data: {} samples x {} features", x.rows(), x.cols());

    let base = DictFactConfig::default()
        .with_components(RANK)
        .with_batch_size(25)
        .with_reduction(4.0)
        .with_epochs(5)
        .with_code_penalty(0.05, 0.5)
        .with_learning_rates(0.9, 0.76)
        .with_verbose(4)
        .with_seed(0);

    for (name, agg) in [
        ("full", Aggregation::Full),
        ("masked", Aggregation::Masked),
        ("average", Aggregation::Average),
    ] {
        let config = base.clone().with_aggregation(agg);
        let mut engine = DictFact::new(config).unwrap();

        engine.prepare_with_data(&x).unwrap();
        let initial = engine.score(&x).unwrap();

        engine.set_callback(|e: &DictFact| {
            println!("    after {:>5} samples", e.n_iter());
        });

        println!("\n[{}]", name);
        let start = Instant::now();
        engine.fit(&x).unwrap();
        let elapsed = start.elapsed();

        let final_score = engine.score(&x).unwrap();
        println!("  initial score: {:.4}", initial);
        println!("  final score:   {:.4}", final_score);
        println!("  time:          {:.1?}", elapsed);

        let codes = engine.transform(&x).unwrap();
        let nonzero = codes.data().iter().filter(|&&v| v != 0.0).count();
        println!(
            "  code density:  {:.1}%",
            100.0 * nonzero as f64 / codes.data().len() as f64
        );
    }
}
