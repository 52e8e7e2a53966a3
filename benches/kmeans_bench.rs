//! Benchmarks for the clustering engine.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parkmeans::{distance, InitMethod, KMeans, KMeansConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(n_rows: usize, dim: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_rows * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn benchmark_distance(c: &mut Criterion) {
    for dim in [16, 64, 256] {
        let a = random_matrix(1, dim, 1);
        let b = random_matrix(1, dim, 2);
        c.bench_function(&format!("euclidean_{dim}"), |bench| {
            bench.iter(|| distance::euclidean(black_box(&a), black_box(&b)))
        });
    }
}

fn benchmark_fit(c: &mut Criterion) {
    let (n_rows, dim, k) = (10_000, 16, 8);
    let data = random_matrix(n_rows, dim, 42);

    for (label, prune) in [("lloyd", false), ("pruned", true)] {
        let config = KMeansConfig {
            k,
            max_iters: 10,
            tol: 0.0,
            init: InitMethod::PlusPlus,
            seed: 1234,
            prune,
            n_workers: 4,
            initial_centroids: None,
        };
        let engine = KMeans::new(config).unwrap();
        c.bench_function(&format!("fit_10k_16d_{label}"), |bench| {
            bench.iter(|| engine.fit(black_box(&data), n_rows, dim).unwrap())
        });
    }
}

criterion_group!(benches, benchmark_distance, benchmark_fit);
criterion_main!(benches);
