//! End-to-end correctness tests for the clustering engine.
//!
//! Run with: cargo test

use parkmeans::{InitMethod, KMeans, KMeansConfig, KMeansOutput, ParKMeansError, INVALID_ID};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;

/// Four points forming two obvious clusters in the plane.
const TWO_CLUSTERS: [f64; 8] = [0.0, 0.0, 0.0, 1.0, 10.0, 10.0, 10.0, 11.0];

fn config(k: usize, init: InitMethod) -> KMeansConfig {
    KMeansConfig {
        k,
        max_iters: 20,
        tol: 0.0,
        init,
        seed: 1234,
        prune: false,
        n_workers: 1,
        initial_centroids: None,
    }
}

/// Centroids as rows, sorted lexicographically so label permutations
/// compare equal.
fn sorted_centroids(out: &KMeansOutput, dim: usize) -> Vec<Vec<f64>> {
    let mut rows: Vec<Vec<f64>> = out.centroids.chunks(dim).map(|c| c.to_vec()).collect();
    rows.sort_by(|a, b| a.partial_cmp(b).unwrap());
    rows
}

fn assert_rows_close(actual: &[Vec<f64>], expected: &[&[f64]], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected.iter()) {
        for (x, y) in a.iter().zip(e.iter()) {
            assert!((x - y).abs() <= tol, "centroid {a:?} differs from {e:?}");
        }
    }
}

/// 1000 points around five well-separated centers, 200 each, with seeded
/// uniform noise.
fn five_blob_data() -> Vec<f64> {
    const CENTERS: [(f64, f64); 5] = [
        (0.0, 0.0),
        (100.0, 0.0),
        (0.0, 100.0),
        (100.0, 100.0),
        (50.0, 50.0),
    ];
    let mut rng = StdRng::seed_from_u64(99);
    let mut data = Vec::with_capacity(2000);
    for &(cx, cy) in &CENTERS {
        for _ in 0..200 {
            data.push(cx + rng.gen_range(-1.0..1.0));
            data.push(cy + rng.gen_range(-1.0..1.0));
        }
    }
    data
}

#[test]
fn test_forgy_two_clusters() {
    let engine = KMeans::new(config(2, InitMethod::Forgy)).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert!(result.converged);
    assert!(result.iters <= 3);

    let mut counts = result.assignment_count.clone();
    counts.sort_unstable();
    assert_eq!(counts, vec![2, 2]);

    assert_eq!(result.assignments[0], result.assignments[1]);
    assert_eq!(result.assignments[2], result.assignments[3]);
    assert_ne!(result.assignments[0], result.assignments[2]);

    let rows = sorted_centroids(&result, 2);
    assert_rows_close(&rows, &[&[0.0, 0.5], &[10.0, 10.5]], 1e-12);
}

#[test]
fn test_random_init_line_partitions_contiguously() {
    // 100 points on the x axis at integer positions 0..99
    let data: Vec<f64> = (0..100).flat_map(|i| [i as f64, 0.0]).collect();
    let engine = KMeans::new(config(4, InitMethod::Random)).unwrap();
    let result = engine.fit(&data, 100, 2).unwrap();

    assert_eq!(result.assignment_count.iter().sum::<u64>(), 100);

    // in one dimension every cluster's region is an interval, so labels
    // along the line form exactly one run per cluster
    let mut runs = 1;
    for w in result.assignments.windows(2) {
        if w[0] != w[1] {
            runs += 1;
        }
    }
    assert_eq!(runs, 4, "expected four contiguous intervals");

    for label in 0..4 {
        let positions: Vec<usize> = (0..100)
            .filter(|&i| result.assignments[i] == label)
            .collect();
        assert!(!positions.is_empty());
        let spread = positions.last().unwrap() - positions.first().unwrap();
        assert!(spread <= 26, "cluster {label} spans {spread} positions");
    }
}

#[test]
fn test_plusplus_two_clusters_converges_immediately() {
    let engine = KMeans::new(config(2, InitMethod::PlusPlus)).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    // seeding already separates the clusters, so the first pass changes
    // nothing and the run stops after one iteration
    assert!(result.converged);
    assert_eq!(result.iters, 1);

    let rows = sorted_centroids(&result, 2);
    assert_rows_close(&rows, &[&[0.0, 0.5], &[10.0, 10.5]], 1e-12);
}

#[test]
fn test_plusplus_five_blobs() {
    let data = five_blob_data();
    let engine = KMeans::new(config(5, InitMethod::PlusPlus)).unwrap();
    let result = engine.fit(&data, 1000, 2).unwrap();

    assert!(result.converged);
    assert!(result.iters <= 15);
    assert_eq!(result.assignment_count.iter().sum::<u64>(), 1000);
    for &count in &result.assignment_count {
        assert!(
            (180..=220).contains(&count),
            "cluster count {count} outside ±10% of the generating mixture"
        );
    }
}

#[test]
fn test_pruned_matches_unpruned() {
    let data = five_blob_data();

    let plain = KMeans::new(config(5, InitMethod::PlusPlus)).unwrap();
    let plain = plain.fit(&data, 1000, 2).unwrap();

    let mut pruned_config = config(5, InitMethod::PlusPlus);
    pruned_config.prune = true;
    let pruned = KMeans::new(pruned_config).unwrap();
    let pruned = pruned.fit(&data, 1000, 2).unwrap();

    assert_eq!(plain.assignment_count, pruned.assignment_count);

    let agreeing = plain
        .assignments
        .iter()
        .zip(pruned.assignments.iter())
        .filter(|(a, b)| a == b)
        .count();
    assert!(
        agreeing as f64 / 1000.0 >= 0.995,
        "only {agreeing}/1000 assignments agree"
    );

    for (a, b) in plain.centroids.iter().zip(pruned.centroids.iter()) {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!(
            (a - b).abs() / scale <= 1e-9,
            "centroid coordinate {a} vs {b} beyond tolerance"
        );
    }
}

#[test]
fn test_pruned_two_clusters_forgy() {
    let mut cfg = config(2, InitMethod::Forgy);
    cfg.prune = true;
    let engine = KMeans::new(cfg).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert!(result.converged);
    let mut counts = result.assignment_count.clone();
    counts.sort_unstable();
    assert_eq!(counts, vec![2, 2]);
    let rows = sorted_centroids(&result, 2);
    assert_rows_close(&rows, &[&[0.0, 0.5], &[10.0, 10.5]], 1e-9);
}

#[test]
fn test_single_cluster_is_global_mean() {
    let engine = KMeans::new(config(1, InitMethod::Forgy)).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert!(result.converged);
    assert!(result.assignments.iter().all(|&a| a == 0));
    assert_eq!(result.assignment_count, vec![4]);
    assert!((result.centroids[0] - 5.0).abs() < 1e-12);
    assert!((result.centroids[1] - 5.5).abs() < 1e-12);
}

#[test]
fn test_every_point_its_own_cluster() {
    let engine = KMeans::new(config(4, InitMethod::Forgy)).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    // the first pass claims one point per centroid; the second changes
    // nothing
    assert!(result.converged);
    assert_eq!(result.iters, 2);
    assert_eq!(result.assignment_count, vec![1, 1, 1, 1]);

    let rows = sorted_centroids(&result, 2);
    assert_rows_close(
        &rows,
        &[&[0.0, 0.0], &[0.0, 1.0], &[10.0, 10.0], &[10.0, 11.0]],
        1e-12,
    );
}

#[test]
fn test_zero_iterations_returns_init_only() {
    let mut cfg = config(2, InitMethod::Forgy);
    cfg.max_iters = 0;
    let engine = KMeans::new(cfg).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert_eq!(result.iters, 0);
    assert!(!result.converged);
    // no EM pass ran, so nothing was ever assigned
    assert!(result.assignments.iter().all(|&a| a == INVALID_ID));
    assert_eq!(result.assignment_count, vec![0, 0]);
}

#[test]
fn test_zero_iterations_random_reports_drawn_partition() {
    let mut cfg = config(2, InitMethod::Random);
    cfg.max_iters = 0;
    let engine = KMeans::new(cfg).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert_eq!(result.iters, 0);
    assert!(!result.converged);
    // random init labels every point, and the returned counts are the
    // tally of exactly those labels
    assert!(result.assignments.iter().all(|&a| a < 2));
    assert_eq!(result.assignment_count.iter().sum::<u64>(), 4);
    for label in 0..2 {
        let tally = result.assignments.iter().filter(|&&a| a == label).count() as u64;
        assert_eq!(result.assignment_count[label], tally);
    }
}

#[test]
fn test_zero_iterations_plusplus_reports_seed_assignment() {
    let mut cfg = config(2, InitMethod::PlusPlus);
    cfg.max_iters = 0;
    let engine = KMeans::new(cfg).unwrap();
    let result = engine.fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert_eq!(result.iters, 0);
    assert!(!result.converged);
    // every point carries its nearest-seed label after seeding
    assert!(result.assignments.iter().all(|&a| a < 2));
    assert_eq!(result.assignment_count.iter().sum::<u64>(), 4);
    for label in 0..2 {
        let tally = result.assignments.iter().filter(|&&a| a == label).count() as u64;
        assert_eq!(result.assignment_count[label], tally);
    }
}

#[test]
fn test_empty_cluster_keeps_previous_centroid() {
    // both far points gravitate to the first centroid; the second never
    // receives a member and must survive the update untouched
    let data = [1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
    let cfg = KMeansConfig {
        k: 2,
        max_iters: 1,
        init: InitMethod::None,
        initial_centroids: Some(vec![2.0, 0.0, 1337.0, 0.0]),
        ..config(2, InitMethod::None)
    };
    let engine = KMeans::new(cfg).unwrap();
    let result = engine.fit(&data, 3, 2).unwrap();

    assert_eq!(result.iters, 1);
    assert_eq!(result.assignment_count, vec![3, 0]);
    assert_eq!(result.centroids, vec![2.0, 0.0, 1337.0, 0.0]);
}

#[test]
fn test_deterministic_across_runs() {
    let data = five_blob_data();
    let mut cfg = config(5, InitMethod::PlusPlus);
    cfg.n_workers = 3;

    let first = KMeans::new(cfg.clone()).unwrap().fit(&data, 1000, 2).unwrap();
    let second = KMeans::new(cfg).unwrap().fit(&data, 1000, 2).unwrap();

    assert_eq!(first.iters, second.iters);
    assert_eq!(first.centroids, second.centroids);
    assert_eq!(first.assignment_count, second.assignment_count);
    assert_eq!(first.assignments, second.assignments);
}

#[test]
fn test_deterministic_random_init_across_runs() {
    let data = five_blob_data();
    let mut cfg = config(5, InitMethod::Random);
    cfg.n_workers = 4;

    let first = KMeans::new(cfg.clone()).unwrap().fit(&data, 1000, 2).unwrap();
    let second = KMeans::new(cfg).unwrap().fit(&data, 1000, 2).unwrap();

    assert_eq!(first.centroids, second.centroids);
    assert_eq!(first.assignments, second.assignments);
}

#[test]
fn test_fit_file_matches_fit() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for value in TWO_CLUSTERS {
        file.write_all(&value.to_le_bytes()).unwrap();
    }
    file.flush().unwrap();

    let mut cfg = config(2, InitMethod::Forgy);
    cfg.n_workers = 2;

    let from_file = KMeans::new(cfg.clone())
        .unwrap()
        .fit_file(file.path(), 4, 2)
        .unwrap();
    let from_memory = KMeans::new(cfg).unwrap().fit(&TWO_CLUSTERS, 4, 2).unwrap();

    assert_eq!(from_file.centroids, from_memory.centroids);
    assert_eq!(from_file.assignments, from_memory.assignments);
    assert_eq!(from_file.assignment_count, from_memory.assignment_count);
}

#[test]
fn test_fit_file_rejects_short_input() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&1.0f64.to_le_bytes()).unwrap();
    file.flush().unwrap();

    let engine = KMeans::new(config(2, InitMethod::Forgy)).unwrap();
    let err = engine.fit_file(file.path(), 4, 2).unwrap_err();
    assert!(matches!(err, ParKMeansError::ShortInput { .. }));
}

#[test]
fn test_config_errors_surface_before_work() {
    let err = KMeans::new(config(0, InitMethod::Forgy)).unwrap_err();
    assert!(matches!(err, ParKMeansError::InvalidParameter(_)));

    let mut cfg = config(2, InitMethod::Forgy);
    cfg.tol = 2.0;
    assert!(KMeans::new(cfg).is_err());

    let err = KMeans::new(config(2, InitMethod::Barbar)).unwrap_err();
    assert!(matches!(err, ParKMeansError::NotSupported(_)));

    // more clusters than samples
    let engine = KMeans::new(config(2, InitMethod::Forgy)).unwrap();
    let err = engine.fit(&[1.0, 2.0], 1, 2).unwrap_err();
    assert!(matches!(err, ParKMeansError::InsufficientSamples { .. }));

    // data length disagrees with the stated shape
    let engine = KMeans::new(config(2, InitMethod::Forgy)).unwrap();
    let err = engine.fit(&TWO_CLUSTERS[..7], 4, 2).unwrap_err();
    assert!(matches!(err, ParKMeansError::DimensionMismatch { .. }));
}
