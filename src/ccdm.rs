//! Pairwise centroid half-distances for triangle-inequality pruning.
//!
//! For centroids `i < j` the matrix stores `½·||C_i − C_j||`. From it the
//! per-centroid `s`-value is derived: `s[j] = min over l != j` of the stored
//! half-distance, the radius inside which a point provably cannot change
//! cluster.

use crate::distance::euclidean;
use crate::matrix::ColMatrix;
use rayon::prelude::*;

/// Upper-triangular matrix of pairwise centroid half-distances.
#[derive(Debug, Clone)]
pub struct CentroidDistMatrix {
    k: usize,
    /// Packed rows: entry `(i, j)` with `i < j` lives at
    /// `i*k - i*(i+1)/2 + (j - i - 1)`.
    upper: Vec<f64>,
}

impl CentroidDistMatrix {
    /// Create an all-zero matrix for `k` centroids.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            upper: vec![0.0; k * (k - 1) / 2],
        }
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < j && j < self.k);
        i * self.k - i * (i + 1) / 2 + (j - i - 1)
    }

    /// Half the Euclidean distance between centroids `i` and `j`.
    ///
    /// Symmetric in its arguments. Must not be called with `i == j`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert_ne!(i, j, "half-distance of a centroid to itself is undefined");
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        self.upper[self.index(lo, hi)]
    }

    /// Recompute every pairwise half-distance from `centroids` and refresh
    /// the `s`-values. O(k² · dim).
    pub fn compute(&mut self, centroids: &ColMatrix, s_values: &mut [f64]) {
        let k = self.k;
        assert_eq!(centroids.cols(), k);
        assert_eq!(s_values.len(), k);

        self.upper = (0..k)
            .into_par_iter()
            .flat_map_iter(|i| {
                let ci = centroids.col(i);
                (i + 1..k)
                    .map(|j| 0.5 * euclidean(ci, centroids.col(j)))
                    .collect::<Vec<_>>()
            })
            .collect();

        s_values
            .par_iter_mut()
            .enumerate()
            .for_each(|(j, s)| {
                let mut min = f64::INFINITY;
                for l in 0..k {
                    if l == j {
                        continue;
                    }
                    let d = self.get(j, l);
                    if d < min {
                        min = d;
                    }
                }
                *s = min;
            });
    }
}
