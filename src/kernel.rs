//! Per-cluster accumulation and averaging over column-major matrices.
//!
//! These operations connect the assignment step to the centroid update:
//! workers accumulate column sums and counts with [`add_sample`] /
//! [`remove_sample`], and the driver turns reduced sums into means with
//! [`col_mean`] (or back into sums with [`unmean`] when mixing cumulative
//! and incremental updates).

use crate::matrix::ColMatrix;

/// Add sample `i` of `data` into cluster column `cid` of `sums` and bump
/// its count.
#[inline]
pub fn add_sample(sums: &mut ColMatrix, cid: usize, data: &ColMatrix, i: usize, counts: &mut [u64]) {
    let sample = data.col(i);
    sums.col_mut(cid)
        .iter_mut()
        .zip(sample.iter())
        .for_each(|(s, v)| *s += v);
    counts[cid] += 1;
}

/// Inverse of [`add_sample`]; used when a point leaves a cluster in the
/// incremental (pruned) update path.
#[inline]
pub fn remove_sample(
    sums: &mut ColMatrix,
    cid: usize,
    data: &ColMatrix,
    i: usize,
    counts: &mut [u64],
) {
    let sample = data.col(i);
    sums.col_mut(cid)
        .iter_mut()
        .zip(sample.iter())
        .for_each(|(s, v)| *s -= v);
    counts[cid] -= 1;
}

/// Write per-column means of `sums` into `out`.
///
/// A column with a zero count is left untouched in `out`, so a cluster that
/// lost all its members keeps its previous centroid.
pub fn col_mean(sums: &ColMatrix, counts: &[u64], out: &mut ColMatrix) {
    assert_eq!(sums.cols(), counts.len());
    assert_eq!(sums.cols(), out.cols());

    for j in 0..sums.cols() {
        if counts[j] == 0 {
            continue;
        }
        let n = counts[j] as f64;
        out.col_mut(j)
            .iter_mut()
            .zip(sums.col(j).iter())
            .for_each(|(o, s)| *o = s / n);
    }
}

/// In-place variant of [`col_mean`]: divides each nonzero-count column of
/// `mat` by its count.
pub fn col_mean_in_place(mat: &mut ColMatrix, counts: &[u64]) {
    assert_eq!(mat.cols(), counts.len());

    for j in 0..mat.cols() {
        if counts[j] == 0 {
            continue;
        }
        let n = counts[j] as f64;
        mat.col_mut(j).iter_mut().for_each(|v| *v /= n);
    }
}

/// Inverse of the column mean: multiply each column back by its previous
/// count to recover the sum form.
pub fn unmean(mat: &mut ColMatrix, counts: &[u64]) {
    assert_eq!(mat.cols(), counts.len());

    for j in 0..mat.cols() {
        let n = counts[j] as f64;
        mat.col_mut(j).iter_mut().for_each(|v| *v *= n);
    }
}
