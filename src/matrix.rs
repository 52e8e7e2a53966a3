//! Dense column-major matrix storage.
//!
//! Every matrix in the engine (data shards, centroids, per-worker
//! accumulators) is a `dim × cols` block of `f64` with one *sample or
//! centroid per column*, so a column is always a contiguous slice.

/// A dense column-major matrix of `f64`.
#[derive(Clone, Debug, PartialEq)]
pub struct ColMatrix {
    dim: usize,
    cols: usize,
    data: Vec<f64>,
}

impl ColMatrix {
    /// Create a zero-filled matrix with `dim` rows and `cols` columns.
    pub fn zeroed(dim: usize, cols: usize) -> Self {
        Self {
            dim,
            cols,
            data: vec![0.0; dim * cols],
        }
    }

    /// Wrap an existing column-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != dim * cols`.
    pub fn from_vec(dim: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), dim * cols, "buffer does not match shape");
        Self { dim, cols, data }
    }

    /// Number of rows (the dimensionality of one column).
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow column `j` as a slice of length `dim`.
    #[inline]
    pub fn col(&self, j: usize) -> &[f64] {
        &self.data[j * self.dim..(j + 1) * self.dim]
    }

    /// Mutably borrow column `j`.
    #[inline]
    pub fn col_mut(&mut self, j: usize) -> &mut [f64] {
        &mut self.data[j * self.dim..(j + 1) * self.dim]
    }

    /// Borrow the whole backing buffer.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutably borrow the whole backing buffer.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Reset every element to zero.
    pub fn zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Elementwise add another matrix of the same shape.
    pub fn add_assign(&mut self, other: &ColMatrix) {
        assert_eq!(self.data.len(), other.data.len(), "shape mismatch");
        self.data
            .iter_mut()
            .zip(other.data.iter())
            .for_each(|(a, b)| *a += b);
    }

    /// Copy the matrix out with each column as one contiguous run.
    ///
    /// With one centroid per column this yields centroid 0's coordinates
    /// first, then centroid 1's: the row-major layout of the result object.
    pub fn to_row_major(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.data.len());
        for j in 0..self.cols {
            out.extend_from_slice(self.col(j));
        }
        out
    }
}
