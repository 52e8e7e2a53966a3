//! Reproducible parallel random number generation.
//!
//! Every participant draws from the same seeded stream: participant `r` of
//! `n` receives draws `r, r + n, r + 2n, …` of the stream a single-rank
//! generator would produce. Concatenating all participants' sequences in
//! round-robin order therefore reproduces the serial sequence exactly,
//! which is what makes `random` initialization identical between serial and
//! parallel runs.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// A uniform integer generator that yields one interleaved slice of a
/// shared seeded stream.
pub struct StridedRng {
    rng: StdRng,
    dist: Uniform<u64>,
    stride: usize,
}

impl StridedRng {
    /// Create the generator for one participant.
    ///
    /// Draws are uniform over the inclusive range `[begin, end]`. `rank`
    /// selects which interleaved subsequence this instance yields out of
    /// `n_ranks` total; all participants must pass the same `seed`.
    pub fn new(begin: u64, end: u64, rank: usize, n_ranks: usize, seed: u64) -> Self {
        assert!(rank < n_ranks, "rank out of range");
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new_inclusive(begin, end);
        // burn this participant's offset into the shared stream
        for _ in 0..rank {
            dist.sample(&mut rng);
        }
        Self {
            rng,
            dist,
            stride: n_ranks,
        }
    }

    /// Next value of this participant's subsequence.
    pub fn next(&mut self) -> u64 {
        let value = self.dist.sample(&mut self.rng);
        // skip the other participants' draws
        for _ in 0..self.stride - 1 {
            self.dist.sample(&mut self.rng);
        }
        value
    }
}
