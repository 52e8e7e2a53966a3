//! Driver: orchestrates initialization, iteration, and result assembly.
//!
//! The driver owns the worker pool and the shared read-side state. Per
//! iteration it wakes every worker for an assignment pass, waits for the
//! barrier to drain, reduces the per-worker sums/counts/change-totals
//! (first across workers, then across ranks through the [`Collective`]),
//! refreshes the centroids, and tests convergence.

use crate::collective::{Collective, ProcessLocal};
use crate::config::{InitMethod, KMeansConfig};
use crate::constants::ELEM_BYTES;
use crate::distance::euclidean;
use crate::error::{ParKMeansError, Result};
use crate::kernel::{add_sample, col_mean, col_mean_in_place, unmean};
use crate::matrix::ColMatrix;
use crate::rng::StridedRng;
use crate::worker::{SharedState, WorkerHandle, WorkerTask};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Final state of a clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansOutput {
    /// EM iterations performed.
    pub iters: usize,
    /// Whether the run stopped on the tolerance rather than the cap.
    pub converged: bool,
    /// Centroids in row-major layout: centroid 0's coordinates first.
    pub centroids: Vec<f64>,
    /// Samples per cluster; sums to the global sample count.
    pub assignment_count: Vec<u64>,
    /// Cluster id per sample, interleaved round-robin over the shard
    /// owners (global row order when there is a single worker).
    pub assignments: Vec<usize>,
}

/// Parallel k-means clustering engine.
///
/// Create one with a validated [`KMeansConfig`], then call [`fit`] for an
/// in-memory matrix or [`fit_file`] for a raw on-disk matrix. Both expect
/// one sample per row, `dim` values each.
///
/// [`fit`]: KMeans::fit
/// [`fit_file`]: KMeans::fit_file
pub struct KMeans {
    config: KMeansConfig,
    collective: Arc<dyn Collective>,
}

impl std::fmt::Debug for KMeans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KMeans")
            .field("config", &self.config)
            .field("collective_rank", &self.collective.rank())
            .field("collective_n_ranks", &self.collective.n_ranks())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum ShardSource<'a> {
    File(&'a Path),
    Memory(&'a [f64]),
}

impl KMeans {
    /// Create an engine for a single-process run.
    pub fn new(config: KMeansConfig) -> Result<Self> {
        Self::with_collective(config, Arc::new(ProcessLocal))
    }

    /// Create an engine wired to a rank-wide messaging substrate.
    pub fn with_collective(config: KMeansConfig, collective: Arc<dyn Collective>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, collective })
    }

    /// Cluster an in-memory matrix of `n_rows` samples with `dim` values
    /// each (sample-major, i.e. each sample contiguous).
    pub fn fit(&self, data: &[f64], n_rows: usize, dim: usize) -> Result<KMeansOutput> {
        if data.len() != n_rows * dim {
            return Err(ParKMeansError::DimensionMismatch {
                expected: n_rows * dim,
                actual: data.len(),
            });
        }
        self.run(n_rows, dim, ShardSource::Memory(data))
    }

    /// Cluster a raw little-endian `f64` matrix stored on disk, headerless,
    /// `n_rows × dim` elements with each sample contiguous.
    ///
    /// Workers seek to their block of rows and load it themselves; only the
    /// pre-flight size check happens here.
    pub fn fit_file(&self, path: impl AsRef<Path>, n_rows: usize, dim: usize) -> Result<KMeansOutput> {
        let path = path.as_ref();
        let required = (n_rows * dim * ELEM_BYTES) as u64;
        let actual = std::fs::metadata(path)?.len();
        if actual < required {
            return Err(ParKMeansError::ShortInput { required, actual });
        }
        self.run(n_rows, dim, ShardSource::File(path))
    }

    fn run(&self, n_rows: usize, dim: usize, source: ShardSource<'_>) -> Result<KMeansOutput> {
        let k = self.config.k;
        if n_rows == 0 {
            return Err(ParKMeansError::invalid_parameter("matrix has no rows"));
        }
        if dim == 0 {
            return Err(ParKMeansError::invalid_parameter("matrix has no columns"));
        }
        if k > n_rows {
            return Err(ParKMeansError::InsufficientSamples { k, n: n_rows });
        }

        let n_workers = effective_workers(self.config.n_workers, n_rows);
        let shared = Arc::new(SharedState::new(dim, k, n_rows));

        let mut workers = Vec::with_capacity(n_workers);
        for (id, (start_row, n_local)) in partition(n_rows, n_workers).into_iter().enumerate() {
            let (file, preloaded) = match source {
                ShardSource::File(path) => (Some(path.to_path_buf()), None),
                ShardSource::Memory(data) => (
                    None,
                    Some(data[start_row * dim..(start_row + n_local) * dim].to_vec()),
                ),
            };
            workers.push(WorkerHandle::spawn(
                id,
                dim,
                k,
                start_row,
                n_local,
                file,
                preloaded,
                Arc::clone(&shared),
            )?);
        }

        let run = Run {
            config: &self.config,
            collective: self.collective.as_ref(),
            shared,
            workers,
            n_global: n_rows,
            dim,
            k,
        };

        if matches!(source, ShardSource::File(_)) {
            run.dispatch(WorkerTask::Alloc);
        }
        run.execute()
    }
}

/// One in-flight clustering run.
struct Run<'a> {
    config: &'a KMeansConfig,
    collective: &'a dyn Collective,
    shared: Arc<SharedState>,
    workers: Vec<WorkerHandle>,
    n_global: usize,
    dim: usize,
    k: usize,
}

impl Run<'_> {
    fn execute(&self) -> Result<KMeansOutput> {
        let init_counts = self.init_centroids()?;
        let (iters, converged, counts) = self.iterate(init_counts)?;
        self.assemble(iters, converged, counts)
    }

    /// Wake every worker with `task` and wait for all of them to return to
    /// their channel.
    fn dispatch(&self, task: WorkerTask) {
        self.shared.barrier.arm(self.workers.len());
        for worker in &self.workers {
            worker.wake(task);
        }
        self.shared.barrier.wait_all();
    }

    /// Seed the centroids. Returns the per-cluster counts of the labels the
    /// method wrote into the assignment vectors, so a zero-iteration run
    /// still reports counts matching its assignments; methods that assign
    /// nothing (`forgy`, `none`) return all zeros.
    fn init_centroids(&self) -> Result<Vec<u64>> {
        info!(method = %self.config.init, k = self.k, "initializing centroids");
        match self.config.init {
            InitMethod::Random => self.init_random(),
            InitMethod::Forgy => self.init_forgy(),
            InitMethod::PlusPlus => self.init_plusplus(),
            InitMethod::None => self.init_precomputed(),
            InitMethod::Barbar | InitMethod::Sketch => Err(ParKMeansError::not_supported(
                format!("initialization method '{}'", self.config.init),
            )),
        }
    }

    /// Uniform-random partition: every point draws a cluster id from the
    /// interleaved seeded stream, centroids become the partition means.
    fn init_random(&self) -> Result<Vec<u64>> {
        let mut sums = ColMatrix::zeroed(self.dim, self.k);
        let mut counts = vec![0u64; self.k];

        let participants = self.collective.n_ranks() * self.workers.len();
        let first_participant = self.collective.rank() * self.workers.len();

        for (w, handle) in self.workers.iter().enumerate() {
            let mut gen = StridedRng::new(
                0,
                (self.k - 1) as u64,
                first_participant + w,
                participants,
                self.config.seed,
            );
            let mut guard = handle.shard.lock().unwrap();
            let shard = &mut *guard;
            for i in 0..shard.data.cols() {
                let cid = gen.next() as usize;
                add_sample(&mut sums, cid, &shard.data, i, &mut counts);
                shard.assignments[i] = cid;
            }
        }

        self.collective.allreduce_sum_f64(sums.as_mut_slice())?;
        self.collective.allreduce_sum_u64(&mut counts)?;

        let mut centroids = self.shared.centroids.write().unwrap();
        col_mean(&sums, &counts, &mut centroids);
        // the drawn partition seeds the centroids and is reported as-is by
        // a zero-iteration run; the first EM pass reassigns everything
        Ok(counts)
    }

    /// Forgy seeding: k distinct rows become the initial centroids.
    fn init_forgy(&self) -> Result<Vec<u64>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let chosen = rand::seq::index::sample(&mut rng, self.n_global, self.k);

        for (cl, gid) in chosen.into_iter().enumerate() {
            self.set_centroid_from_row(cl, gid)?;
        }
        Ok(vec![0; self.k])
    }

    /// k-means++ weighted seeding.
    fn init_plusplus(&self) -> Result<Vec<u64>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let first = rng.gen_range(0..self.n_global);
        self.set_centroid_from_row(0, first)?;

        for cl in 1..self.k {
            self.dispatch(WorkerTask::WeightedDist { centroid: cl - 1 });

            let mut total = [self.local_cuml_dist()];
            self.collective.allreduce_sum_f64(&mut total)?;
            let total = total[0];

            let next = if total > 0.0 {
                self.pick_weighted(rng.gen_range(0.0..total))
            } else {
                // every point coincides with a chosen seed
                rng.gen_range(0..self.n_global)
            };
            debug!(centroid = cl, row = next, "seed chosen");
            self.set_centroid_from_row(cl, next)?;
        }

        // fold the last seed into the tentative assignments so the first EM
        // pass starts from nearest-of-all-seeds
        self.dispatch(WorkerTask::WeightedDist { centroid: self.k - 1 });

        // tally the tentative labels so they are reported alongside the
        // assignments if no EM pass runs
        let mut counts = vec![0u64; self.k];
        for handle in &self.workers {
            let shard = handle.shard.lock().unwrap();
            for &label in &shard.assignments {
                counts[label] += 1;
            }
        }
        self.collective.allreduce_sum_u64(&mut counts)?;
        Ok(counts)
    }

    fn init_precomputed(&self) -> Result<Vec<u64>> {
        let initial = self
            .config
            .initial_centroids
            .as_ref()
            .expect("validated at construction");
        if initial.len() != self.k * self.dim {
            return Err(ParKMeansError::DimensionMismatch {
                expected: self.k * self.dim,
                actual: initial.len(),
            });
        }
        let mut centroids = self.shared.centroids.write().unwrap();
        for cl in 0..self.k {
            centroids
                .col_mut(cl)
                .copy_from_slice(&initial[cl * self.dim..(cl + 1) * self.dim]);
        }
        Ok(vec![0; self.k])
    }

    fn local_cuml_dist(&self) -> f64 {
        self.workers
            .iter()
            .map(|w| w.shard.lock().unwrap().cuml_dist)
            .sum()
    }

    /// Walk the sharded nearest-seed distances in global row order,
    /// consuming `r` until it crosses zero.
    fn pick_weighted(&self, mut r: f64) -> usize {
        for handle in &self.workers {
            let shard = handle.shard.lock().unwrap();
            for (i, &dist) in shard.init_dist.iter().enumerate() {
                r -= dist;
                if r <= 0.0 {
                    return handle.start_row + i;
                }
            }
        }
        // floating-point underwalk
        self.n_global - 1
    }

    /// Install global row `gid` as centroid `cl` on every rank.
    ///
    /// The owning rank copies the row into the centroid column and then
    /// broadcasts it; the owner is agreed on first, since only the rank
    /// holding the row knows it does.
    fn set_centroid_from_row(&self, cl: usize, gid: usize) -> Result<()> {
        let mut centroids = self.shared.centroids.write().unwrap();
        let mut owner = [0u64];
        if let Some((w, local)) = self.locate(gid) {
            let shard = self.workers[w].shard.lock().unwrap();
            centroids.col_mut(cl).copy_from_slice(shard.data.col(local));
            owner[0] = self.collective.rank() as u64;
        } else {
            centroids.col_mut(cl).fill(0.0);
        }
        // non-owners contribute zero, so the sum is the owning rank's id
        self.collective.allreduce_sum_u64(&mut owner)?;
        self.collective
            .broadcast_f64(centroids.col_mut(cl), owner[0] as usize)
    }

    /// Map a global row index to `(worker, local column)` if the row is
    /// resident on this rank.
    fn locate(&self, gid: usize) -> Option<(usize, usize)> {
        self.workers.iter().enumerate().find_map(|(w, h)| {
            (gid >= h.start_row && gid < h.start_row + h.n_local).then(|| (w, gid - h.start_row))
        })
    }

    /// The EM loop. Returns `(iters, converged, final assignment counts)`.
    ///
    /// `init_counts` covers the zero-iteration case: until the first pass
    /// reduces real counts, the initialization's tally is what a caller
    /// gets back.
    fn iterate(&self, init_counts: Vec<u64>) -> Result<(usize, bool, Vec<u64>)> {
        let prune = self.config.prune;
        let mut iters = 0;
        let mut converged = false;
        let mut prev_counts = vec![0u64; self.k];
        let mut final_counts = init_counts;

        while iters < self.config.max_iters {
            if prune && iters > 0 {
                let centroids = self.shared.centroids.read().unwrap();
                let mut guard = self.shared.prune.write().unwrap();
                let state = &mut *guard;
                state.ccdm.compute(&centroids, &mut state.s_values);
            }

            let task = if prune {
                WorkerTask::PrunedEm {
                    prune_init: iters == 0,
                }
            } else {
                WorkerTask::Em
            };
            self.dispatch(task);
            iters += 1;

            // reduce worker outputs, then rank-wide
            let mut nchanged = [0u64];
            let mut counts = vec![0u64; self.k];
            let mut sums = ColMatrix::zeroed(self.dim, self.k);
            for handle in &self.workers {
                let shard = handle.shard.lock().unwrap();
                nchanged[0] += shard.nchanged;
                counts
                    .iter_mut()
                    .zip(shard.counts.iter())
                    .for_each(|(a, b)| *a += b);
                sums.add_assign(&shard.local_sums);
            }
            self.collective.allreduce_sum_u64(&mut nchanged)?;
            self.collective.allreduce_sum_u64(&mut counts)?;
            self.collective.allreduce_sum_f64(sums.as_mut_slice())?;
            let nchanged = nchanged[0];
            assert_eq!(
                counts.iter().sum::<u64>(),
                self.n_global as u64,
                "global assignment counts must cover every sample"
            );

            // refresh centroids before the convergence test so the result
            // always carries the means of the final assignment
            {
                let mut centroids = self.shared.centroids.write().unwrap();
                if !prune {
                    col_mean(&sums, &counts, &mut centroids);
                } else {
                    let prev_centroids = centroids.clone();
                    if iters == 1 {
                        centroids.zero();
                    } else {
                        // recover the sum form before folding in this
                        // iteration's incremental adds/removes
                        unmean(&mut centroids, &prev_counts);
                    }
                    centroids.add_assign(&sums);
                    col_mean_in_place(&mut centroids, &counts);

                    let mut prune_state = self.shared.prune.write().unwrap();
                    for j in 0..self.k {
                        prune_state.drift[j] = euclidean(prev_centroids.col(j), centroids.col(j));
                    }
                    prev_counts.copy_from_slice(&counts);
                }
            }

            let perc_changed = nchanged as f64 / self.n_global as f64;
            debug!(iteration = iters, nchanged, perc_changed, "iteration done");
            final_counts.copy_from_slice(&counts);

            if perc_changed <= self.config.tol {
                converged = true;
                info!(iterations = iters, "converged");
                break;
            }
        }

        if !converged && self.config.max_iters > 0 {
            info!(iterations = iters, "stopped at iteration cap");
        }
        Ok((iters, converged, final_counts))
    }

    /// Build the result object: centroids row-major, counts, and the
    /// interleaved global assignment vector.
    fn assemble(&self, iters: usize, converged: bool, counts: Vec<u64>) -> Result<KMeansOutput> {
        let locals: Vec<Vec<usize>> = self
            .workers
            .iter()
            .map(|w| w.shard.lock().unwrap().assignments.clone())
            .collect();
        let assignments = self.gather_assignments(locals)?;
        let centroids = self.shared.centroids.read().unwrap().to_row_major();

        Ok(KMeansOutput {
            iters,
            converged,
            centroids,
            assignment_count: counts,
            assignments,
        })
    }

    /// Interleave per-worker assignments round-robin; with multiple ranks,
    /// rank 0 additionally gathers and interleaves the per-rank vectors.
    fn gather_assignments(&self, locals: Vec<Vec<usize>>) -> Result<Vec<usize>> {
        let local = interleave(&locals);

        let n_ranks = self.collective.n_ranks();
        if n_ranks == 1 {
            return Ok(local);
        }

        let rank = self.collective.rank();
        let mut per_rank = vec![0u64; n_ranks];
        per_rank[rank] = local.len() as u64;
        self.collective.allreduce_sum_u64(&mut per_rank)?;

        let local: Vec<u64> = local.into_iter().map(|a| a as u64).collect();
        if rank != 0 {
            self.collective.send_u64(&local, 0)?;
            return Ok(Vec::new());
        }

        let mut all: Vec<Vec<u64>> = Vec::with_capacity(n_ranks);
        all.push(local);
        for src in 1..n_ranks {
            let mut buf = vec![0u64; per_rank[src] as usize];
            self.collective.recv_u64(&mut buf, src)?;
            all.push(buf);
        }

        let longest = all.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut global = Vec::with_capacity(self.n_global);
        for m in 0..longest {
            for rank_vec in &all {
                if m < rank_vec.len() {
                    global.push(rank_vec[m] as usize);
                }
            }
        }
        Ok(global)
    }
}

/// Round-robin merge of per-worker vectors, skipping exhausted workers.
fn interleave(locals: &[Vec<usize>]) -> Vec<usize> {
    let longest = locals.iter().map(|l| l.len()).max().unwrap_or(0);
    let total: usize = locals.iter().map(|l| l.len()).sum();
    let mut merged = Vec::with_capacity(total);
    for m in 0..longest {
        for local in locals {
            if m < local.len() {
                merged.push(local[m]);
            }
        }
    }
    merged
}

/// Contiguous block partition: `(start_row, n_local)` per worker, earlier
/// workers taking the remainder rows.
fn partition(n_rows: usize, n_workers: usize) -> Vec<(usize, usize)> {
    let base = n_rows / n_workers;
    let extra = n_rows % n_workers;
    let mut start = 0;
    (0..n_workers)
        .map(|w| {
            let len = base + usize::from(w < extra);
            let part = (start, len);
            start += len;
            part
        })
        .collect()
}

fn effective_workers(requested: usize, n_rows: usize) -> usize {
    let n = if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        requested
    };
    n.clamp(1, n_rows)
}
