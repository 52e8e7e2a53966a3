//! Worker runtime: one OS thread per data shard.
//!
//! Each worker exclusively owns a contiguous block of samples plus the
//! per-shard EM state (assignment vector, centroid sum accumulator, counts,
//! pruning bounds). The driver wakes workers by sending a [`WorkerTask`]
//! down their channel; a worker executes the pass, then decrements the
//! shared pending count and returns to waiting on the channel. The driver
//! touches a worker's state only after the barrier has drained, which is
//! what makes the per-pass lock uncontended.

use crate::bitvec::AtomicBoolVec;
use crate::ccdm::CentroidDistMatrix;
use crate::constants::{ELEM_BYTES, INVALID_ID};
use crate::distance::{euclidean, euclidean_squared};
use crate::kernel::{add_sample, remove_sample};
use crate::matrix::ColMatrix;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use tracing::error;

/// A command from the driver, executed by a waiting worker.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WorkerTask {
    /// Read this worker's shard from the input file into local memory.
    Alloc,
    /// One standard Lloyd assignment pass over the shard.
    Em,
    /// One triangle-inequality-pruned assignment pass.
    PrunedEm { prune_init: bool },
    /// k-means++ distance scan against one freshly chosen centroid.
    WeightedDist { centroid: usize },
    /// Leave the command loop; the thread exits.
    Exit,
}

/// Pruning state shared read-only with workers during a pass.
pub(crate) struct PruneShared {
    pub ccdm: CentroidDistMatrix,
    /// `s[j]`: half-distance from centroid `j` to its nearest neighbor.
    pub s_values: Vec<f64>,
    /// `drift[j]`: distance centroid `j` moved in the latest update.
    pub drift: Vec<f64>,
}

impl PruneShared {
    fn new(k: usize) -> Self {
        Self {
            ccdm: CentroidDistMatrix::new(k),
            s_values: vec![f64::INFINITY; k],
            drift: vec![0.0; k],
        }
    }
}

/// State shared between the driver and all workers.
///
/// `centroids` and `prune` are written by the driver strictly between
/// passes; workers only ever read them while a pass is in flight.
pub(crate) struct SharedState {
    pub centroids: RwLock<ColMatrix>,
    pub prune: RwLock<PruneShared>,
    /// One bit per global sample: "exact distance to the assigned centroid
    /// has been recomputed this pass".
    pub recalculated: AtomicBoolVec,
    pub barrier: TaskBarrier,
}

impl SharedState {
    pub fn new(dim: usize, k: usize, n_global: usize) -> Self {
        Self {
            centroids: RwLock::new(ColMatrix::zeroed(dim, k)),
            prune: RwLock::new(PruneShared::new(k)),
            recalculated: AtomicBoolVec::new(n_global, false),
            barrier: TaskBarrier::new(),
        }
    }
}

/// Pending-count barrier between the driver and its workers.
///
/// The driver arms the barrier with the number of woken workers; each
/// worker decrements exactly once after writing its outputs. The decrement
/// happening-before the driver's wakeup is what licenses the driver to read
/// worker state without further synchronization.
pub(crate) struct TaskBarrier {
    pending: Mutex<usize>,
    all_done: Condvar,
}

impl TaskBarrier {
    fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            all_done: Condvar::new(),
        }
    }

    pub fn arm(&self, n: usize) {
        let mut pending = self.pending.lock().unwrap();
        assert_eq!(*pending, 0, "barrier armed while a pass is in flight");
        *pending = n;
    }

    pub fn complete_one(&self) {
        let mut pending = self.pending.lock().unwrap();
        assert!(*pending > 0, "worker completed a task it was never given");
        *pending -= 1;
        if *pending == 0 {
            self.all_done.notify_all();
        }
    }

    pub fn wait_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.all_done.wait(pending).unwrap();
        }
    }
}

/// Everything a worker owns about its shard.
pub(crate) struct WorkerShard {
    /// `dim × n_local` block of samples, immutable once loaded.
    pub data: ColMatrix,
    /// Global row index of local column 0.
    pub start_row: usize,
    /// Per-sample cluster assignment, [`INVALID_ID`] until first assigned.
    pub assignments: Vec<usize>,
    /// Upper bound on each sample's distance to its assigned centroid
    /// (pruning mode).
    pub dist_upper: Vec<f64>,
    /// Squared distance to the nearest chosen seed (k-means++ phase).
    pub init_dist: Vec<f64>,
    /// Column sums of samples per assigned cluster.
    pub local_sums: ColMatrix,
    /// Samples currently assigned to each cluster.
    pub counts: Vec<u64>,
    /// Assignments that changed during the latest pass.
    pub nchanged: u64,
    /// Sum of `init_dist` over the shard after the latest weighted scan.
    pub cuml_dist: f64,
}

impl WorkerShard {
    fn new(dim: usize, k: usize, start_row: usize, n_local: usize, data: ColMatrix) -> Self {
        Self {
            data,
            start_row,
            assignments: vec![INVALID_ID; n_local],
            dist_upper: vec![f64::INFINITY; n_local],
            init_dist: vec![f64::INFINITY; n_local],
            local_sums: ColMatrix::zeroed(dim, k),
            counts: vec![0; k],
            nchanged: 0,
            cuml_dist: 0.0,
        }
    }
}

/// Driver-side handle to one worker thread.
pub(crate) struct WorkerHandle {
    tasks: Sender<WorkerTask>,
    pub shard: Arc<Mutex<WorkerShard>>,
    pub start_row: usize,
    pub n_local: usize,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker owning rows `[start_row, start_row + n_local)`.
    ///
    /// `source` is the input file to load on [`WorkerTask::Alloc`];
    /// `preloaded` supplies the shard directly for in-memory runs.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: usize,
        dim: usize,
        k: usize,
        start_row: usize,
        n_local: usize,
        source: Option<PathBuf>,
        preloaded: Option<Vec<f64>>,
        shared: Arc<SharedState>,
    ) -> io::Result<Self> {
        let data = match preloaded {
            Some(values) => ColMatrix::from_vec(dim, n_local, values),
            None => ColMatrix::zeroed(dim, 0),
        };
        let shard = Arc::new(Mutex::new(WorkerShard::new(dim, k, start_row, n_local, data)));
        let (tasks, task_rx) = mpsc::channel();

        let worker = Worker {
            id,
            dim,
            n_local,
            start_row,
            source,
            shard: Arc::clone(&shard),
            shared,
            tasks: task_rx,
        };
        let join = std::thread::Builder::new()
            .name(format!("kmeans-worker-{id}"))
            .spawn(move || worker.run())?;

        Ok(Self {
            tasks,
            shard,
            start_row,
            n_local,
            join: Some(join),
        })
    }

    /// Queue a task for this worker.
    pub fn wake(&self, task: WorkerTask) {
        self.tasks
            .send(task)
            .expect("worker thread terminated unexpectedly");
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.tasks.send(WorkerTask::Exit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Thread-side worker state.
struct Worker {
    id: usize,
    dim: usize,
    n_local: usize,
    start_row: usize,
    source: Option<PathBuf>,
    shard: Arc<Mutex<WorkerShard>>,
    shared: Arc<SharedState>,
    tasks: Receiver<WorkerTask>,
}

impl Worker {
    fn run(self) {
        while let Ok(task) = self.tasks.recv() {
            if matches!(task, WorkerTask::Exit) {
                break;
            }
            self.execute(task);
            self.shared.barrier.complete_one();
        }
    }

    fn execute(&self, task: WorkerTask) {
        let mut guard = self.shard.lock().unwrap();
        let shard = &mut *guard;
        match task {
            WorkerTask::Alloc => self.alloc(shard),
            WorkerTask::Em => {
                let centroids = self.shared.centroids.read().unwrap();
                em_pass(shard, &centroids);
            }
            WorkerTask::PrunedEm { prune_init } => {
                let centroids = self.shared.centroids.read().unwrap();
                let prune = self.shared.prune.read().unwrap();
                pruned_em_pass(shard, &centroids, &prune, &self.shared.recalculated, prune_init);
            }
            WorkerTask::WeightedDist { centroid } => {
                let centroids = self.shared.centroids.read().unwrap();
                weighted_dist_pass(shard, &centroids, centroid);
            }
            WorkerTask::Exit => unreachable!("handled in run()"),
        }
    }

    /// Load this worker's rows from the input file.
    ///
    /// I/O failure here is fatal by contract: the shard cannot be
    /// (re)loaded and no further pass can produce meaningful output.
    fn alloc(&self, shard: &mut WorkerShard) {
        let path = self
            .source
            .as_ref()
            .expect("alloc requested without an input file");
        let offset = (self.start_row * self.dim * ELEM_BYTES) as u64;
        match read_shard(path, offset, self.n_local * self.dim) {
            Ok(values) => {
                shard.data = ColMatrix::from_vec(self.dim, self.n_local, values);
            }
            Err(err) => {
                error!(worker = self.id, error = %err, "shard load failed");
                std::process::exit(1);
            }
        }
    }
}

fn read_shard(path: &Path, offset: u64, n_elems: usize) -> io::Result<Vec<f64>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);
    let mut bytes = vec![0u8; n_elems * ELEM_BYTES];
    reader.read_exact(&mut bytes)?;

    Ok(bytes
        .chunks_exact(ELEM_BYTES)
        .map(|chunk| {
            let arr: [u8; 8] = chunk.try_into().unwrap();
            f64::from_le_bytes(arr)
        })
        .collect())
}

/// One standard Lloyd pass: nearest centroid per sample, fresh sums and
/// counts. Ties break toward the lowest centroid index.
pub(crate) fn em_pass(shard: &mut WorkerShard, centroids: &ColMatrix) {
    let k = centroids.cols();
    shard.local_sums.zero();
    shard.counts.iter_mut().for_each(|c| *c = 0);
    shard.nchanged = 0;

    for i in 0..shard.data.cols() {
        let mut best = f64::INFINITY;
        let mut best_id = INVALID_ID;
        let sample = shard.data.col(i);
        for cl in 0..k {
            let dist = euclidean(sample, centroids.col(cl));
            if dist < best {
                best = dist;
                best_id = cl;
            }
        }
        assert_ne!(best_id, INVALID_ID);

        if shard.assignments[i] != best_id {
            shard.assignments[i] = best_id;
            shard.nchanged += 1;
        }
        add_sample(&mut shard.local_sums, best_id, &shard.data, i, &mut shard.counts);
    }

    assert_eq!(
        shard.counts.iter().sum::<u64>(),
        shard.data.cols() as u64,
        "assignment counts must cover the shard"
    );
}

/// One Elkan-pruned pass.
///
/// With `prune_init` every sample computes all k distances and seeds its
/// upper bound; afterwards bounds are inflated by centroid drift and most
/// candidate centroids are skipped via the half-distance tests. A sample's
/// assignment only changes when a candidate's exact distance beats the
/// (tightened) bound, in which case the sums and counts are adjusted
/// incrementally.
pub(crate) fn pruned_em_pass(
    shard: &mut WorkerShard,
    centroids: &ColMatrix,
    prune: &PruneShared,
    recalculated: &AtomicBoolVec,
    prune_init: bool,
) {
    let k = centroids.cols();
    shard.nchanged = 0;
    shard.local_sums.zero();
    if prune_init {
        shard.counts.iter_mut().for_each(|c| *c = 0);
    }

    for i in 0..shard.data.cols() {
        if prune_init {
            let mut best = f64::INFINITY;
            let mut best_id = INVALID_ID;
            let sample = shard.data.col(i);
            for cl in 0..k {
                let dist = euclidean(sample, centroids.col(cl));
                if dist < best {
                    best = dist;
                    best_id = cl;
                }
            }
            assert_ne!(best_id, INVALID_ID);

            shard.dist_upper[i] = best;
            shard.assignments[i] = best_id;
            shard.nchanged += 1;
            add_sample(&mut shard.local_sums, best_id, &shard.data, i, &mut shard.counts);
            continue;
        }

        let point = shard.start_row + i;
        let prev = shard.assignments[i];
        assert_ne!(prev, INVALID_ID);

        recalculated.set(point, false);
        shard.dist_upper[i] += prune.drift[prev];

        let mut assigned = prev;
        if shard.dist_upper[i] > prune.s_values[prev] {
            for cl in 0..k {
                if cl == assigned {
                    continue;
                }
                if shard.dist_upper[i] <= prune.ccdm.get(assigned, cl) {
                    continue;
                }
                if !recalculated.get(point) {
                    // tighten the bound to the exact current distance
                    shard.dist_upper[i] = euclidean(shard.data.col(i), centroids.col(assigned));
                    recalculated.set(point, true);
                    if shard.dist_upper[i] <= prune.ccdm.get(assigned, cl) {
                        continue;
                    }
                }
                let candidate = euclidean(shard.data.col(i), centroids.col(cl));
                if candidate < shard.dist_upper[i] {
                    shard.dist_upper[i] = candidate;
                    assigned = cl;
                }
            }
        }

        if assigned != prev {
            shard.assignments[i] = assigned;
            shard.nchanged += 1;
            remove_sample(&mut shard.local_sums, prev, &shard.data, i, &mut shard.counts);
            add_sample(&mut shard.local_sums, assigned, &shard.data, i, &mut shard.counts);
        }
    }

    assert_eq!(
        shard.counts.iter().sum::<u64>(),
        shard.data.cols() as u64,
        "assignment counts must cover the shard"
    );
}

/// k-means++ scan: fold one freshly chosen centroid into each sample's
/// nearest-seed distance and report the shard's cumulative mass.
pub(crate) fn weighted_dist_pass(shard: &mut WorkerShard, centroids: &ColMatrix, centroid: usize) {
    shard.cuml_dist = 0.0;
    for i in 0..shard.data.cols() {
        let dist = euclidean_squared(shard.data.col(i), centroids.col(centroid));
        if dist < shard.init_dist[i] {
            shard.init_dist[i] = dist;
            shard.assignments[i] = centroid;
        }
        shard.cuml_dist += shard.init_dist[i];
    }
}
