//! parkmeans: a parallel k-means clustering engine in Rust.
//!
//! This crate clusters large, dense `f64` matrices that live in memory or
//! on disk. The input is partitioned into contiguous shards, one per worker
//! thread; workers run Lloyd-style assignment passes over their shard and
//! the driver reduces their partial sums into new centroids each iteration,
//! optionally across distributed ranks through a pluggable collective
//! interface.
//!
//! # Features
//!
//! - **Sharded execution**: each worker exclusively owns its block of rows
//!   and its accumulators; the driver only reads them behind a barrier
//! - **Triangle-inequality pruning**: Elkan-style bounds skip most
//!   point-to-centroid distances in later iterations
//! - **Reproducible initialization**: `random`, Forgy, and k-means++
//!   seeding driven by a strided parallel RNG, so a fixed seed and
//!   partitioning give bit-identical results
//! - **Disk-resident input**: workers seek and load their own shard of a
//!   raw headerless `f64` matrix file
//! - **Collective seam**: reductions and broadcasts go through a trait, so
//!   a message-passing substrate can slot in without touching the core
//!
//! # Quick Start
//!
//! ```
//! use parkmeans::{InitMethod, KMeans, KMeansConfig};
//!
//! // two obvious clusters in the plane
//! let data = vec![0.0, 0.0, 0.0, 1.0, 10.0, 10.0, 10.0, 11.0];
//!
//! let config = KMeansConfig {
//!     k: 2,
//!     max_iters: 20,
//!     init: InitMethod::PlusPlus,
//!     seed: 1234,
//!     ..KMeansConfig::default()
//! };
//! let engine = KMeans::new(config).unwrap();
//! let result = engine.fit(&data, 4, 2).unwrap();
//!
//! assert_eq!(result.assignment_count.iter().sum::<u64>(), 4);
//! println!("centroids: {:?}", result.centroids);
//! println!("assignments: {:?}", result.assignments);
//! ```
//!
//! # Modules
//!
//! - [`config`]: run configuration and initialization methods
//! - [`driver`]: the iteration controller and public entry points
//! - [`collective`]: the rank-wide messaging seam
//! - [`ccdm`]: pairwise centroid distances backing the pruning tests
//! - [`rng`]: the reproducible parallel random number generator

pub mod bitvec;
pub mod ccdm;
pub mod collective;
pub mod config;
pub mod constants;
pub mod distance;
pub mod driver;
pub mod error;
pub mod kernel;
pub mod matrix;
pub mod rng;
mod worker;

// Re-export commonly used types at crate root
pub use bitvec::AtomicBoolVec;
pub use ccdm::CentroidDistMatrix;
pub use collective::{Collective, ProcessLocal};
pub use config::{InitMethod, KMeansConfig};
pub use constants::INVALID_ID;
pub use driver::{KMeans, KMeansOutput};
pub use error::{ParKMeansError, Result};
pub use matrix::ColMatrix;
pub use rng::StridedRng;
