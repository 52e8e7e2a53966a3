//! Run configuration for the clustering engine.

use crate::constants::defaults;
use crate::error::{ParKMeansError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Centroid initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMethod {
    /// Assign every point a uniform-random cluster id and seed centroids
    /// with the resulting partition means.
    Random,
    /// Sample k distinct data points as initial centroids (Forgy).
    Forgy,
    /// k-means++ weighted seeding.
    PlusPlus,
    /// Reserved; rejected at run time.
    Barbar,
    /// Reserved; rejected at run time.
    Sketch,
    /// Use caller-provided centroids unchanged.
    None,
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitMethod::Random => "random",
            InitMethod::Forgy => "forgy",
            InitMethod::PlusPlus => "plusplus",
            InitMethod::Barbar => "barbar",
            InitMethod::Sketch => "sketch",
            InitMethod::None => "none",
        };
        write!(f, "{name}")
    }
}

impl FromStr for InitMethod {
    type Err = ParKMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "forgy" => Ok(Self::Forgy),
            "plusplus" | "kmeans++" | "k-means++" => Ok(Self::PlusPlus),
            "barbar" => Ok(Self::Barbar),
            "sketch" => Ok(Self::Sketch),
            "none" => Ok(Self::None),
            other => Err(ParKMeansError::UnknownInit(other.to_string())),
        }
    }
}

/// Configurable knobs for one clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Number of clusters to search for.
    pub k: usize,
    /// Hard iteration cap; zero runs initialization only.
    pub max_iters: usize,
    /// Convergence tolerance: the run stops once the fraction of points
    /// that changed cluster drops to this value or below.
    pub tol: f64,
    /// Centroid initialization strategy.
    pub init: InitMethod,
    /// Seed for every random draw in the run.
    pub seed: u64,
    /// Use triangle-inequality pruning for the assignment step.
    pub prune: bool,
    /// Number of worker threads; zero means one per available core.
    pub n_workers: usize,
    /// Initial centroids in row-major layout (`k * dim`), required by
    /// [`InitMethod::None`] and ignored by every other method.
    pub initial_centroids: Option<Vec<f64>>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_iters: defaults::MAX_ITERS,
            tol: defaults::TOLERANCE,
            init: InitMethod::PlusPlus,
            seed: defaults::SEED,
            prune: false,
            n_workers: 0,
            initial_centroids: None,
        }
    }
}

impl KMeansConfig {
    /// Validate the shape-independent fields.
    ///
    /// Shape-dependent checks (`k` vs. sample count, centroid buffer
    /// length) happen when a fit is launched.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ParKMeansError::invalid_parameter(
                "k must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.tol) {
            return Err(ParKMeansError::invalid_parameter(format!(
                "tolerance must lie in [0, 1], got {}",
                self.tol
            )));
        }
        match self.init {
            InitMethod::Barbar | InitMethod::Sketch => Err(ParKMeansError::not_supported(
                format!("initialization method '{}'", self.init),
            )),
            InitMethod::None if self.initial_centroids.is_none() => Err(
                ParKMeansError::invalid_parameter(
                    "init 'none' requires initial_centroids",
                ),
            ),
            _ => Ok(()),
        }
    }
}
