#![allow(clippy::multiple_crate_versions)]

//! # `dsne`: t-SNE across a shared/local data boundary
//!
//! This crate provides a Rust implementation of t-distributed Stochastic
//! Neighbor Embedding (t-SNE) that can be split between a shared dataset,
//! visible to every participant, and local datasets that never leave their
//! owner. Participants only exchange low-dimensional coordinates.
//!
//! The computation runs in two phases:
//! - The **remote** phase embeds the shared points on their own. Every point
//!   moves and the embedding is kept centered.
//! - The **local** phase embeds shared and local points together, starting
//!   from the shared embedding. Shared points act as frozen anchors and only
//!   the local points move and get centered.
//!
//! The implementation provides:
//! - Column normalization and PCA preprocessing
//! - Per-point perplexity calibration by bisection over the Gaussian
//!   precision
//! - Gradient descent with momentum, adaptive per-coordinate gains, and early
//!   exaggeration
//! - Optional snapshot capture of intermediate states
//! - An in-memory driver for the remote and local phases
//!
//! ## Examples
//!
//! Embedding a single dataset:
//! ```rust,no_run
//! use dsne::{embed, normalize, random_embedding, ComputationPhase, Configuration};
//! use ndarray::Array2;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let data: Array2<f64> = // ... load your high-dimensional data
//! # Array2::zeros((100, 50));
//! let config = Configuration::default();
//! let mut rng = SmallRng::seed_from_u64(42);
//!
//! let x = normalize(data.view()).unwrap();
//! let y0 = random_embedding(x.nrows(), config.embedding_dimensions, &mut rng).unwrap();
//! let (embedding, _) = embed(
//!     x.view(),
//!     y0.view(),
//!     x.nrows(),
//!     ComputationPhase::Remote,
//!     &config,
//! )
//! .unwrap();
//! ```
//!
//! Splitting the work between the shared and a local site:
//! ```rust,no_run
//! use dsne::{local_site, remote_site, Configuration};
//! use ndarray::Array2;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! # let shared_x: Array2<f64> = Array2::zeros((100, 50));
//! # let local_x: Array2<f64> = Array2::zeros((40, 50));
//! let config = Configuration::builder().perplexity(20.0).build();
//! let mut rng = SmallRng::seed_from_u64(7);
//!
//! let shared_y = remote_site(shared_x.view(), &config, &mut rng).unwrap();
//! let local_y = local_site(
//!     shared_x.view(),
//!     shared_y.view(),
//!     local_x.view(),
//!     &config,
//!     &mut rng,
//! )
//! .unwrap();
//! ```
//!
//! ## Configuration
//!
//! Core parameters:
//! - `embedding_dimensions`: Output dimensionality (default: 2)
//! - `initial_dims`: Dimensionality after PCA preprocessing (default: 50)
//! - `perplexity`: Effective number of neighbors (default: 30.0)
//! - `max_iter`: Number of gradient descent iterations (default: 1000)
//! - `snapshots`: Optional iteration numbers at which to save embedding states
//!
//! Optimizer parameters:
//! - `learning_rate` (500.0), `initial_momentum` (0.5), `final_momentum`
//!   (0.8), `momentum_switch_iter` (20)
//! - `early_exaggeration` (7.0), `exaggeration_divisor` (4.0),
//!   `stop_lying_iter` (100)
//! - `min_gain` (0.01), `tolerance` (1e-5), `max_search_tries` (50)
//!
//! ## Implementation Notes
//!
//! - The switch points for momentum and exaggeration are absolute iteration
//!   numbers and do not scale with `max_iter`
//! - The exaggeration divisor differs from the exaggeration factor, so `P`
//!   keeps a residual scale of 1.75 after iteration 100 with the defaults
//! - Randomness is always passed in explicitly, so runs are reproducible
//! - Employs parallel iterators via rayon for the per-point searches and the
//!   gradient rows
//!
//! ## References
//!
//! [Visualizing Data using t-SNE](https://jmlr.org/papers/v9/vandermaaten08a.html).
//! van der Maaten, L., & Hinton, G. (2008).
//! Journal of Machine Learning Research, 9(86), 2579-2605.

// Submodule imports
mod affinity;
mod distance;
mod gains;
mod gradient;
mod normalize;
mod pca;
mod phase;
mod schedule;
mod update;


use bon::Builder;
use ndarray::{s, Array2, Array3, ArrayView2, ShapeError};
use ndarray_rand::rand_distr::NormalError;
use petal_decomposition::DecompositionError;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

pub use crate::affinity::{calibrate_affinities, hbeta, joint_probabilities, PROBABILITY_FLOOR};
pub use crate::normalize::normalize;
pub use crate::pca::reduce_dimensions;
pub use crate::phase::{local_site, random_embedding, remote_site, seed_shared_embedding};
pub use crate::update::UpdateRule;

use crate::affinity::{all_finite, calibrate_with_tries};
use crate::gains::{update_velocity, StepParams};
use crate::gradient::{kl_divergence, low_dim_affinities, tsne_grad};
use crate::schedule::find_schedule;

/// Configuration options for the t-SNE embedding process.
///
/// Controls preprocessing, perplexity calibration, the optimizer constants,
/// and snapshot capture.
#[derive(Builder, Clone, Debug)]
pub struct Configuration {
    /// Number of dimensions in the output embedding space, typically 2 or 3
    #[builder(default = 2)]
    pub embedding_dimensions: usize,

    /// Number of principal components kept before calibration
    #[builder(default = 50)]
    pub initial_dims: usize,

    /// Effective number of neighbors of each point
    #[builder(default = 30.0)]
    pub perplexity: f64,

    /// Accepted entropy deviation in the perplexity search
    #[builder(default = 1e-5)]
    pub tolerance: f64,

    /// Maximum precision adjustments per point in the perplexity search
    #[builder(default = 50)]
    pub max_search_tries: usize,

    /// Number of gradient descent iterations
    #[builder(default = 1000)]
    pub max_iter: usize,

    /// Step size applied to the gain-scaled gradient
    #[builder(default = 500.0)]
    pub learning_rate: f64,

    /// Momentum used before `momentum_switch_iter`
    #[builder(default = 0.5)]
    pub initial_momentum: f64,

    /// Momentum used from `momentum_switch_iter` on
    #[builder(default = 0.8)]
    pub final_momentum: f64,

    /// Iteration at which momentum switches to its final value
    #[builder(default = 20)]
    pub momentum_switch_iter: usize,

    /// Factor applied to `P` at the start of optimization
    #[builder(default = 7.0)]
    pub early_exaggeration: f64,

    /// Divisor applied to `P` once at `stop_lying_iter`
    #[builder(default = 4.0)]
    pub exaggeration_divisor: f64,

    /// Iteration after which the exaggeration is removed
    #[builder(default = 100)]
    pub stop_lying_iter: usize,

    /// Lower bound on the adaptive gains
    #[builder(default = 0.01)]
    pub min_gain: f64,

    /// Optional iteration numbers at which to save embedding states, where
    /// `0` is the initial embedding
    pub snapshots: Option<Vec<usize>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            embedding_dimensions: 2,
            initial_dims: 50,
            perplexity: 30.0,
            tolerance: 1e-5,
            max_search_tries: 50,
            max_iter: 1000,
            learning_rate: 500.0,
            initial_momentum: 0.5,
            final_momentum: 0.8,
            momentum_switch_iter: 20,
            early_exaggeration: 7.0,
            exaggeration_divisor: 4.0,
            stop_lying_iter: 100,
            min_gain: 0.01,
            snapshots: None,
        }
    }
}

impl Configuration {
    /// Checks the optimizer constants before any work starts.
    ///
    /// # Errors
    /// * `DsneError::InvalidParameter` - the first constant out of its range
    fn validate_optimizer(&self) -> Result<(), DsneError> {
        let positive = [
            ("learning_rate", self.learning_rate),
            ("early_exaggeration", self.early_exaggeration),
            ("exaggeration_divisor", self.exaggeration_divisor),
            ("min_gain", self.min_gain),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(DsneError::InvalidParameter { name, value });
            }
        }

        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(DsneError::InvalidParameter {
                name: "tolerance",
                value: self.tolerance,
            });
        }

        let momenta = [
            ("initial_momentum", self.initial_momentum),
            ("final_momentum", self.final_momentum),
        ];
        for (name, value) in momenta {
            if !(0.0..1.0).contains(&value) {
                return Err(DsneError::InvalidParameter { name, value });
            }
        }

        Ok(())
    }
}

/// Which side of the shared/local boundary is computing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputationPhase {
    /// Shared data only: every point moves, the whole embedding is centered
    Remote,

    /// Shared and local data: shared points are frozen, local points move
    /// and are centered on their own
    Local,
}

/// Reduces dimensionality of input data using t-SNE.
///
/// # Arguments
/// * `x` - Input data matrix where each row is a sample, usually normalized
///   with [`normalize`]
/// * `y0` - Initial embedding, one row per sample
/// * `shared_length` - Number of leading rows that belong to the shared
///   dataset; only used in the local phase
/// * `phase` - Selects the positional update rule
/// * `config` - Configuration options controlling the embedding process
///
/// # Returns
/// A tuple containing:
/// * Final embedding coordinates as a matrix
/// * Optional array of intermediate embedding states if snapshots were
///   requested
///
/// # Errors
/// * `DsneError::SampleSize` - Input has <= 1 samples
/// * `DsneError::InvalidEmbeddingDimensions` - Zero output dimensions
/// * `DsneError::InitialEmbeddingShape` - `y0` does not match the input
/// * `DsneError::SharedLength` - `shared_length` exceeds the sample count
/// * `DsneError::InvalidPerplexity` - Perplexity is not positive and finite
/// * `DsneError::InvalidParameter` - An optimizer constant is out of range:
///   non-positive learning rate, exaggeration, divisor or minimum gain,
///   negative tolerance, momentum outside `[0, 1)`
/// * `DsneError::PcaDimensions` - `initial_dims` exceeds the feature count
/// * `DsneError::DegenerateAffinity` - A point's affinities cannot be formed
/// * `DsneError::NumericInstability` - NaN or infinity appears in `P` or in
///   the gradient
/// * `DsneError::Pca` - PCA decomposition fails
pub fn embed(
    x: ArrayView2<f64>,
    y0: ArrayView2<f64>,
    shared_length: usize,
    phase: ComputationPhase,
    config: &Configuration,
) -> Result<(Array2<f64>, Option<Array3<f64>>), DsneError> {
    // Input validation
    let n = x.nrows();
    if n <= 1 {
        return Err(DsneError::SampleSize);
    }

    let n_dims = config.embedding_dimensions;
    if n_dims == 0 {
        return Err(DsneError::InvalidEmbeddingDimensions);
    }

    let expected_shape = [n, n_dims];
    if y0.shape() != expected_shape {
        return Err(DsneError::InitialEmbeddingShape {
            expected: expected_shape,
            actual: y0.shape().to_vec(),
        });
    }

    if phase == ComputationPhase::Local && shared_length > n {
        return Err(DsneError::SharedLength {
            shared_length,
            samples: n,
        });
    }

    if !(config.perplexity > 0.0 && config.perplexity.is_finite()) {
        return Err(DsneError::InvalidPerplexity(config.perplexity));
    }
    config.validate_optimizer()?;

    #[allow(clippy::cast_precision_loss)]
    let n_neighbors = (n - 1) as f64;
    if config.perplexity >= n_neighbors {
        warn!("Perplexity is not smaller than the number of neighbors, the search will saturate.");
    }

    // Preprocess input data
    debug!("Preprocessing the data using PCA");
    let x = reduce_dimensions(x, config.initial_dims)?;

    // Target affinities
    let conditional = calibrate_with_tries(
        x.view(),
        config.tolerance,
        config.perplexity,
        config.max_search_tries,
    )?;
    let mut p = joint_probabilities(conditional.view(), config.early_exaggeration);
    if !all_finite(p.view()) {
        return Err(DsneError::NumericInstability {
            stage: Stage::Affinities,
            iteration: 0,
        });
    }

    tsne(
        &mut p,
        y0.to_owned(),
        UpdateRule::for_phase(phase, shared_length),
        config,
    )
}

/// Core t-SNE optimization loop.
///
/// Iteratively moves the embedding coordinates through gradient descent on
/// the KL divergence between `p` and the Student-t affinities of the
/// embedding.
///
/// # Arguments
/// * `p` - Exaggerated joint affinities, divided in place when the
///   exaggeration is removed
/// * `y` - Initial embedding coordinates
/// * `rule` - Positional update rule
/// * `config` - Optimizer settings
///
/// # Errors
/// * `DsneError::NumericInstability` if the gradient stops being finite
fn tsne(
    p: &mut Array2<f64>,
    mut y: Array2<f64>,
    rule: UpdateRule,
    config: &Configuration,
) -> Result<(Array2<f64>, Option<Array3<f64>>), DsneError> {
    let start_time = Instant::now();
    let (n, n_dims) = y.dim();
    let mut inter_snapshots = Snapshots::from(n_dims, n, config.snapshots.as_deref());

    // Initialize optimizer state
    let mut velocity = Array2::zeros(y.dim());
    let mut gains = Array2::ones(y.dim());

    // Store initial state if snapshots requested
    if let Some(ref mut snapshots) = inter_snapshots {
        snapshots.capture(0, &y);
    }

    debug!("Optimizing {n} points with {:?}", rule);

    // Main optimization loop
    for itr in 0..config.max_iter {
        let schedule = find_schedule(config, itr);
        let affinities = low_dim_affinities(y.view());
        let grad = tsne_grad(y.view(), p.view(), &affinities);

        if !all_finite(grad.view()) {
            return Err(DsneError::NumericInstability {
                stage: Stage::Gradient,
                iteration: itr,
            });
        }

        if itr == 0 {
            debug!("Initial error: {}", kl_divergence(p.view(), affinities.q.view()));
        }

        update_velocity(
            grad.view(),
            velocity.view_mut(),
            gains.view_mut(),
            StepParams {
                momentum: schedule.momentum,
                learning_rate: config.learning_rate,
                min_gain: config.min_gain,
            },
        );
        rule.apply(y.view_mut(), velocity.view());

        if schedule.report_cost {
            let c = kl_divergence(p.view(), affinities.q.view());
            debug!("Iteration: {:4}, error: {}", itr + 1, c);
        }

        // Stop lying about P-values
        if schedule.stop_lying {
            *p /= config.exaggeration_divisor;
        }

        // Store intermediate state if requested
        if let Some(ref mut snapshots) = inter_snapshots {
            snapshots.capture(itr + 1, &y);
        }
    }

    let elapsed = start_time.elapsed();
    debug!("Elapsed time: {:.2?}", elapsed);

    Ok((y, inter_snapshots.map(|s| s.states)))
}

/// Manages intermediate embedding states during optimization.
struct Snapshots<'a> {
    /// Stored embedding states
    states: Array3<f64>,

    /// Iteration numbers at which to take snapshots
    indices: &'a [usize],
}

impl<'a> Snapshots<'a> {
    /// Creates new snapshot manager if indices are provided.
    ///
    /// # Arguments
    /// * `n_dims` - Dimensionality of embedding
    /// * `n` - Number of samples
    /// * `maybe_snapshots` - Optional snapshot indices
    fn from(n_dims: usize, n: usize, maybe_snapshots: Option<&'a [usize]>) -> Option<Self> {
        let snapshots = maybe_snapshots?;
        Some(Self {
            states: Array3::zeros((snapshots.len(), n, n_dims)),
            indices: snapshots,
        })
    }

    /// Saves `y` into every slot requested for iteration `itr`.
    fn capture(&mut self, itr: usize, y: &Array2<f64>) {
        for (index, &i) in self.indices.iter().enumerate() {
            if i == itr {
                self.states.slice_mut(s![index, .., ..]).assign(y);
            }
        }
    }
}

/// Stage of the computation at which a non-finite value appeared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Joint high-dimensional affinities
    Affinities,

    /// Gradient of the embedding
    Gradient,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Affinities => f.write_str("affinities"),
            Stage::Gradient => f.write_str("gradient"),
        }
    }
}

/// Errors that can occur during t-SNE embedding.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DsneError {
    /// Input data has 1 or fewer samples
    #[error("Sample size must be larger than one")]
    SampleSize,

    /// An optimizer constant is outside its valid range
    #[error("Invalid value {value} for {name}")]
    InvalidParameter {
        /// Configuration field name
        name: &'static str,
        /// Rejected value
        value: f64,
    },

    /// Requested output dimensionality is zero
    #[error("The number of embedding dimensions must be at least one")]
    InvalidEmbeddingDimensions,

    /// Perplexity is not a positive finite number
    #[error("Perplexity must be positive and finite, got {0}")]
    InvalidPerplexity(f64),

    /// Provided initial embedding has incorrect dimensions
    #[error("Invalid shape for the initial embedding. Expected {expected:?}, got {actual:?}")]
    InitialEmbeddingShape {
        /// Expected shape: [`n_samples`, `embedding_dimensions`]
        expected: [usize; 2],
        /// Actual shape of provided matrix
        actual: Vec<usize>,
    },

    /// Shared block is larger than the data
    #[error("Shared length {shared_length} exceeds the {samples} samples")]
    SharedLength {
        /// Requested number of shared rows
        shared_length: usize,
        /// Number of rows in the data
        samples: usize,
    },

    /// Shared features and shared embedding disagree on the number of points
    #[error("Shared data has {features} rows but the shared embedding has {embedding}")]
    SharedRowMismatch {
        /// Rows of the shared feature matrix
        features: usize,
        /// Rows of the shared embedding
        embedding: usize,
    },

    /// Shared and local data have a different number of features
    #[error("Shared data has {shared} features but local data has {local}")]
    FeatureMismatch {
        /// Columns of the shared feature matrix
        shared: usize,
        /// Columns of the local feature matrix
        local: usize,
    },

    /// Mean calculation failed due to empty array
    #[error("Failed to calculate mean axis: the array is empty")]
    EmptyArrayMean,

    /// Min/max computation failed due to empty array
    #[error("Failed to compute min or max of X: the array is empty")]
    EmptyArrayMinMax,

    /// Data cannot be normalized due to zero range
    #[error("The range of X is zero (max - min = 0), cannot normalize")]
    ZeroRange,

    /// Kernel weights of a point vanished during calibration
    #[error("Affinities of point {point} cannot be normalized: kernel weights sum to zero")]
    DegenerateAffinity {
        /// Index of the offending point
        point: usize,
    },

    /// PCA target dimensionality is not available
    #[error("Cannot reduce {available} features to {requested} dimensions")]
    PcaDimensions {
        /// Requested number of components
        requested: usize,
        /// Number of features in the data
        available: usize,
    },

    /// A NaN or infinite value appeared during optimization
    #[error("Non-finite values in the {stage} at iteration {iteration}")]
    NumericInstability {
        /// Where the value was detected
        stage: Stage,
        /// Iteration at which it was detected
        iteration: usize,
    },

    /// Normal distribution creation failed
    #[error(transparent)]
    Normal(#[from] NormalError),

    /// Matrices could not be stacked
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// PCA decomposition failed
    #[error(transparent)]
    Pca(#[from] DecompositionError),
}
