//! Error types for dpmix

use thiserror::Error;

/// dpmix error type
#[derive(Error, Debug)]
pub enum Error {
    /// The concentration parameter of a Dirichlet process must be positive.
    #[error("concentration parameter must be positive and finite, got {alpha}")]
    NonPositiveAlpha { alpha: f64 },

    /// Thinning interval of zero.
    #[error("iterations per sample must be at least 1")]
    ZeroIterationsPerSample,

    /// No observations to cluster.
    #[error("no observations were supplied")]
    EmptyData,

    /// An observation's dimension does not match the prior.
    #[error("observation has dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Prior hyperparameters are invalid.
    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    /// ARS seed points are out of order or outside the support.
    #[error(
        "seed points must satisfy {min_support} <= {x_left} < {x_mid} < {x_right} <= {max_support}"
    )]
    InvalidSeedPoints {
        min_support: f64,
        max_support: f64,
        x_left: f64,
        x_mid: f64,
        x_right: f64,
    },

    /// The log density returned a non-finite value at a seed point.
    #[error("log density is not finite at seed point x = {x}")]
    NonFiniteLogDensity { x: f64 },

    /// An envelope was built over too few support points.
    #[error("envelope needs at least {needed} points, got {found}")]
    TooFewPoints { needed: usize, found: usize },

    /// The upper envelope cannot be normalized.
    #[error("upper envelope has unbounded mass; the log density must decay toward infinite support bounds")]
    UnboundedEnvelope,

    /// ARS did not accept a candidate in time.
    #[error("adaptive rejection sampling failed to accept a candidate within {attempts} attempts")]
    RejectionLimit { attempts: usize },

    /// A distribution could not be constructed.
    #[error("distribution error: {0}")]
    Distribution(String),

    /// A worker task returned an error; the sweep was aborted.
    #[error("worker task failed: {0}")]
    Worker(#[source] Box<Error>),

    /// A worker task panicked; the sweep was aborted.
    #[error("worker task panicked: {0}")]
    WorkerPanic(String),

    /// Building the worker pool failed.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// `mcmc_update` was called before `initialize`.
    #[error("sampler has not been initialized")]
    Uninitialized,
}

impl Error {
    pub(crate) fn distribution<E: std::fmt::Debug>(err: E) -> Self {
        Self::Distribution(format!("{err:?}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
