//! Error types produced while configuring and running an integration.
//!
//! Numeric context is stored as `f64` so the errors stay independent of the float type used by
//! the integration.

use thiserror::Error;

/// Boxed error returned by user step handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid setup detected before any step is taken.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The requested span is too close to the start time to be representable.
    #[error("integration span {span:e} is not larger than the threshold {threshold:e}")]
    IntervalTooSmall { span: f64, threshold: f64 },
    /// A vector did not have the length its owner expects.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Failure of a bracketing root solver.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RootSolverError {
    #[error("root is not bracketed: f({min:e}) = {f_min:e}, f({max:e}) = {f_max:e}")]
    NotBracketed {
        min: f64,
        max: f64,
        f_min: f64,
        f_max: f64,
    },
    #[error("root solver exceeded its budget of {max} evaluations")]
    TooManyEvaluations { max: usize },
}

/// Error terminating an integration.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("maximal count ({max}) of derivative evaluations exceeded")]
    MaxEvaluationsExceeded { max: usize },
    #[error("step size {step:e} is below the minimal allowed step size {min:e}")]
    StepSizeTooSmall { step: f64, min: f64 },
    #[error("event location failed: {0}")]
    EventLocation(#[from] RootSolverError),
    #[error("step handler failed: {0}")]
    Handler(#[source] HandlerError),
}
