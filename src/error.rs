use thiserror::Error;

/// Errors surfaced by the SARIMA engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SarimaError {
    /// Too few observations for the requested differencing or order.
    #[error("insufficient data: got {n} observations, need at least {min}")]
    InsufficientData { n: usize, min: usize },

    /// Degenerate or out-of-range model order.
    #[error("invalid model order: {0}")]
    InvalidOrder(String),

    /// The optimizer exhausted its iteration budget without meeting tolerance.
    #[error("optimizer did not converge after {iterations} iterations (best cost {cost})")]
    NonConvergence { iterations: u64, cost: f64 },

    /// Non-finite likelihood or zero-variance data where an estimate is required.
    #[error("degenerate model: {0}")]
    DegenerateModel(String),

    /// Bad horizon, confidence level, ratio or malformed observations.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A backtest split left the train or test partition empty.
    #[error("insufficient split: {train} training and {test} test observations")]
    InsufficientSplit { train: usize, test: usize },

    #[error("parameter length mismatch: expected {expected}, got {got}")]
    ParamLengthMismatch { expected: usize, got: usize },

    /// The caller cancelled the fit or its deadline elapsed.
    #[error("fit cancelled: {0}")]
    Cancelled(String),

    /// Every candidate of an order search failed to fit.
    #[error("no candidate order could be fitted ({tried} tried)")]
    NoCandidateFitted { tried: usize },
}

pub type Result<T> = std::result::Result<T, SarimaError>;
