//! Error types.
//!
//! - `FitError`: everything the fit engine can reject or fail with
//! - `PointError`: per-point evaluation problems (recorded, never propagated)
//! - `FunctionError`: failures raised by model functions
//! - `AppError`: what the `hfit` binary reports (message + exit code)

use thiserror::Error;

/// Taxonomy class of a [`FitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid names, bounds, weights, tags. The model is left unchanged.
    Configuration,
    /// Unsynced state or a busy minimizer. Rejected before any minimizer call.
    Synchronization,
    /// Fit not addressable (checked when a run starts).
    Validation,
    /// Fatal for the current run only.
    Runtime,
}

/// Fit engine error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    #[error("Invalid bound: lo={lo}, hi={hi} (must be finite with lo < hi)")]
    InvalidBound { lo: f64, hi: f64 },

    #[error("Value {value} for parameter {name} lies outside its bounds")]
    OutOfBounds { name: String, value: f64 },

    #[error("Invalid step size {0} (must be finite and > 0)")]
    InvalidStep(f64),

    #[error("Invalid parameter value {0}")]
    InvalidValue(f64),

    #[error("Negative dataset weight {0}")]
    NegativeWeight(f64),

    #[error("Unknown model function: {0}")]
    UnknownFunction(String),

    #[error("Unknown parameter mapping: {0}")]
    UnknownMapping(String),

    #[error("Unknown accumulation method: {0}")]
    UnknownMethod(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Method {method} cannot be used with dataset {dataset}: {reason}")]
    IncompatibleMethod {
        dataset: usize,
        method: &'static str,
        reason: &'static str,
    },

    #[error("Minimizer is busy")]
    MinimizerBusy,

    #[error("Parameters have not been pushed to the minimizer")]
    ParamsNotSynced,

    #[error("Options have not been pushed to the minimizer")]
    OptionsNotSynced,

    #[error("No fit is bound to the minimizer session")]
    NoCurrentFit,

    #[error("Fit has no enabled datasets")]
    NoDatasets,

    #[error("Dataset {dataset} needs a normalization region for extended max-likelihood")]
    NoNormalizationRegion { dataset: usize },

    #[error("Function terms need {needed} parameters but only {declared} are declared")]
    ParameterCountMismatch { needed: usize, declared: usize },

    #[error("Fit timed out after {seconds} s")]
    Timeout { seconds: u64 },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{count} data points could not be evaluated at the final parameters")]
    EvaluationErrors { count: usize },

    #[error("Density is zero over the whole tabulated range")]
    AllZeroDensity,

    #[error("Minimizer error: {0}")]
    Minimizer(String),
}

impl FitError {
    /// Taxonomy class of this error.
    pub fn class(&self) -> ErrorClass {
        use FitError::*;
        match self {
            InvalidName(_)
            | DuplicateName { .. }
            | UnknownName { .. }
            | InvalidBound { .. }
            | OutOfBounds { .. }
            | InvalidStep(_)
            | InvalidValue(_)
            | NegativeWeight(_)
            | UnknownFunction(_)
            | UnknownMapping(_)
            | UnknownMethod(_)
            | InvalidOption(_)
            | UnknownDataSource(_)
            | InvalidDataset(_) => ErrorClass::Configuration,
            MinimizerBusy | ParamsNotSynced | OptionsNotSynced | NoCurrentFit => {
                ErrorClass::Synchronization
            }
            NoDatasets
            | NoNormalizationRegion { .. }
            | ParameterCountMismatch { .. }
            | IncompatibleMethod { .. } => ErrorClass::Validation,
            Timeout { .. }
            | ResourceExhausted(_)
            | EvaluationErrors { .. }
            | AllZeroDensity
            | Minimizer(_) => ErrorClass::Runtime,
        }
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, FitError>;

/// Error raised by a model function at one coordinate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionError {
    #[error("Parameter {index} out of domain: {value}")]
    Domain { index: usize, value: f64 },

    #[error("Expected {expected} coordinates, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("Non-finite model value")]
    NonFinite,

    #[error("{0}")]
    Other(String),
}

/// Per-point evaluation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PointError {
    /// Weighted least squares with an error of exactly zero.
    ZeroPointError,
    /// Weighted least squares with a negative error.
    NegativePointError,
    /// Observed value below zero where counts are expected.
    NegativeObservation,
    /// Predicted density below zero.
    NegativeDensity,
    /// Predicted density of zero where data is observed.
    ZeroDensity,
    /// The model function itself failed.
    Function,
}

impl std::fmt::Display for PointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PointError::ZeroPointError => "zero point error",
            PointError::NegativePointError => "negative point error",
            PointError::NegativeObservation => "negative observation",
            PointError::NegativeDensity => "negative density",
            PointError::ZeroDensity => "zero density with non-zero observation",
            PointError::Function => "model function error",
        };
        f.write_str(text)
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let exit_code = match err.class() {
            ErrorClass::Configuration => 2,
            ErrorClass::Synchronization => 3,
            ErrorClass::Validation | ErrorClass::Runtime => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_map_to_exit_codes() {
        let app: AppError = FitError::NegativeWeight(-1.0).into();
        assert_eq!(app.exit_code(), 2);
        let app: AppError = FitError::MinimizerBusy.into();
        assert_eq!(app.exit_code(), 3);
        let app: AppError = FitError::Timeout { seconds: 1 }.into();
        assert_eq!(app.exit_code(), 4);
        assert!(app.to_string().contains("timed out"));
    }
}
