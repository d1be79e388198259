//! Shared value types of the fit model.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::data::Axis;
use crate::error::{FitError, PointError, Result};

/// Smallest precision the minimizer may be asked for.
pub const PRECISION_FLOOR: f64 = 4.0 * f64::EPSILON;

/// Fold a user-supplied name into its comparison key.
///
/// Whitespace is dropped and letters are lower-cased, so `" Sig Mean"` and
/// `"sigmean"` name the same thing.
pub fn fold_name(name: &str) -> Result<String> {
    let key: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    if key.is_empty() {
        return Err(FitError::InvalidName(name.to_string()));
    }
    Ok(key)
}

/// Options pushed to (or consumed alongside) the minimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerOptions {
    /// Objective change that defines one standard deviation (1 for χ², 1 for -2 ln L).
    pub error_def: f64,
    pub verbosity: u8,
    /// 0 (fast) to 2 (careful).
    pub strategy: u8,
    /// Relative machine precision assumed for the objective.
    pub precision: f64,
    pub use_gradient: bool,
    /// Wall-clock limit per run in seconds; 0 disables.
    pub timeout_secs: u64,
    pub max_calls: Option<usize>,
    /// Charge evaluation problems as penalties instead of reporting them.
    pub ignore_function_errors: bool,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            error_def: 1.0,
            verbosity: 0,
            strategy: 1,
            precision: PRECISION_FLOOR,
            use_gradient: false,
            timeout_secs: 0,
            max_calls: None,
            ignore_function_errors: false,
        }
    }
}

impl MinimizerOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.error_def.is_finite() && self.error_def > 0.0) {
            return Err(FitError::InvalidOption(format!(
                "error_def must be > 0, got {}",
                self.error_def
            )));
        }
        if self.strategy > 2 {
            return Err(FitError::InvalidOption(format!(
                "strategy must be 0, 1 or 2, got {}",
                self.strategy
            )));
        }
        if !(self.precision.is_finite() && self.precision >= PRECISION_FLOOR && self.precision < 1.0) {
            return Err(FitError::InvalidOption(format!(
                "precision must lie in [{PRECISION_FLOOR:e}, 1), got {}",
                self.precision
            )));
        }
        if self.max_calls == Some(0) {
            return Err(FitError::InvalidOption("max_calls must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Whether switching from `self` to `other` changes what the minimizer sees.
    pub fn minimizer_visible_change(&self, other: &MinimizerOptions) -> bool {
        self.error_def != other.error_def
            || self.verbosity != other.verbosity
            || self.strategy != other.strategy
            || self.precision != other.precision
            || self.use_gradient != other.use_gradient
            || self.max_calls != other.max_calls
    }
}

/// Synchronization state between the fit model and the minimizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncFlags {
    pub params_synced: bool,
    pub options_synced: bool,
    /// Results are current and safe to read.
    pub complete: bool,
}

/// Notifications delivered to fit observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitEvent {
    /// A run finished and the results are current.
    Completed,
    /// Results that were current are no longer.
    LostSync,
    /// The fit was destroyed.
    Destroyed,
}

/// One observation of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    /// Coordinates; entries beyond the dataset dimension are 0.
    pub coords: [f64; 3],
    pub obs: f64,
    pub err: f64,
    /// Excluded by the dataset filter.
    pub filtered: bool,
    /// Evaluation problem at the last objective evaluation.
    #[serde(skip)]
    pub error: Option<PointError>,
    /// Model value at the last objective evaluation.
    pub fit: f64,
}

impl DataPoint {
    pub fn new(coords: &[f64], obs: f64, err: f64) -> Self {
        let mut c = [0.0; 3];
        for (dst, src) in c.iter_mut().zip(coords) {
            *dst = *src;
        }
        Self {
            coords: c,
            obs,
            err,
            filtered: false,
            error: None,
            fit: 0.0,
        }
    }

    /// Participates in sums: not filtered and not errored.
    pub fn is_usable(&self) -> bool {
        !self.filtered && self.error.is_none()
    }
}

type Predicate = dyn Fn(&[f64]) -> bool + Send + Sync;

/// Coordinate filter deciding which points take part in a fit.
#[derive(Clone)]
pub enum Filter {
    /// Half-open `[lo, hi)` window per axis.
    Ranges(Vec<(f64, f64)>),
    Predicate(Arc<Predicate>),
}

impl Filter {
    pub fn predicate(f: impl Fn(&[f64]) -> bool + Send + Sync + 'static) -> Self {
        Filter::Predicate(Arc::new(f))
    }

    pub fn accepts(&self, x: &[f64]) -> bool {
        match self {
            Filter::Ranges(ranges) => ranges
                .iter()
                .zip(x)
                .all(|(&(lo, hi), &v)| v >= lo && v < hi),
            Filter::Predicate(f) => f(x),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Ranges(r) => f.debug_tuple("Ranges").field(r).finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Region and binning of the normalization grid for unbinned extended fits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormRegion {
    pub axes: Vec<Axis>,
}

impl NormRegion {
    pub fn new(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    /// A region with no binned cells cannot normalize anything.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty() || self.axes.iter().any(|a| a.nbins == 0)
    }

    pub fn validate(&self, dims: usize) -> Result<()> {
        if self.axes.is_empty() {
            return Ok(());
        }
        if self.axes.len() != dims {
            return Err(FitError::InvalidDataset(format!(
                "normalization region has {} axes, dataset has {dims}",
                self.axes.len()
            )));
        }
        for a in &self.axes {
            if !(a.lo.is_finite() && a.hi.is_finite() && a.hi > a.lo) {
                return Err(FitError::InvalidBound { lo: a.lo, hi: a.hi });
            }
        }
        Ok(())
    }
}

/// How a dataset reads its data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatasetLayout {
    /// Bins of a histogram.
    Histogram,
    /// Table rows with a measured value (and optional error) at coordinates.
    Points {
        coords: Vec<String>,
        value: String,
        #[serde(default)]
        error: Option<String>,
    },
    /// Table rows as individual events (unbinned).
    Events { coords: Vec<String> },
}

impl DatasetLayout {
    pub fn is_binned(&self) -> bool {
        !matches!(self, DatasetLayout::Events { .. })
    }
}

/// Everything needed to add a dataset to a fit.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub source: String,
    pub layout: DatasetLayout,
    pub weight: f64,
    pub method: Option<crate::fit::AccumulationMethod>,
    pub filter: Option<Filter>,
    pub normalization: NormRegion,
}

impl DatasetSpec {
    pub fn histogram(source: impl Into<String>) -> Self {
        Self::new(source, DatasetLayout::Histogram)
    }

    pub fn events(source: impl Into<String>, coords: &[&str]) -> Self {
        Self::new(
            source,
            DatasetLayout::Events {
                coords: coords.iter().map(|c| c.to_string()).collect(),
            },
        )
    }

    pub fn new(source: impl Into<String>, layout: DatasetLayout) -> Self {
        Self {
            source: source.into(),
            layout,
            weight: 1.0,
            method: None,
            filter: None,
            normalization: NormRegion::default(),
        }
    }
}

/// Covariance of the free parameters as reported by the minimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    /// Parameter indices covered, in the minimizer's internal order.
    pub indices: Vec<usize>,
    pub matrix: DMatrix<f64>,
}

impl Covariance {
    /// Covariance between parameters `i` and `j` (declaration indices).
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        let a = self.indices.iter().position(|&k| k == i)?;
        let b = self.indices.iter().position(|&k| k == j)?;
        Some(self.matrix[(a, b)])
    }
}

/// Outcome of the last run, as seen by callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitStatus {
    pub fmin: f64,
    pub edm: f64,
    pub error_def: f64,
    pub n_free: usize,
    pub n_declared: usize,
    /// 0 (none) .. 3 (accurate).
    pub cov_quality: u8,
    pub n_calls: usize,
    pub elapsed: Duration,
    /// Fatal or pending error of the last run.
    pub error: Option<FitError>,
    /// Evaluation problems reported during the last run.
    pub point_errors: usize,
}
