//! The minimizer contract.
//!
//! The minimizer is a stateful call/response service: parameters and options
//! are pushed into it, then `run` blocks and calls back into a [`FitCallback`]
//! once per objective evaluation. After the loop it calls back one last time
//! in [`CallMode::Finalize`] with a read-only view of its results.

pub mod simplex;

pub use simplex::*;

use nalgebra::DMatrix;

use crate::error::Result;

/// A parameter as declared to the minimizer. `step == 0` declares it fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDecl {
    pub index: usize,
    pub name: String,
    pub value: f64,
    pub step: f64,
    pub bounds: Option<(f64, f64)>,
}

/// Options the minimizer understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MinimizerOption {
    ErrorDef(f64),
    Verbosity(u8),
    Strategy(u8),
    Precision(f64),
    UseGradient(bool),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinimizerStatus {
    pub fmin: f64,
    /// Estimated distance to the minimum.
    pub edm: f64,
    pub error_def: f64,
    pub n_free: usize,
    pub n_declared: usize,
    /// 0 (none), 1 (diagonal approximation), 2 (forced positive-definite), 3 (accurate).
    pub cov_quality: u8,
    pub n_calls: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub value: f64,
    pub error: f64,
    pub bounds: Option<(f64, f64)>,
    /// 1-based position among free parameters; `None` if treated as fixed.
    pub internal_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AsymmetricErrors {
    pub plus: f64,
    pub minus: f64,
    pub parabolic: f64,
    pub global_cc: f64,
}

/// Read access to a minimizer's results.
pub trait MinimizerQuery {
    fn current_status(&self) -> MinimizerStatus;

    fn parameter_info(&self, index: usize) -> Option<ParameterInfo>;

    fn asymmetric_errors(&self, index: usize) -> Option<AsymmetricErrors>;

    /// Covariance of the first `dim` free parameters in internal order.
    fn covariance(&self, dim: usize) -> Option<DMatrix<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Init,
    Evaluate,
    Finalize,
}

/// One callback from the minimizer.
pub struct CallRequest<'a> {
    /// Flat parameter vector, one entry per declared parameter.
    pub params: &'a [f64],
    pub mode: CallMode,
    /// Gradient output, when the minimizer asks for one.
    pub gradient: Option<&'a mut [f64]>,
    /// Inside the minimizer's iteration loop (as opposed to a final or
    /// external evaluation).
    pub in_loop: bool,
    /// Results view, present for [`CallMode::Finalize`].
    pub query: Option<&'a dyn MinimizerQuery>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallReply {
    pub value: f64,
    /// Ask the minimizer to stop after at most this many further iterations.
    pub stop_after: Option<usize>,
}

impl CallReply {
    pub fn value(value: f64) -> Self {
        Self {
            value,
            stop_after: None,
        }
    }
}

/// The objective side of a run.
pub trait FitCallback {
    fn call(&mut self, request: CallRequest<'_>) -> CallReply;
}

/// A stateful minimizer.
pub trait Minimizer: MinimizerQuery {
    /// Forget all declared parameters and results.
    fn reset(&mut self);

    fn push_parameter(&mut self, decl: ParameterDecl) -> Result<()>;

    fn push_option(&mut self, option: MinimizerOption) -> Result<()>;

    fn set_max_calls(&mut self, max_calls: Option<usize>);

    /// Minimize, calling back into `callback` until done. Blocks.
    fn run(&mut self, callback: &mut dyn FitCallback) -> Result<()>;
}
