//! Model functions.
//!
//! A fit's model is a sum of function terms; each term evaluates one
//! registered `ModelFunction` at a coordinate with its own parameter view.

use std::fmt;
use std::sync::Arc;

use crate::error::FunctionError;

/// A model function `f(x; p)`.
///
/// Implementations must be pure: the engine may evaluate the same point many
/// times per minimizer call and from several threads.
pub trait ModelFunction: Send + Sync {
    /// Number of parameters the function reads from its view.
    fn n_params(&self) -> usize;

    /// Evaluate at coordinates `x` (1 to 3 values) with parameters `params`.
    fn eval(&self, x: &[f64], params: &[f64]) -> Result<f64, FunctionError>;
}

type EvalFn = dyn Fn(&[f64], &[f64]) -> Result<f64, FunctionError> + Send + Sync;

/// A model function backed by a closure.
#[derive(Clone)]
pub struct FnModel {
    n_params: usize,
    f: Arc<EvalFn>,
}

impl FnModel {
    pub fn new<F>(n_params: usize, f: F) -> Self
    where
        F: Fn(&[f64], &[f64]) -> Result<f64, FunctionError> + Send + Sync + 'static,
    {
        Self {
            n_params,
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for FnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModel").field("n_params", &self.n_params).finish()
    }
}

impl ModelFunction for FnModel {
    fn n_params(&self) -> usize {
        self.n_params
    }

    fn eval(&self, x: &[f64], params: &[f64]) -> Result<f64, FunctionError> {
        (self.f)(x, params)
    }
}

/// Built-in model shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinModel {
    /// `1` (no parameters).
    Unit,
    /// `p0`.
    Constant,
    /// `p0 + p1 x`.
    Line,
    /// `p0 + p1 x + p2 x²`.
    Quadratic,
    /// `p0 exp(-(x - p1)² / (2 p2²))`.
    Gauss,
    /// `p0 exp(p1 x)`.
    Expo,
    /// `p0 exp(-(x - p1)²/(2 p2²) - (y - p3)²/(2 p4²))`.
    Gauss2,
}

impl BuiltinModel {
    pub const ALL: [BuiltinModel; 7] = [
        BuiltinModel::Unit,
        BuiltinModel::Constant,
        BuiltinModel::Line,
        BuiltinModel::Quadratic,
        BuiltinModel::Gauss,
        BuiltinModel::Expo,
        BuiltinModel::Gauss2,
    ];

    /// Registry tag.
    pub fn tag(self) -> &'static str {
        match self {
            BuiltinModel::Unit => "unit",
            BuiltinModel::Constant => "const",
            BuiltinModel::Line => "line",
            BuiltinModel::Quadratic => "quad",
            BuiltinModel::Gauss => "gauss",
            BuiltinModel::Expo => "expo",
            BuiltinModel::Gauss2 => "gauss2",
        }
    }

    fn dims(self) -> usize {
        match self {
            BuiltinModel::Gauss2 => 2,
            _ => 1,
        }
    }
}

impl ModelFunction for BuiltinModel {
    fn n_params(&self) -> usize {
        match self {
            BuiltinModel::Unit => 0,
            BuiltinModel::Constant => 1,
            BuiltinModel::Line | BuiltinModel::Expo => 2,
            BuiltinModel::Quadratic | BuiltinModel::Gauss => 3,
            BuiltinModel::Gauss2 => 5,
        }
    }

    fn eval(&self, x: &[f64], p: &[f64]) -> Result<f64, FunctionError> {
        if x.len() < self.dims() {
            return Err(FunctionError::Dimension {
                expected: self.dims(),
                got: x.len(),
            });
        }
        if p.len() < self.n_params() {
            return Err(FunctionError::Other(format!(
                "{} needs {} parameters, got {}",
                self.tag(),
                self.n_params(),
                p.len()
            )));
        }
        let v = match self {
            BuiltinModel::Unit => 1.0,
            BuiltinModel::Constant => p[0],
            BuiltinModel::Line => p[0] + p[1] * x[0],
            BuiltinModel::Quadratic => p[0] + p[1] * x[0] + p[2] * x[0] * x[0],
            BuiltinModel::Gauss => {
                let sigma = positive_width(2, p[2])?;
                let z = (x[0] - p[1]) / sigma;
                p[0] * (-0.5 * z * z).exp()
            }
            BuiltinModel::Expo => p[0] * (p[1] * x[0]).exp(),
            BuiltinModel::Gauss2 => {
                let sx = positive_width(2, p[2])?;
                let sy = positive_width(4, p[4])?;
                let zx = (x[0] - p[1]) / sx;
                let zy = (x[1] - p[3]) / sy;
                p[0] * (-0.5 * (zx * zx + zy * zy)).exp()
            }
        };
        if v.is_finite() {
            Ok(v)
        } else {
            Err(FunctionError::NonFinite)
        }
    }
}

fn positive_width(index: usize, value: f64) -> Result<f64, FunctionError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(FunctionError::Domain { index, value })
    }
}
