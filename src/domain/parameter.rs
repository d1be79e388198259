//! Fit parameters.

use serde::Serialize;

use crate::domain::fold_name;
use crate::error::{FitError, Result};

/// Values filled in by result capture after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ParameterResult {
    /// 1-based index among the minimizer's free parameters; `None` if the
    /// minimizer treated the parameter as fixed.
    pub internal_index: Option<usize>,
    /// Parabolic error.
    pub error: f64,
    pub minus_error: f64,
    pub plus_error: f64,
    /// Global correlation coefficient.
    pub global_cc: f64,
    /// Bounds the minimizer applied.
    pub bounds: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    name: String,
    #[serde(skip)]
    key: String,
    pub(crate) value: f64,
    pub(crate) step: f64,
    pub(crate) fixed: bool,
    pub(crate) bounds: Option<(f64, f64)>,
    pub(crate) result: Option<ParameterResult>,
}

impl Parameter {
    pub(crate) fn new(name: &str, value: f64, step: f64) -> Result<Self> {
        let key = fold_name(name)?;
        check_value(value)?;
        check_step(step)?;
        Ok(Self {
            name: name.trim().to_string(),
            key,
            value,
            step,
            fixed: false,
            bounds: None,
            result: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    pub fn result(&self) -> Option<&ParameterResult> {
        self.result.as_ref()
    }

    /// Parabolic error from the last capture, 0 for fixed parameters.
    pub fn error(&self) -> f64 {
        self.result.map(|r| r.error).unwrap_or(0.0)
    }

    pub(crate) fn set_value(&mut self, value: f64) -> Result<()> {
        check_value(value)?;
        if let Some((lo, hi)) = self.bounds {
            if value < lo || value > hi {
                return Err(FitError::OutOfBounds {
                    name: self.name.clone(),
                    value,
                });
            }
        }
        self.value = value;
        Ok(())
    }

    pub(crate) fn set_step(&mut self, step: f64) -> Result<()> {
        check_step(step)?;
        self.step = step;
        Ok(())
    }

    pub(crate) fn set_bounds(&mut self, lo: f64, hi: f64) -> Result<()> {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(FitError::InvalidBound { lo, hi });
        }
        if self.value < lo || self.value > hi {
            return Err(FitError::OutOfBounds {
                name: self.name.clone(),
                value: self.value,
            });
        }
        self.bounds = Some((lo, hi));
        Ok(())
    }

    /// Step as declared to the minimizer: 0 marks a fixed parameter.
    pub(crate) fn declared_step(&self) -> f64 {
        if self.fixed { 0.0 } else { self.step }
    }
}

fn check_value(value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FitError::InvalidValue(value))
    }
}

fn check_step(step: f64) -> Result<()> {
    if step.is_finite() && step > 0.0 {
        Ok(())
    } else {
        Err(FitError::InvalidStep(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_must_bracket_value() {
        let mut p = Parameter::new("mean", 1.0, 0.1).unwrap();
        assert!(matches!(p.set_bounds(2.0, 1.0), Err(FitError::InvalidBound { .. })));
        assert!(matches!(p.set_bounds(2.0, 3.0), Err(FitError::OutOfBounds { .. })));
        p.set_bounds(0.0, 2.0).unwrap();
        assert!(p.set_value(3.0).is_err());
        assert_eq!(p.value(), 1.0);
    }

    #[test]
    fn fixed_parameters_declare_zero_step() {
        let mut p = Parameter::new("a", 1.0, 0.5).unwrap();
        assert_eq!(p.declared_step(), 0.5);
        p.fixed = true;
        assert_eq!(p.declared_step(), 0.0);
    }

    #[test]
    fn rejects_bad_steps() {
        assert!(matches!(Parameter::new("a", 1.0, 0.0), Err(FitError::InvalidStep(_))));
        assert!(matches!(Parameter::new("a", f64::NAN, 1.0), Err(FitError::InvalidValue(_))));
    }
}
