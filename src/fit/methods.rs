//! Accumulation methods: the per-point statistic summed into the objective.
//!
//! | method | formula |
//! |---|---|
//! | `LeastSquares` | `((pred - obs) / err)²` |
//! | `LeastSquaresUnweighted` | `(pred - obs)²` |
//! | `Pearson` | `(pred - obs)² / pred` |
//! | `MaxLikelihood` | binned `-2 obs ln(pred)`, unbinned `-2 ln(pred)` |
//! | `ExtendedMaxLikelihood` | as above, plus `2 pred` per bin (binned) or `2 N` once per dataset (unbinned) |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DataPoint;
use crate::error::{FitError, PointError};

/// `ln` of the smallest density the likelihood methods take seriously.
/// Non-positive densities are charged as if the model predicted this.
pub const LOG_DENSITY_FLOOR: f64 = -708.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccumulationMethod {
    #[default]
    LeastSquares,
    LeastSquaresUnweighted,
    Pearson,
    MaxLikelihood,
    ExtendedMaxLikelihood,
}

/// Result of one point's statistic.
///
/// When `error` is set, `value` is the penalty charged for the point if the
/// engine is told to carry on regardless; otherwise the point contributes 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub value: f64,
    pub error: Option<PointError>,
}

impl Contribution {
    fn ok(value: f64) -> Self {
        Self { value, error: None }
    }

    fn err(error: PointError, penalty: f64) -> Self {
        Self {
            value: penalty,
            error: Some(error),
        }
    }
}

impl AccumulationMethod {
    pub const ALL: [AccumulationMethod; 5] = [
        AccumulationMethod::LeastSquares,
        AccumulationMethod::LeastSquaresUnweighted,
        AccumulationMethod::Pearson,
        AccumulationMethod::MaxLikelihood,
        AccumulationMethod::ExtendedMaxLikelihood,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            AccumulationMethod::LeastSquares => "lsq",
            AccumulationMethod::LeastSquaresUnweighted => "lsq-unweighted",
            AccumulationMethod::Pearson => "pearson",
            AccumulationMethod::MaxLikelihood => "ml",
            AccumulationMethod::ExtendedMaxLikelihood => "eml",
        }
    }

    pub fn requires_binned(self) -> bool {
        matches!(
            self,
            AccumulationMethod::LeastSquares
                | AccumulationMethod::LeastSquaresUnweighted
                | AccumulationMethod::Pearson
        )
    }

    pub fn requires_errors(self) -> bool {
        self == AccumulationMethod::LeastSquares
    }

    pub fn is_likelihood(self) -> bool {
        matches!(
            self,
            AccumulationMethod::MaxLikelihood | AccumulationMethod::ExtendedMaxLikelihood
        )
    }

    /// Statistic for one point given the model prediction.
    pub fn contribution(self, pred: f64, point: &DataPoint, binned: bool) -> Contribution {
        let obs = point.obs;
        match self {
            AccumulationMethod::LeastSquares => {
                let err = point.err;
                if err == 0.0 {
                    Contribution::err(PointError::ZeroPointError, 0.0)
                } else if err < 0.0 {
                    Contribution::err(PointError::NegativePointError, 0.0)
                } else {
                    let r = (pred - obs) / err;
                    Contribution::ok(r * r)
                }
            }
            AccumulationMethod::LeastSquaresUnweighted => {
                let r = pred - obs;
                Contribution::ok(r * r)
            }
            AccumulationMethod::Pearson => {
                if obs < 0.0 {
                    Contribution::err(PointError::NegativeObservation, 0.0)
                } else if pred < 0.0 {
                    Contribution::err(PointError::NegativeDensity, 0.0)
                } else if pred == 0.0 {
                    if obs > 0.0 {
                        Contribution::err(PointError::ZeroDensity, 0.0)
                    } else {
                        Contribution::ok(0.0)
                    }
                } else {
                    let r = pred - obs;
                    Contribution::ok(r * r / pred)
                }
            }
            AccumulationMethod::MaxLikelihood | AccumulationMethod::ExtendedMaxLikelihood => {
                let extended = self == AccumulationMethod::ExtendedMaxLikelihood;
                if binned {
                    likelihood_binned(pred, obs, extended)
                } else {
                    likelihood_unbinned(pred)
                }
            }
        }
    }
}

fn penalty(weight: f64) -> f64 {
    -2.0 * weight.max(1.0) * LOG_DENSITY_FLOOR
}

fn likelihood_binned(pred: f64, obs: f64, extended: bool) -> Contribution {
    if obs < 0.0 {
        return Contribution::err(PointError::NegativeObservation, penalty(0.0));
    }
    if pred < 0.0 {
        return Contribution::err(PointError::NegativeDensity, penalty(obs));
    }
    if pred == 0.0 {
        return if obs > 0.0 {
            Contribution::err(PointError::ZeroDensity, penalty(obs))
        } else {
            Contribution::ok(0.0)
        };
    }
    let mut value = if obs > 0.0 { -2.0 * obs * pred.ln() } else { 0.0 };
    if extended {
        value += 2.0 * pred;
    }
    Contribution::ok(value)
}

fn likelihood_unbinned(pred: f64) -> Contribution {
    if pred < 0.0 {
        Contribution::err(PointError::NegativeDensity, penalty(1.0))
    } else if pred == 0.0 {
        Contribution::err(PointError::ZeroDensity, penalty(1.0))
    } else {
        Contribution::ok(-2.0 * pred.ln())
    }
}

impl FromStr for AccumulationMethod {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lsq" | "chi2" | "least-squares" | "least-squares-weighted" => {
                Ok(AccumulationMethod::LeastSquares)
            }
            "lsq-unweighted" | "least-squares-unweighted" => {
                Ok(AccumulationMethod::LeastSquaresUnweighted)
            }
            "pearson" | "pearson-chi2" => Ok(AccumulationMethod::Pearson),
            "ml" | "max-likelihood" => Ok(AccumulationMethod::MaxLikelihood),
            "eml" | "extended-max-likelihood" => Ok(AccumulationMethod::ExtendedMaxLikelihood),
            _ => Err(FitError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for AccumulationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
