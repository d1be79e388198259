//! Numerical utilities: tabulated CDF and weighted summary statistics.

pub mod cdf;
pub mod stats;

pub use cdf::*;
pub use stats::*;
