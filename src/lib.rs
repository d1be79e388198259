//! `histfit` library crate.
//!
//! The binary (`hfit`) is a thin wrapper around this library so that:
//!
//! - the fit engine is testable without spawning processes
//! - front-ends other than the job runner can drive `MinimizerSession` directly
//!
//! A fit is assembled as a `FitConfig` (parameters, function terms, datasets,
//! options), bound to a `MinimizerSession`, synchronized and run. The
//! `AccumulationEngine` turns every minimizer callback into one objective value
//! and captures the minimizer's results back into the fit when it finishes.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod minimizer;
pub mod models;
pub mod report;
pub mod session;

pub use domain::{DatasetSpec, FitConfig, FitStatus};
pub use error::{FitError, Result};
pub use session::MinimizerSession;
