//! Fit orchestration.
//!
//! Responsibilities:
//!
//! - map the minimizer's flat parameter vector onto function terms
//! - build per-dataset integration caches
//! - accumulate the objective on every minimizer callback (parallel model evaluation)
//! - capture results back into the fit when the minimizer finishes

pub mod capture;
pub mod engine;
pub mod integration;
pub mod mapping;
pub mod methods;
pub mod timeout;

pub use capture::*;
pub use engine::*;
pub use integration::*;
pub use mapping::*;
pub use methods::*;
pub use timeout::*;
