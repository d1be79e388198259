//! The fit model.
//!
//! - `types`: shared value types (options, sync flags, data points, filters)
//! - `parameter`, `term`, `dataset`: the parts a fit is assembled from
//! - `config`: `FitConfig` and its mutation API

pub mod config;
pub mod dataset;
pub mod parameter;
pub mod term;
pub mod types;

pub use config::*;
pub use dataset::*;
pub use parameter::*;
pub use term::*;
pub use types::*;
