//! Input/output helpers.
//!
//! - JSON job files describing a whole fit (`job`)
//! - result exports (JSON) (`export`)

pub mod export;
pub mod job;

pub use export::*;
pub use job::*;
