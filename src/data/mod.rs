//! Data-source collaborator: histograms, tables, an in-memory store and
//! random generation from fitted shapes.

pub mod histogram;
pub mod sample;
pub mod store;
pub mod table;

pub use histogram::*;
pub use sample::*;
pub use store::*;
pub use table::*;
