//! Re-export public algorithms.

pub mod cut;

pub use cut::{CutConfig, CutEngine, cut};
