//! Command-line entry points.

pub mod process;
pub mod review;
pub mod searchable;
pub mod suggest;
