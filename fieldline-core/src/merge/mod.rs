//! Parallel merger: bounded chunk fan-out and ordered or keyed fan-in.

pub mod merger;
pub mod pool;

pub use merger::{JOIN_RULE_ID, MergeMode, MergeReport, Merger};
pub use pool::ordered_pool;
