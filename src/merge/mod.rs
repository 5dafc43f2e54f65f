//! Merge transform and derived statistics.

pub mod summary;
pub mod transform;

pub use summary::ScanSummary;
pub use transform::*;
