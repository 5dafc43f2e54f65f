//! Query lifecycle, branch state and the coordinator that merges them.

pub mod coordinator;
pub mod state;

pub use coordinator::{AggregationCoordinator, Applied};
pub use state::{BranchState, BranchStatus, QueryLifecycle, ScanSnapshot};
