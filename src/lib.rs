//! horizon-scan - dual-stream health-signal aggregation.
//!
//! A query opens two long-lived feeds, one for search-volume trends and one
//! for incident reports. Each feed is tracked as an independent branch; once
//! both branches are terminal the coordinator merges them, exactly once, into
//! an event timeline, an alert list and a set of geographic hotspots.

pub mod aggregation;
pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod merge;
pub mod models;
pub mod report;

pub use aggregation::{AggregationCoordinator, BranchState, BranchStatus, ScanSnapshot};
pub use error::{FeedError, ScanError};
pub use merge::{merge, MergedView};
