//! Scan reports.

pub mod generator;

pub use generator::*;

use crate::aggregation::{BranchState, BranchStatus};
use crate::merge::{MergedView, ScanSummary};
use crate::models::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata about one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// The submitted query.
    pub query: String,
    /// Query generation the report belongs to.
    pub generation: u64,
    /// When the scan started.
    pub scan_date: DateTime<Utc>,
    /// Wall time until the merge, in seconds.
    pub duration_seconds: f64,
}

/// Final state of one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchOutcome {
    pub source: SourceKind,
    /// Source name reported by upstream.
    pub label: String,
    pub status: BranchStatus,
    pub results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchOutcome {
    pub fn from_state<T>(source: SourceKind, state: &BranchState<T>) -> Self {
        let label = state
            .payload
            .as_ref()
            .map(|p| p.source.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| source.label().to_string());

        Self {
            source,
            label,
            status: state.status,
            results: state.received(),
            error: state.error_message().map(str::to_string),
        }
    }
}

/// The complete scan report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub metadata: ScanMetadata,
    /// Trends first, then incidents.
    pub branches: Vec<BranchOutcome>,
    pub summary: ScanSummary,
    pub view: Arc<MergedView>,
}

impl ScanReport {
    pub fn new(metadata: ScanMetadata, branches: Vec<BranchOutcome>, view: Arc<MergedView>) -> Self {
        Self {
            metadata,
            branches,
            summary: ScanSummary::from_view(&view),
            view,
        }
    }
}
