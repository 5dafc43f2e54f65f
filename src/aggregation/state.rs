//! Branch and query lifecycle state.

use crate::merge::MergedView;
use crate::models::{BranchPayload, IncidentItem, TrendItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of one branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

impl BranchStatus {
    /// `completed` or `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, BranchStatus::Completed | BranchStatus::Error)
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchStatus::Idle => write!(f, "idle"),
            BranchStatus::Processing => write!(f, "processing"),
            BranchStatus::Completed => write!(f, "completed"),
            BranchStatus::Error => write!(f, "error"),
        }
    }
}

/// Status plus accumulated payload of one branch.
#[derive(Debug, Clone, Serialize)]
pub struct BranchState<T> {
    pub status: BranchStatus,
    pub payload: Option<Arc<BranchPayload<T>>>,
}

impl<T> Default for BranchState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

impl<T> BranchState<T> {
    pub fn idle() -> Self {
        Self {
            status: BranchStatus::Idle,
            payload: None,
        }
    }

    /// Fresh state for a newly submitted query.
    pub fn processing() -> Self {
        Self {
            status: BranchStatus::Processing,
            payload: None,
        }
    }

    /// Apply a transition reported by the branch's channel.
    ///
    /// Terminal states are final and `idle` is only reachable through a reset,
    /// so both are refused. Returns whether the state changed.
    pub fn transition(&mut self, status: BranchStatus, payload: Arc<BranchPayload<T>>) -> bool {
        if self.status.is_terminal() || status == BranchStatus::Idle {
            return false;
        }
        self.status = status;
        self.payload = Some(payload);
        true
    }

    /// Items this branch feeds into the merge: only a completed payload counts.
    pub fn contribution(&self) -> &[T] {
        match (&self.status, &self.payload) {
            (BranchStatus::Completed, Some(payload)) => &payload.results,
            _ => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.error.as_deref())
    }

    /// Number of items accumulated so far.
    pub fn received(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.results.len())
    }
}

/// Top-level scan state: which query is current and whether it is in flight.
#[derive(Debug, Clone, Default)]
pub struct QueryLifecycle {
    generation: u64,
    query: Option<String>,
    scan_in_flight: bool,
    settled: bool,
    started_at: Option<DateTime<Utc>>,
}

impl QueryLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new query, superseding any in flight. Returns its generation.
    pub fn begin(&mut self, query: &str) -> u64 {
        self.generation += 1;
        self.query = Some(query.to_string());
        self.scan_in_flight = true;
        self.settled = false;
        self.started_at = Some(Utc::now());
        self.generation
    }

    /// Whether `generation` belongs to the current query.
    pub fn is_current(&self, generation: u64) -> bool {
        generation != 0 && generation == self.generation
    }

    /// Mark the current query as settled.
    ///
    /// Returns `true` only on the first call per query; the caller merges
    /// exactly when this returns `true`.
    pub fn settle(&mut self) -> bool {
        if self.generation == 0 || self.settled {
            return false;
        }
        self.settled = true;
        self.scan_in_flight = false;
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn scan_in_flight(&self) -> bool {
        self.scan_in_flight
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

/// Read-only view published after every transition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSnapshot {
    pub generation: u64,
    pub query: Option<String>,
    pub scan_in_flight: bool,
    pub trends: BranchState<TrendItem>,
    pub incidents: BranchState<IncidentItem>,
    pub merged: Option<Arc<MergedView>>,
}
