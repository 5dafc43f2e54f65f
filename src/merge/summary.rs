//! Summary statistics over a merged view.

use crate::merge::MergedView;
use crate::models::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Headline numbers of one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Total number of events.
    pub events: usize,
    /// Number of alerts.
    pub alerts: usize,
    /// Number of critical events.
    pub critical: usize,
    /// Number of high severity events.
    pub high: usize,
    /// Number of medium severity events.
    pub medium: usize,
    /// Number of low severity events.
    pub low: usize,
    /// Events with no or an unrecognized severity.
    pub unrated: usize,
    /// Sum of reported affected persons.
    pub total_affected: u64,
    /// Number of hotspots.
    pub active_hotspots: usize,
    /// Sum of hotspot intensities.
    pub total_cases: f64,
    /// Distinct states among hotspots.
    pub states: usize,
    /// Events grouped by source label.
    pub by_source: BTreeMap<String, usize>,
}

impl ScanSummary {
    /// Creates a summary from a merged view.
    pub fn from_view(view: &MergedView) -> Self {
        let mut summary = Self {
            events: view.events.len(),
            alerts: view.alerts.len(),
            active_hotspots: view.hotspots.len(),
            ..Self::default()
        };

        for event in &view.events {
            match event.severity {
                Some(Severity::Critical) => summary.critical += 1,
                Some(Severity::High) => summary.high += 1,
                Some(Severity::Medium) => summary.medium += 1,
                Some(Severity::Low) => summary.low += 1,
                Some(Severity::Other(_)) | None => summary.unrated += 1,
            }

            summary.total_affected = summary.total_affected.saturating_add(event.affected);
            *summary
                .by_source
                .entry(event.source_label.clone())
                .or_insert(0) += 1;
        }

        summary.total_cases = view.hotspots.iter().map(|h| h.total_intensity).sum();
        summary.states = view
            .hotspots
            .iter()
            .map(|h| h.state.as_str())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .len();

        summary
    }

    /// Count of events at or above `level`.
    pub fn at_or_above(&self, level: &Severity) -> usize {
        [
            (Severity::Critical, self.critical),
            (Severity::High, self.high),
            (Severity::Medium, self.medium),
            (Severity::Low, self.low),
        ]
        .iter()
        .filter(|(severity, _)| severity >= level)
        .map(|(_, count)| count)
        .sum()
    }
}
