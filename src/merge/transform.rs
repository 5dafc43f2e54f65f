//! Merge of two terminal branches into events, alerts and hotspots.
//!
//! The merge is a pure function of its inputs: no I/O, no clock, no
//! randomness. Identical branch states always produce identical output.

use crate::aggregation::BranchState;
use crate::models::{Event, EventKind, Hotspot, IncidentItem, SourceKind, TrendItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder used when a field is missing from a trend description.
const NOT_AVAILABLE: &str = "n/a";

/// Derived model of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedView {
    /// Incidents in arrival order, then trends in arrival order.
    pub events: Vec<Event>,
    /// Subset of `events` with high or critical severity, same order.
    pub alerts: Vec<Event>,
    /// One entry per distinct coordinate pair, in first-seen order.
    pub hotspots: Vec<Hotspot>,
    pub diagnostics: MergeDiagnostics,
}

/// Per-source counters accumulated during the merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDiagnostics {
    pub incidents: usize,
    pub trends: usize,
    /// Sum of reported `affected` over incident items.
    pub incident_affected: u64,
    /// Sum of reported `affected` over trend items.
    pub trend_affected: u64,
}

/// Merge two terminal branches.
///
/// Total over any pair of states: a branch that is not `completed`
/// contributes nothing.
pub fn merge(trends: &BranchState<TrendItem>, incidents: &BranchState<IncidentItem>) -> MergedView {
    let mut diagnostics = MergeDiagnostics::default();

    let mut events = incident_events(incidents.contribution(), &mut diagnostics);
    events.extend(trend_events(trends.contribution(), &mut diagnostics));

    let alerts = alerts(&events);
    let hotspots = build_hotspots(&events);

    MergedView {
        events,
        alerts,
        hotspots,
        diagnostics,
    }
}

/// One incident event per item, in source order.
pub fn incident_events(items: &[IncidentItem], diagnostics: &mut MergeDiagnostics) -> Vec<Event> {
    let prefix = SourceKind::Incidents.event_prefix();

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let affected = item.affected.unwrap_or(0);
            diagnostics.incidents += 1;
            diagnostics.incident_affected = diagnostics.incident_affected.saturating_add(affected);

            Event {
                id: format!("{}-{}", prefix, idx),
                kind: EventKind::Incident,
                title: item
                    .title
                    .clone()
                    .unwrap_or_else(|| "Untitled report".to_string()),
                source_label: item
                    .source
                    .clone()
                    .unwrap_or_else(|| SourceKind::Incidents.label().to_string()),
                severity: item.severity.clone(),
                date: item.date.clone(),
                description: item.summary.clone().unwrap_or_default(),
                location: item.location.clone(),
                affected,
                url: item.url.clone(),
                trending: None,
                query_volume: None,
            }
        })
        .collect()
}

/// One trend event per item, in source order.
pub fn trend_events(items: &[TrendItem], diagnostics: &mut MergeDiagnostics) -> Vec<Event> {
    let prefix = SourceKind::Trends.event_prefix();

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let affected = item.affected.unwrap_or(0);
            diagnostics.trends += 1;
            diagnostics.trend_affected = diagnostics.trend_affected.saturating_add(affected);

            let area = item
                .location
                .as_ref()
                .map(|l| l.city.as_str())
                .filter(|c| !c.is_empty())
                .or(item.dma_name.as_deref())
                .unwrap_or("unknown area");

            let volume = item
                .query_volume
                .map(|v| v.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());

            Event {
                id: format!("{}-{}", prefix, idx),
                kind: EventKind::Trend,
                title: format!("High search volume in {}", area),
                source_label: SourceKind::Trends.label().to_string(),
                severity: item.risk.clone(),
                date: None,
                description: format!(
                    "Query volume: {}, Trend: {}, DMA: {}",
                    volume,
                    item.trend.as_deref().unwrap_or(NOT_AVAILABLE),
                    item.dma_name.as_deref().unwrap_or(NOT_AVAILABLE)
                ),
                location: item.location.clone(),
                affected,
                url: None,
                trending: item.trend.clone(),
                query_volume: item.query_volume,
            }
        })
        .collect()
}

/// Events with high or critical severity, order preserved.
pub fn alerts(events: &[Event]) -> Vec<Event> {
    events.iter().filter(|e| e.is_alert()).cloned().collect()
}

/// Bucket located events by exact coordinates.
///
/// The first event at a coordinate seeds the hotspot. Later ones add their
/// intensity, extend `types` and overwrite severity, city and state.
pub fn build_hotspots(events: &[Event]) -> Vec<Hotspot> {
    let mut hotspots: Vec<Hotspot> = Vec::new();
    let mut index: HashMap<(u64, u64), usize> = HashMap::new();

    for event in events {
        let Some(location) = &event.location else {
            continue;
        };
        let intensity = event.hotspot_intensity();

        match index.get(&location.key()) {
            Some(&slot) => {
                let hotspot = &mut hotspots[slot];
                hotspot.total_intensity += intensity;
                if !hotspot.types.contains(&event.kind) {
                    hotspot.types.push(event.kind);
                }
                hotspot.count += 1;
                hotspot.severity = event.severity.clone();
                hotspot.city = location.city.clone();
                hotspot.state = location.state.clone();
            }
            None => {
                index.insert(location.key(), hotspots.len());
                hotspots.push(Hotspot {
                    lat: location.lat,
                    lng: location.lng,
                    city: location.city.clone(),
                    state: location.state.clone(),
                    severity: event.severity.clone(),
                    total_intensity: intensity,
                    types: vec![event.kind],
                    count: 1,
                });
            }
        }
    }

    hotspots
}
