//! The dual-stream aggregation coordinator.
//!
//! Both feed channels of a query send generation-tagged [`Dispatch`] messages
//! into one inbox. The coordinator is the single consumer: it applies them in
//! arrival order, re-checks joint termination after every transition, and
//! merges exactly once per query.

use crate::aggregation::state::{BranchState, QueryLifecycle, ScanSnapshot};
use crate::error::ScanError;
use crate::feed::{ChannelSettings, Dispatch, FeedChannel, FeedHandle, FeedTransport};
use crate::merge::{merge, MergedView};
use crate::models::{IncidentItem, TrendItem};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Outcome of applying one inbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Message belongs to a superseded query.
    Stale,
    /// Branch refused the transition (already terminal).
    Rejected,
    /// Branch state changed.
    Updated,
    /// Branch state changed and the merge ran.
    Settled,
}

pub struct AggregationCoordinator {
    transport: Arc<dyn FeedTransport>,
    settings: ChannelSettings,
    lifecycle: QueryLifecycle,
    trends: BranchState<TrendItem>,
    incidents: BranchState<IncidentItem>,
    merged: Option<Arc<MergedView>>,
    merges_run: usize,
    inbox_tx: mpsc::UnboundedSender<Dispatch>,
    inbox: mpsc::UnboundedReceiver<Dispatch>,
    channels: Vec<FeedHandle>,
    snapshots: watch::Sender<ScanSnapshot>,
}

impl AggregationCoordinator {
    pub fn new(transport: Arc<dyn FeedTransport>, settings: ChannelSettings) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(ScanSnapshot::default());

        Self {
            transport,
            settings,
            lifecycle: QueryLifecycle::new(),
            trends: BranchState::idle(),
            incidents: BranchState::idle(),
            merged: None,
            merges_run: 0,
            inbox_tx,
            inbox,
            channels: Vec::new(),
            snapshots,
        }
    }

    /// Start a scan for `query`, superseding any scan in flight.
    ///
    /// Must be called within a tokio runtime. Returns the new generation.
    pub fn submit_query(&mut self, query: &str) -> Result<u64, ScanError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ScanError::EmptyQuery);
        }

        if self.lifecycle.scan_in_flight() {
            info!(
                "Superseding in-flight scan (generation {})",
                self.lifecycle.generation()
            );
        }
        for channel in self.channels.drain(..) {
            channel.close();
        }

        let generation = self.lifecycle.begin(query);
        self.trends = BranchState::processing();
        self.incidents = BranchState::processing();
        self.merged = None;
        self.publish();

        info!("Scanning \"{}\" (generation {})", query, generation);
        self.channels.push(
            FeedChannel::<TrendItem>::new(
                self.transport.clone(),
                query,
                generation,
                self.settings,
                self.inbox_tx.clone(),
            )
            .spawn(),
        );
        self.channels.push(
            FeedChannel::<IncidentItem>::new(
                self.transport.clone(),
                query,
                generation,
                self.settings,
                self.inbox_tx.clone(),
            )
            .spawn(),
        );

        Ok(generation)
    }

    /// Apply one channel message.
    pub fn apply(&mut self, dispatch: Dispatch) -> Applied {
        let generation = dispatch.generation();
        if !self.lifecycle.is_current(generation) {
            warn!(
                "Discarding stale {} message (generation {}, current {})",
                dispatch.source(),
                generation,
                self.lifecycle.generation()
            );
            return Applied::Stale;
        }

        let source = dispatch.source();
        let status = dispatch.status();
        let changed = match dispatch {
            Dispatch::Trends(signal) => self.trends.transition(signal.status, signal.payload),
            Dispatch::Incidents(signal) => self.incidents.transition(signal.status, signal.payload),
        };
        if !changed {
            debug!("Ignoring {} transition to {}", source, status);
            return Applied::Rejected;
        }
        debug!("{} branch is {}", source, status);

        let outcome = if self.trends.status.is_terminal()
            && self.incidents.status.is_terminal()
            && self.lifecycle.settle()
        {
            let view = merge(&self.trends, &self.incidents);
            self.merges_run += 1;
            info!(
                "Merged {} events, {} alerts, {} hotspots",
                view.events.len(),
                view.alerts.len(),
                view.hotspots.len()
            );
            self.merged = Some(Arc::new(view));
            Applied::Settled
        } else {
            Applied::Updated
        };

        self.publish();
        outcome
    }

    /// Wait for and apply the next inbox message.
    pub async fn step(&mut self) -> Option<Applied> {
        let dispatch = self.inbox.recv().await?;
        Some(self.apply(dispatch))
    }

    /// Drive the inbox until the current query is merged.
    ///
    /// Returns `None` when no query was ever submitted.
    pub async fn wait_for_merge(&mut self) -> Option<Arc<MergedView>> {
        if self.lifecycle.generation() == 0 {
            return None;
        }
        loop {
            if let Some(view) = &self.merged {
                return Some(view.clone());
            }
            self.step().await?;
        }
    }

    /// Receiver of the snapshot published after every transition.
    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn trends(&self) -> &BranchState<TrendItem> {
        &self.trends
    }

    pub fn incidents(&self) -> &BranchState<IncidentItem> {
        &self.incidents
    }

    pub fn merged(&self) -> Option<&Arc<MergedView>> {
        self.merged.as_ref()
    }

    pub fn lifecycle(&self) -> &QueryLifecycle {
        &self.lifecycle
    }

    /// Total merges run over the coordinator's lifetime.
    pub fn merges_run(&self) -> usize {
        self.merges_run
    }

    fn publish(&self) {
        self.snapshots.send_replace(ScanSnapshot {
            generation: self.lifecycle.generation(),
            query: self.lifecycle.query().map(str::to_string),
            scan_in_flight: self.lifecycle.scan_in_flight(),
            trends: self.trends.clone(),
            incidents: self.incidents.clone(),
            merged: self.merged.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::BranchStatus;
    use crate::error::FeedError;
    use crate::feed::testing::{Script, ScriptedTransport};
    use crate::feed::BranchSignal;
    use crate::models::{BranchPayload, SourceKind};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    /// Coordinator whose channels never report, so tests drive it by hand.
    fn quiet() -> AggregationCoordinator {
        AggregationCoordinator::new(
            ScriptedTransport::new(),
            ChannelSettings { idle_timeout: None },
        )
    }

    fn trends(generation: u64, status: BranchStatus, n: usize) -> Dispatch {
        let item: TrendItem = serde_json::from_value(json!({"query_volume": 10})).unwrap();
        Dispatch::Trends(BranchSignal {
            generation,
            status,
            payload: Arc::new(BranchPayload::streaming(
                SourceKind::Trends,
                "q",
                vec![item; n],
                None,
            )),
        })
    }

    fn incidents(generation: u64, status: BranchStatus, n: usize) -> Dispatch {
        let item: IncidentItem =
            serde_json::from_value(json!({"title": "t", "severity": "critical"})).unwrap();
        Dispatch::Incidents(BranchSignal {
            generation,
            status,
            payload: Arc::new(BranchPayload::streaming(
                SourceKind::Incidents,
                "q",
                vec![item; n],
                None,
            )),
        })
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let mut coordinator = quiet();
        assert_eq!(
            assert_err!(coordinator.submit_query("   ")),
            ScanError::EmptyQuery
        );
        assert_eq!(coordinator.lifecycle().generation(), 0);
        assert!(coordinator.wait_for_merge().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_resets_both_branches_to_processing() {
        let mut coordinator = quiet();
        let generation = assert_ok!(coordinator.submit_query("  vape burns  "));

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.generation, generation);
        assert_eq!(snapshot.query.as_deref(), Some("vape burns"));
        assert!(snapshot.scan_in_flight);
        assert_eq!(snapshot.trends.status, BranchStatus::Processing);
        assert_eq!(snapshot.incidents.status, BranchStatus::Processing);
        assert!(snapshot.merged.is_none());
    }

    #[tokio::test]
    async fn test_merge_runs_once_when_trends_finish_first() {
        let mut coordinator = quiet();
        let g = coordinator.submit_query("q").unwrap();

        assert_eq!(coordinator.apply(trends(g, BranchStatus::Processing, 1)), Applied::Updated);
        assert_eq!(coordinator.apply(trends(g, BranchStatus::Completed, 1)), Applied::Updated);
        assert_eq!(coordinator.merges_run(), 0);
        assert_eq!(coordinator.apply(incidents(g, BranchStatus::Completed, 1)), Applied::Settled);

        assert_eq!(coordinator.merges_run(), 1);
        assert!(!coordinator.lifecycle().scan_in_flight());
        assert_eq!(coordinator.merged().unwrap().events.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_runs_once_when_incidents_finish_first() {
        let mut coordinator = quiet();
        let g = coordinator.submit_query("q").unwrap();

        assert_eq!(coordinator.apply(incidents(g, BranchStatus::Error, 0)), Applied::Updated);
        assert_eq!(coordinator.apply(trends(g, BranchStatus::Processing, 1)), Applied::Updated);
        assert_eq!(coordinator.apply(trends(g, BranchStatus::Completed, 2)), Applied::Settled);

        assert_eq!(coordinator.merges_run(), 1);
        assert_eq!(coordinator.merged().unwrap().events.len(), 2);
        assert_eq!(coordinator.incidents().status, BranchStatus::Error);
    }

    #[tokio::test]
    async fn test_duplicate_terminal_does_not_merge_again() {
        let mut coordinator = quiet();
        let g = coordinator.submit_query("q").unwrap();

        coordinator.apply(trends(g, BranchStatus::Completed, 1));
        coordinator.apply(incidents(g, BranchStatus::Completed, 1));
        assert_eq!(coordinator.apply(incidents(g, BranchStatus::Completed, 5)), Applied::Rejected);
        assert_eq!(coordinator.apply(trends(g, BranchStatus::Error, 0)), Applied::Rejected);

        assert_eq!(coordinator.merges_run(), 1);
        assert_eq!(coordinator.merged().unwrap().events.len(), 2);
    }

    #[tokio::test]
    async fn test_simultaneous_finish_merges_once() {
        let transport = ScriptedTransport::new();
        transport.script(
            SourceKind::Trends,
            Script::replay(include_str!("../../fixtures/trends_complete.sse")),
        );
        transport.script(
            SourceKind::Incidents,
            Script::replay(include_str!("../../fixtures/incidents_complete.sse")),
        );
        let mut coordinator =
            AggregationCoordinator::new(transport, ChannelSettings::default());

        coordinator.submit_query("dry scooping").unwrap();
        // let both channels finish before the coordinator reads anything
        tokio::time::sleep(Duration::from_millis(50)).await;

        let view = coordinator.wait_for_merge().await.unwrap();
        assert_eq!(coordinator.merges_run(), 1);
        assert_eq!(view.events.len(), 3);
        assert_eq!(view.alerts.len(), 3);
        assert_eq!(view.hotspots.len(), 1);
        assert_eq!(view.hotspots[0].total_intensity, 1700.0);
        assert_eq!(view.hotspots[0].city, "Metairie");
    }

    #[tokio::test]
    async fn test_stale_generation_is_rejected() {
        let mut coordinator = quiet();
        let old = coordinator.submit_query("first").unwrap();
        coordinator.apply(trends(old, BranchStatus::Processing, 1));

        let current = coordinator.submit_query("second").unwrap();
        assert_eq!(coordinator.trends().received(), 0);

        assert_eq!(coordinator.apply(trends(old, BranchStatus::Completed, 3)), Applied::Stale);
        assert_eq!(coordinator.apply(incidents(old, BranchStatus::Completed, 3)), Applied::Stale);
        assert_eq!(coordinator.trends().status, BranchStatus::Processing);
        assert_eq!(coordinator.merges_run(), 0);

        coordinator.apply(trends(current, BranchStatus::Completed, 1));
        coordinator.apply(incidents(current, BranchStatus::Completed, 1));
        assert_eq!(coordinator.merges_run(), 1);
    }

    #[tokio::test]
    async fn test_queued_messages_from_superseded_query_are_discarded() {
        let transport = ScriptedTransport::new();
        transport.script(
            SourceKind::Trends,
            Script::replay(include_str!("../../fixtures/trends_complete.sse")),
        );
        transport.script(
            SourceKind::Incidents,
            Script::replay(include_str!("../../fixtures/incidents_complete.sse")),
        );
        let (open_trends, trends_gate) = oneshot::channel();
        let (open_incidents, incidents_gate) = oneshot::channel();
        transport.script(
            SourceKind::Trends,
            Script::gated(trends_gate, include_str!("../../fixtures/trends_complete.sse")),
        );
        transport.script(
            SourceKind::Incidents,
            Script::gated(incidents_gate, include_str!("../../fixtures/incidents_error.sse")),
        );
        let mut coordinator =
            AggregationCoordinator::new(transport.clone(), ChannelSettings::default());

        let first = coordinator.submit_query("first").unwrap();
        // generation 1 runs to completion and queues everything
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = coordinator.submit_query("second").unwrap();
        assert!(second > first);

        let mut stale = 0;
        while let Ok(Some(applied)) =
            tokio::time::timeout(Duration::from_millis(50), coordinator.step()).await
        {
            assert_eq!(applied, Applied::Stale);
            stale += 1;
        }
        assert_eq!(stale, 5);
        assert!(coordinator.merged().is_none());
        assert_eq!(coordinator.merges_run(), 0);

        open_trends.send(()).unwrap();
        open_incidents.send(()).unwrap();
        let view = coordinator.wait_for_merge().await.unwrap();

        assert_eq!(coordinator.merges_run(), 1);
        assert_eq!(view.events.len(), 2);
        assert_eq!(coordinator.incidents().status, BranchStatus::Error);
        assert_eq!(
            coordinator.incidents().error_message(),
            Some("search provider rate limited")
        );
        assert_eq!(coordinator.snapshot().generation, second);
    }

    #[tokio::test]
    async fn test_transport_failure_recovers_through_single_fallback() {
        let transport = ScriptedTransport::new();
        transport.script(
            SourceKind::Trends,
            Script::replay(include_str!("../../fixtures/trends_complete.sse")),
        );
        transport.script(
            SourceKind::Incidents,
            Script::Refuse(FeedError::Transport("502 Bad Gateway".into())),
        );
        transport.fallback(
            SourceKind::Incidents,
            Ok(json!({
                "source": "Incident Search (LIVE)",
                "results": [{"title": "Overdose cluster", "severity": "low"}],
                "query": "q",
                "timestamp": "2025-03-14T09:13:00"
            })),
        );
        let mut coordinator =
            AggregationCoordinator::new(transport.clone(), ChannelSettings::default());
        coordinator.submit_query("q").unwrap();

        let mut incident_statuses = vec![coordinator.incidents().status];
        while coordinator.merged().is_none() {
            let Some(Applied::Updated | Applied::Settled) = coordinator.step().await else {
                panic!("unexpected inbox outcome");
            };
            let status = coordinator.incidents().status;
            if incident_statuses.last() != Some(&status) {
                incident_statuses.push(status);
            }
        }

        assert_eq!(
            incident_statuses,
            vec![BranchStatus::Processing, BranchStatus::Completed]
        );
        assert_eq!(transport.fallback_calls(SourceKind::Incidents), 1);
        assert_eq!(transport.fallback_calls(SourceKind::Trends), 0);

        let payload = coordinator.incidents().payload.clone().unwrap();
        assert_eq!(payload.source, "Incident Search (LIVE)");
        assert_eq!(payload.results.len(), 1);
        assert_eq!(coordinator.merged().unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn test_snapshots_follow_transitions() {
        let mut coordinator = quiet();
        let mut rx = coordinator.subscribe();
        let g = coordinator.submit_query("q").unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().scan_in_flight);

        coordinator.apply(trends(g, BranchStatus::Completed, 1));
        coordinator.apply(incidents(g, BranchStatus::Error, 0));

        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.scan_in_flight);
        assert_eq!(snapshot.trends.status, BranchStatus::Completed);
        assert_eq!(snapshot.incidents.status, BranchStatus::Error);
        assert_eq!(snapshot.merged.unwrap().events.len(), 1);
    }
}
