//! One streaming subscription, run as its own task.

use crate::aggregation::BranchStatus;
use crate::error::FeedError;
use crate::feed::envelope::{decode_frame, FeedEvent};
use crate::feed::{FeedItem, FeedTransport};
use crate::models::{BranchPayload, IncidentItem, SourceKind, TrendItem};
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default idle limit between two events of one stream.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Branch transition reported by a channel.
#[derive(Debug, Clone)]
pub struct BranchSignal<T> {
    pub generation: u64,
    pub status: BranchStatus,
    pub payload: Arc<BranchPayload<T>>,
}

/// Message on the coordinator inbox.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Trends(BranchSignal<TrendItem>),
    Incidents(BranchSignal<IncidentItem>),
}

impl Dispatch {
    pub fn generation(&self) -> u64 {
        match self {
            Dispatch::Trends(s) => s.generation,
            Dispatch::Incidents(s) => s.generation,
        }
    }

    pub fn source(&self) -> SourceKind {
        match self {
            Dispatch::Trends(_) => SourceKind::Trends,
            Dispatch::Incidents(_) => SourceKind::Incidents,
        }
    }

    pub fn status(&self) -> BranchStatus {
        match self {
            Dispatch::Trends(s) => s.status,
            Dispatch::Incidents(s) => s.status,
        }
    }
}

/// Per-channel tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl ChannelSettings {
    /// Build from seconds, where 0 disables the idle limit.
    pub fn from_idle_seconds(seconds: u64) -> Self {
        Self {
            idle_timeout: (seconds > 0).then(|| Duration::from_secs(seconds)),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Open,
    Closed,
}

/// Drives one source for one query generation.
///
/// Every partial result produces a fresh cumulative snapshot; snapshots
/// already sent are never touched again. Exactly one terminal signal is sent
/// unless the task is aborted first.
pub struct FeedChannel<T: FeedItem> {
    transport: Arc<dyn FeedTransport>,
    query: String,
    generation: u64,
    settings: ChannelSettings,
    outbox: mpsc::UnboundedSender<Dispatch>,
    results: Vec<T>,
}

impl<T: FeedItem> FeedChannel<T> {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        query: impl Into<String>,
        generation: u64,
        settings: ChannelSettings,
        outbox: mpsc::UnboundedSender<Dispatch>,
    ) -> Self {
        Self {
            transport,
            query: query.into(),
            generation,
            settings,
            outbox,
            results: Vec::new(),
        }
    }

    /// Run on a new tokio task.
    pub fn spawn(self) -> FeedHandle {
        let generation = self.generation;
        FeedHandle {
            source: T::SOURCE,
            generation,
            task: tokio::spawn(self.run()),
        }
    }

    /// Run to the branch's terminal signal.
    ///
    /// The idle limit covers the wait for the subscription as well as every
    /// gap between two events.
    pub async fn run(mut self) {
        let source = T::SOURCE;
        debug!("Opening {} stream (generation {})", source, self.generation);

        let subscribed = match self.settings.idle_timeout {
            Some(limit) => {
                let attempt =
                    tokio::time::timeout(limit, self.transport.subscribe(source, &self.query))
                        .await;
                match attempt {
                    Ok(subscribed) => subscribed,
                    Err(_) => {
                        self.idle_expired(limit, "no response to the subscription")
                            .await;
                        return;
                    }
                }
            }
            None => self.transport.subscribe(source, &self.query).await,
        };

        let mut events = match subscribed {
            Ok(stream) => stream.eventsource(),
            Err(error) => {
                self.on_event(FeedEvent::TransportError { error }).await;
                return;
            }
        };

        loop {
            let next = match self.settings.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, events.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.idle_expired(limit, "no data").await;
                        return;
                    }
                },
                None => events.next().await,
            };

            match next {
                Some(Ok(event)) => {
                    if self.on_frame(&event.data).await == Flow::Closed {
                        return;
                    }
                }
                Some(Err(EventStreamError::Transport(error))) => {
                    self.on_event(FeedEvent::TransportError { error }).await;
                    return;
                }
                Some(Err(e)) => {
                    let error = FeedError::Transport(format!("unreadable {} stream: {}", source, e));
                    self.on_event(FeedEvent::TransportError { error }).await;
                    return;
                }
                None => {
                    let error = FeedError::Transport(format!(
                        "{} stream ended before a terminal message",
                        source
                    ));
                    self.on_event(FeedEvent::TransportError { error }).await;
                    return;
                }
            }
        }
    }

    async fn idle_expired(&mut self, limit: Duration, waiting_for: &str) {
        let error = format!(
            "idle timeout: {} from {} stream for {}s",
            waiting_for,
            T::SOURCE,
            limit.as_secs_f64()
        );
        self.on_event(FeedEvent::ChannelError { error }).await;
    }

    async fn on_frame(&mut self, frame: &str) -> Flow {
        match decode_frame::<T>(T::SOURCE, frame) {
            Ok(Some(event)) => self.on_event(event).await,
            Ok(None) => Flow::Open,
            Err(e) => {
                warn!("Skipping malformed frame: {}", e);
                Flow::Open
            }
        }
    }

    async fn on_event(&mut self, event: FeedEvent<T>) -> Flow {
        let source = T::SOURCE;
        match event {
            FeedEvent::Connected { timestamp } => {
                info!(
                    "Connected to {} stream{}",
                    source,
                    timestamp.map(|t| format!(" at {}", t)).unwrap_or_default()
                );
                Flow::Open
            }
            FeedEvent::Partial { item, timestamp } => {
                self.results.push(item);
                debug!("{} partial #{}", source, self.results.len());
                let payload = BranchPayload::streaming(
                    source,
                    &self.query,
                    self.results.clone(),
                    timestamp,
                );
                self.emit(BranchStatus::Processing, payload);
                Flow::Open
            }
            FeedEvent::Complete { total, timestamp } => {
                let received = self.results.len();
                if let Some(total) = total {
                    if total != received as u64 {
                        warn!(
                            "{} stream reported {} results but {} were received",
                            source, total, received
                        );
                    }
                }
                info!("{} stream complete with {} results", source, received);
                let results = std::mem::take(&mut self.results);
                let payload = BranchPayload::streaming(source, &self.query, results, timestamp);
                self.emit(BranchStatus::Completed, payload);
                Flow::Closed
            }
            FeedEvent::ChannelError { error } => {
                warn!("{} stream error: {}", source, error);
                self.emit(BranchStatus::Error, BranchPayload::failed(source, error));
                Flow::Closed
            }
            FeedEvent::TransportError { error } => {
                self.fall_back(error).await;
                Flow::Closed
            }
        }
    }

    /// Single one-shot request after a transport failure. Never retried.
    async fn fall_back(&mut self, cause: FeedError) {
        let source = T::SOURCE;
        warn!("{} stream failed ({}), falling back to one-shot request", source, cause);

        let outcome = match self.transport.fetch_once(source, &self.query).await {
            Ok(body) => serde_json::from_value::<BranchPayload<T>>(body).map_err(|e| {
                FeedError::Decode(format!("invalid {} fallback response: {}", source, e))
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(payload) => {
                info!(
                    "{} fallback returned {} results",
                    source,
                    payload.results.len()
                );
                self.emit(BranchStatus::Completed, payload);
            }
            Err(e) => {
                warn!("{} fallback failed: {}", source, e);
                self.emit(BranchStatus::Error, BranchPayload::failed(source, e.to_string()));
            }
        }
    }

    fn emit(&self, status: BranchStatus, payload: BranchPayload<T>) {
        let signal = BranchSignal {
            generation: self.generation,
            status,
            payload: Arc::new(payload),
        };
        if self.outbox.send(T::dispatch(signal)).is_err() {
            debug!("Coordinator gone, dropping {} signal", T::SOURCE);
        }
    }
}

/// Owner of a running channel task. Dropping it aborts the task.
#[derive(Debug)]
pub struct FeedHandle {
    source: SourceKind,
    generation: u64,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the channel; nothing further is sent once the abort lands.
    pub fn close(&self) {
        if !self.task.is_finished() {
            debug!(
                "Closing {} channel (generation {})",
                self.source, self.generation
            );
        }
        self.task.abort();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
