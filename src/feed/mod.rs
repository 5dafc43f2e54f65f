//! Upstream feeds.
//!
//! A [`FeedTransport`] opens the raw byte stream for a source and performs the
//! one-shot fallback request. A [`FeedChannel`] drives one subscription and
//! reports branch transitions to the coordinator.

pub mod channel;
pub mod envelope;
pub mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use channel::{BranchSignal, ChannelSettings, Dispatch, FeedChannel, FeedHandle};
pub use envelope::{decode_frame, FeedEvent};
pub use http::{Endpoints, HttpTransport};

use crate::error::FeedError;
use crate::models::{IncidentItem, SourceKind, TrendItem};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Raw body chunks of one subscription.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, FeedError>>;

/// Network access for both sources.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open the streaming subscription for `source`.
    async fn subscribe(&self, source: SourceKind, query: &str) -> Result<ByteStream, FeedError>;

    /// One-shot request returning the finalized payload as JSON.
    async fn fetch_once(&self, source: SourceKind, query: &str)
        -> Result<serde_json::Value, FeedError>;
}

/// Result item of one source.
pub trait FeedItem:
    DeserializeOwned + Serialize + Clone + Debug + Send + Sync + 'static
{
    const SOURCE: SourceKind;

    /// Route a signal to the branch this item type belongs to.
    fn dispatch(signal: BranchSignal<Self>) -> Dispatch;
}

impl FeedItem for TrendItem {
    const SOURCE: SourceKind = SourceKind::Trends;

    fn dispatch(signal: BranchSignal<Self>) -> Dispatch {
        Dispatch::Trends(signal)
    }
}

impl FeedItem for IncidentItem {
    const SOURCE: SourceKind = SourceKind::Incidents;

    fn dispatch(signal: BranchSignal<Self>) -> Dispatch {
        Dispatch::Incidents(signal)
    }
}
