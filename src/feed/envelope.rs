//! The message envelope carried by both event streams.
//!
//! Every event's `data` holds a JSON envelope
//! `{type, data?, total?, timestamp?, error?, index?}`; [`decode_frame`]
//! turns it into a typed [`FeedEvent`].

use crate::error::FeedError;
use crate::models::{lenient, SourceKind};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Raw envelope as sent by the streaming endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient::count")]
    pub index: Option<u64>,
}

/// Lifecycle event of one feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<T> {
    /// Stream is open. Informational only.
    Connected { timestamp: Option<String> },
    /// One more result item.
    Partial { item: T, timestamp: Option<String> },
    /// Upstream finished; `total` is its own count.
    Complete {
        total: Option<u64>,
        timestamp: Option<String>,
    },
    /// Upstream reported a failure inside the stream.
    ChannelError { error: String },
    /// The subscription itself failed.
    TransportError { error: FeedError },
}

/// Decode one frame payload for `source`.
///
/// Returns `Ok(None)` for envelope types this source does not use.
pub fn decode_frame<T: DeserializeOwned>(
    source: SourceKind,
    frame: &str,
) -> Result<Option<FeedEvent<T>>, FeedError> {
    let envelope: Envelope = serde_json::from_str(frame)
        .map_err(|e| FeedError::Decode(format!("invalid {} envelope: {}", source, e)))?;

    let event = match envelope.kind.as_str() {
        "connected" => FeedEvent::Connected {
            timestamp: envelope.timestamp,
        },
        "complete" => FeedEvent::Complete {
            total: envelope.total,
            timestamp: envelope.timestamp,
        },
        "error" => FeedEvent::ChannelError {
            error: envelope
                .error
                .unwrap_or_else(|| format!("{} stream reported an error", source)),
        },
        tag if tag == source.partial_tag() => {
            let data = envelope.data.ok_or_else(|| {
                FeedError::Decode(format!("{} frame without data", tag))
            })?;
            let item = serde_json::from_value(data)
                .map_err(|e| FeedError::Decode(format!("invalid {} item: {}", source, e)))?;
            FeedEvent::Partial {
                item,
                timestamp: envelope.timestamp,
            }
        }
        other => {
            debug!("Ignoring '{}' frame on {} stream", other, source);
            return Ok(None);
        }
    };

    Ok(Some(event))
}
