//! Scripted transport for exercising channels and the coordinator offline.

use crate::error::FeedError;
use crate::feed::{ByteStream, FeedTransport};
use crate::models::SourceKind;
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Replay chunk size; small enough to split frames mid-line.
const CHUNK: usize = 7;

/// Behavior of one subscription.
pub enum Script {
    /// Subscription fails immediately.
    Refuse(FeedError),
    /// Subscription never answers.
    Hang,
    /// Chunks, then end of stream.
    Replay(Vec<Result<Vec<u8>, FeedError>>),
    /// Chunks, then silence forever.
    Stall(Vec<Result<Vec<u8>, FeedError>>),
    /// Nothing until the gate fires, then chunks and end of stream.
    Gated(oneshot::Receiver<()>, Vec<Result<Vec<u8>, FeedError>>),
}

impl Script {
    /// Replay a transcript in small chunks.
    pub fn replay(transcript: &str) -> Self {
        Script::Replay(chunked(transcript))
    }

    /// Replay a transcript once `gate` fires.
    pub fn gated(gate: oneshot::Receiver<()>, transcript: &str) -> Self {
        Script::Gated(gate, chunked(transcript))
    }
}

fn chunked(transcript: &str) -> Vec<Result<Vec<u8>, FeedError>> {
    transcript
        .as_bytes()
        .chunks(CHUNK)
        .map(|c| Ok(c.to_vec()))
        .collect()
}

/// Encode frames as an event-stream body.
pub fn sse(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {}\n\n", f)).collect()
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<SourceKind, VecDeque<Script>>>,
    fallbacks: Mutex<HashMap<SourceKind, Result<Value, FeedError>>>,
    fallback_calls: Mutex<HashMap<SourceKind, usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the behavior of the next subscription to `source`.
    pub fn script(&self, source: SourceKind, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(source)
            .or_default()
            .push_back(script);
    }

    /// Set the response of every fallback request to `source`.
    pub fn fallback(&self, source: SourceKind, response: Result<Value, FeedError>) {
        self.fallbacks.lock().unwrap().insert(source, response);
    }

    pub fn fallback_calls(&self, source: SourceKind) -> usize {
        self.fallback_calls
            .lock()
            .unwrap()
            .get(&source)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn subscribe(&self, source: SourceKind, _query: &str) -> Result<ByteStream, FeedError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&source)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Script::Stall(Vec::new()));

        Ok(match script {
            Script::Refuse(e) => return Err(e),
            Script::Hang => return future::pending().await,
            Script::Replay(chunks) => stream::iter(chunks).boxed(),
            Script::Stall(chunks) => stream::iter(chunks).chain(stream::pending()).boxed(),
            Script::Gated(gate, chunks) => stream::once(async move {
                let _ = gate.await;
                stream::iter(chunks)
            })
            .flatten()
            .boxed(),
        })
    }

    async fn fetch_once(&self, source: SourceKind, _query: &str) -> Result<Value, FeedError> {
        *self
            .fallback_calls
            .lock()
            .unwrap()
            .entry(source)
            .or_default() += 1;

        self.fallbacks
            .lock()
            .unwrap()
            .get(&source)
            .cloned()
            .unwrap_or_else(|| Err(FeedError::Fallback("no fallback scripted".into())))
    }
}
