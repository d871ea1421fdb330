//! Event sinks
//!
//! A sink takes `(audience, name, payload)` and delivers it somewhere:
//! NATS subjects in production, a tokio broadcast channel in dev mode, an
//! in-memory log in tests.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::nats::{event_headers, NatsClient};
use crate::types::Result;

/// Who receives an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every listener
    Everyone,
    /// A single user's direct channel
    User(ObjectId),
}

/// One delivered event
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub audience: Audience,
    pub name: String,
    pub payload: Value,
}

/// Destination for domain events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, audience: Audience, name: &str, payload: &Value) -> Result<()>;

    /// Push out anything buffered; called before the process exits
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Sink name for logs
    fn kind(&self) -> &'static str;
}

// ============================================================================
// NATS
// ============================================================================

/// Publishes events to NATS subjects
///
/// Broadcasts go to `<prefix>.events.<name>`, addressed messages to
/// `<prefix>.users.<userId>.<name>`.
pub struct NatsEventSink {
    client: NatsClient,
    prefix: String,
}

impl NatsEventSink {
    pub fn new(client: NatsClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn subject(&self, audience: Audience, name: &str) -> String {
        subject_for(&self.prefix, audience, name)
    }
}

fn subject_for(prefix: &str, audience: Audience, name: &str) -> String {
    match audience {
        Audience::Everyone => format!("{}.events.{}", prefix, name),
        Audience::User(id) => format!("{}.users.{}.{}", prefix, id.to_hex(), name),
    }
}

#[async_trait]
impl EventSink for NatsEventSink {
    async fn deliver(&self, audience: Audience, name: &str, payload: &Value) -> Result<()> {
        let subject = self.subject(audience, name);
        let body = Bytes::from(serde_json::to_vec(payload)?);
        self.client
            .publish_with_headers(&subject, event_headers(name), body)
            .await
    }

    async fn flush(&self) -> Result<()> {
        self.client.flush().await
    }

    fn kind(&self) -> &'static str {
        "nats"
    }
}

// ============================================================================
// In-process broadcast
// ============================================================================

/// Fans events out to in-process receivers
pub struct BroadcastSink {
    sender: broadcast::Sender<Published>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn deliver(&self, audience: Audience, name: &str, payload: &Value) -> Result<()> {
        let event = Published {
            audience,
            name: name.to_string(),
            payload: payload.clone(),
        };
        // No receivers is not a failure for a broadcast
        if self.sender.send(event).is_err() {
            debug!(event = name, "No in-process listeners");
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "broadcast"
    }
}

// ============================================================================
// Recording
// ============================================================================

/// Keeps every delivered event in memory
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Published>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Published> {
        self.events.lock().await.clone()
    }

    /// Delivered events with the given name
    pub async fn named(&self, name: &str) -> Vec<Published> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, audience: Audience, name: &str, payload: &Value) -> Result<()> {
        self.events.lock().await.push(Published {
            audience,
            name: name.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}
