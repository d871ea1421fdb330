//! NATS client wrapper
//!
//! Connection management for the event transport. Publishing is
//! fire-and-forget: callers log failures and never roll back a committed
//! mutation because of them.

use async_nats::{Client, ConnectOptions, HeaderMap, HeaderValue};
use bytes::Bytes;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::NatsArgs;
use crate::types::CivicError;

/// Keep-alive ping interval
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Header carrying the event name on every published message
pub const EVENT_NAME_HEADER: &str = "Civic-Event";

/// Header carrying a unique id per published message, for consumer dedup
pub const EVENT_ID_HEADER: &str = "Civic-Event-Id";

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    /// Client name for logging
    name: String,
}

impl NatsClient {
    /// Connect to NATS, failing fast when the server is unreachable
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self, CivicError> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry_on_initial_connect: dev mode needs a fast failure to fall back
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| CivicError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Publish a message with headers
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(), CivicError> {
        self.client
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .map_err(|e| CivicError::Nats(format!("Publish failed: {}", e)))
    }

    /// Subscribe to a subject (wildcards allowed)
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, CivicError> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| CivicError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<(), CivicError> {
        self.client
            .flush()
            .await
            .map_err(|e| CivicError::Nats(format!("Flush failed: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Headers naming the event carried by a message, plus a fresh message id
pub fn event_headers(event_name: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(event_name) {
        headers.insert(EVENT_NAME_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        headers.insert(EVENT_ID_HEADER, value);
    }
    headers
}
