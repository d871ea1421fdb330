//! Best-effort event fan-out
//!
//! Constructed once at startup and shared by reference with every service.
//! Delivery failures are logged and swallowed: a committed mutation is
//! never failed or rolled back because an event did not go out.

use bson::oid::ObjectId;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Audience, DomainEvent, EventSink};

#[derive(Clone)]
pub struct EventNotifier {
    sink: Arc<dyn EventSink>,
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Broadcast an event to every listener
    pub async fn publish(&self, event: DomainEvent) {
        self.send(Audience::Everyone, &event).await;
    }

    /// Send one direct copy of an event to each user
    pub async fn publish_to(&self, users: &[ObjectId], event: DomainEvent) {
        for user in users {
            self.send(Audience::User(*user), &event).await;
        }
    }

    /// Flush the sink, logging rather than returning failures
    pub async fn flush(&self) {
        if let Err(e) = self.sink.flush().await {
            warn!(sink = self.sink.kind(), error = %e, "Event flush failed");
        }
    }

    async fn send(&self, audience: Audience, event: &DomainEvent) {
        let name = event.name();
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event = name, error = %e, "Failed to encode event payload");
                return;
            }
        };

        match self.sink.deliver(audience, name, &payload).await {
            Ok(()) => debug!(event = name, sink = self.sink.kind(), ?audience, "Event published"),
            Err(e) => warn!(
                event = name,
                sink = self.sink.kind(),
                error = %e,
                "Event publish failed, continuing"
            ),
        }
    }
}
