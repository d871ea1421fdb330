//! Toggle set manager
//!
//! Idempotent membership flips on issue upvotes, issue subscribers, and
//! notice upvotes. The flip is a single atomic store operation; calling it
//! twice restores the original membership and count.

use bson::oid::ObjectId;
use std::sync::Arc;
use tracing::debug;

use crate::auth::Actor;
use crate::events::{DomainEvent, EventNotifier, NoticeUpvoteChanged, UpvoteChanged};
use crate::store::{EntityStore, ToggleOutcome, ToggleSet, ToggleTarget};
use crate::types::{CivicError, Result};

pub struct ToggleSetManager {
    store: Arc<dyn EntityStore>,
    notifier: EventNotifier,
}

impl ToggleSetManager {
    pub fn new(store: Arc<dyn EntityStore>, notifier: EventNotifier) -> Self {
        Self { store, notifier }
    }

    /// Flip `actor` in `set` on the target entity
    pub async fn toggle(
        &self,
        target: ToggleTarget,
        set: ToggleSet,
        actor: &Actor,
    ) -> Result<ToggleOutcome> {
        if matches!(target, ToggleTarget::Notice(_)) && set == ToggleSet::Subscribers {
            return Err(CivicError::Validation(
                "Notices do not have subscribers".to_string(),
            ));
        }

        let outcome = self
            .store
            .toggle_member(target, set, &actor.id)
            .await?
            .ok_or_else(|| match target {
                ToggleTarget::Issue(_) => CivicError::NotFound("Issue not found".to_string()),
                ToggleTarget::Notice(_) => CivicError::NotFound("Notice not found".to_string()),
            })?;

        debug!(
            ?target,
            set = set.field(),
            user = %actor.id,
            added = outcome.added,
            count = outcome.count,
            "Toggled membership"
        );

        match (target, set) {
            (ToggleTarget::Issue(id), ToggleSet::Upvotes) => {
                self.notifier
                    .publish(DomainEvent::UpvoteChanged(UpvoteChanged {
                        issue_id: id.to_hex(),
                        upvotes_count: outcome.count,
                    }))
                    .await;
            }
            (ToggleTarget::Notice(id), ToggleSet::Upvotes) => {
                self.notifier
                    .publish(DomainEvent::NoticeUpvoteChanged(NoticeUpvoteChanged {
                        notice_id: id.to_hex(),
                        upvotes_count: outcome.count,
                    }))
                    .await;
            }
            // Subscriptions are private to the subscriber
            (_, ToggleSet::Subscribers) => {}
        }

        Ok(outcome)
    }

    pub async fn toggle_issue_upvote(
        &self,
        issue_id: ObjectId,
        actor: &Actor,
    ) -> Result<ToggleOutcome> {
        self.toggle(ToggleTarget::Issue(issue_id), ToggleSet::Upvotes, actor)
            .await
    }

    pub async fn toggle_subscription(
        &self,
        issue_id: ObjectId,
        actor: &Actor,
    ) -> Result<ToggleOutcome> {
        self.toggle(ToggleTarget::Issue(issue_id), ToggleSet::Subscribers, actor)
            .await
    }

    pub async fn toggle_notice_upvote(
        &self,
        notice_id: ObjectId,
        actor: &Actor,
    ) -> Result<ToggleOutcome> {
        self.toggle(ToggleTarget::Notice(notice_id), ToggleSet::Upvotes, actor)
            .await
    }
}
