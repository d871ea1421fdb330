//! Soft delete coordinator
//!
//! Authors retract their own comments and issues. Records are flagged and
//! stamped, never removed. A comment delete moves its issue's counter down
//! by one only when the flag actually flipped, so a repeated delete can
//! never double-decrement. If the decrement fails the flag is cleared again,
//! so the comment stays live and counted. Deleting an issue leaves its
//! comments in place.

use bson::oid::ObjectId;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::Actor;
use crate::events::{DomainEvent, EventNotifier};
use crate::store::EntityStore;
use crate::types::{CivicError, Result};

pub struct SoftDeleteCoordinator {
    store: Arc<dyn EntityStore>,
    notifier: EventNotifier,
}

impl SoftDeleteCoordinator {
    pub fn new(store: Arc<dyn EntityStore>, notifier: EventNotifier) -> Self {
        Self { store, notifier }
    }

    pub async fn delete_comment(&self, comment_id: &ObjectId, actor: &Actor) -> Result<()> {
        let comment = self
            .store
            .get_comment(comment_id)
            .await?
            .ok_or_else(|| CivicError::NotFound("Comment not found".to_string()))?;

        if comment.author != actor.id {
            return Err(CivicError::Forbidden(
                "You can only delete your own comments".to_string(),
            ));
        }

        if !self.store.soft_delete_comment(comment_id, &actor.id).await? {
            // Lost the race to a concurrent delete of the same comment
            return Err(CivicError::NotFound("Comment not found".to_string()));
        }

        if let Err(e) = self.store.adjust_comment_count(&comment.issue_id, -1).await {
            // Undo the flag so the comment stays live and counted
            warn!(
                comment_id = %comment_id,
                issue_id = %comment.issue_id,
                error = %e,
                "Counter decrement failed, restoring comment"
            );
            if let Err(undo) = self.store.restore_comment(comment_id).await {
                warn!(
                    comment_id = %comment_id,
                    error = %undo,
                    "Failed to restore comment after counter failure"
                );
            }
            return Err(e);
        }

        info!(comment_id = %comment_id, issue_id = %comment.issue_id, "Comment deleted");
        self.notifier
            .publish(DomainEvent::comment_deleted(&comment))
            .await;

        Ok(())
    }

    pub async fn delete_issue(&self, issue_id: &ObjectId, actor: &Actor) -> Result<()> {
        let issue = self
            .store
            .get_issue(issue_id)
            .await?
            .ok_or_else(|| CivicError::NotFound("Issue not found".to_string()))?;

        if issue.author != actor.id {
            return Err(CivicError::Forbidden(
                "You can only delete your own issues".to_string(),
            ));
        }

        if !self.store.soft_delete_issue(issue_id, &actor.id).await? {
            return Err(CivicError::NotFound("Issue not found".to_string()));
        }

        info!(issue_id = %issue_id, "Issue deleted");
        Ok(())
    }
}
