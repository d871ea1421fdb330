//! Comment service
//!
//! Adding a comment is an insert followed by an atomic counter increment.
//! Listing hides soft-deleted comments and refuses issues that are gone.

use bson::oid::ObjectId;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::Actor;
use crate::db::schemas::{CommentDoc, MAX_COMMENT_CHARS};
use crate::events::{DomainEvent, EventNotifier};
use crate::query::{Page, PageRequest};
use crate::store::{EntityStore, Window};
use crate::types::{CivicError, Result};

/// Page size for comment threads
pub const COMMENTS_PER_PAGE: u32 = 50;

pub struct CommentService {
    store: Arc<dyn EntityStore>,
    notifier: EventNotifier,
    max_per_page: u32,
}

impl CommentService {
    pub fn new(store: Arc<dyn EntityStore>, notifier: EventNotifier, max_per_page: u32) -> Self {
        Self {
            store,
            notifier,
            max_per_page,
        }
    }

    pub async fn add_comment(
        &self,
        issue_id: &ObjectId,
        actor: &Actor,
        text: &str,
    ) -> Result<CommentDoc> {
        let text = text.trim();
        let len = text.chars().count();
        if len == 0 || len > MAX_COMMENT_CHARS {
            return Err(CivicError::Validation(format!(
                "Comment must be between 1 and {} characters",
                MAX_COMMENT_CHARS
            )));
        }

        if self.store.get_issue(issue_id).await?.is_none() {
            return Err(CivicError::NotFound("Issue not found".to_string()));
        }

        let comment = self
            .store
            .insert_comment(CommentDoc::new(*issue_id, actor.id, text.to_string()))
            .await?;

        if let Err(e) = self.store.adjust_comment_count(issue_id, 1).await {
            // Withdraw the comment the counter failed to count
            warn!(
                comment_id = %comment.id,
                error = %e,
                "Counter increment failed, withdrawing comment"
            );
            if let Err(undo) = self.store.soft_delete_comment(&comment.id, &actor.id).await {
                warn!(
                    comment_id = %comment.id,
                    error = %undo,
                    "Failed to withdraw uncounted comment"
                );
            }
            return Err(e);
        }

        info!(comment_id = %comment.id, issue_id = %issue_id, author = %actor.id, "Comment added");
        self.notifier
            .publish(DomainEvent::new_comment(&comment))
            .await;

        Ok(comment)
    }

    /// Live comments, newest first
    pub async fn list_comments(
        &self,
        issue_id: &ObjectId,
        request: PageRequest,
    ) -> Result<Page<CommentDoc>> {
        let (page, per_page) = request.resolve(COMMENTS_PER_PAGE, self.max_per_page)?;

        if self.store.get_issue(issue_id).await?.is_none() {
            return Err(CivicError::NotFound("Issue not found".to_string()));
        }

        let items = self
            .store
            .list_comments(issue_id, Window::page(page, per_page))
            .await?;
        let total = self.store.count_comments(issue_id).await?;

        Ok(Page::new(items, page, per_page, total))
    }

    /// A live comment, whether or not its issue still is
    pub async fn get_comment(&self, id: &ObjectId) -> Result<CommentDoc> {
        self.store
            .get_comment(id)
            .await?
            .ok_or_else(|| CivicError::NotFound("Comment not found".to_string()))
    }
}
