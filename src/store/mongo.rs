//! MongoDB entity store
//!
//! Every mutation is one conditional single-document update. Toggle sets use
//! guarded `$addToSet` / `$pull` with a retry loop when a concurrent flip
//! lands between the two guards.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::options::FindOptions;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{
    EntityStore, IssueFilter, IssueSort, NoticeFilter, NoticeSort, NoticeUpdate, NoticeWindow,
    NoticeWrite, StatusWrite, ToggleOutcome, ToggleSet, ToggleTarget, Window,
};
use crate::db::mongo::{exclude_deleted, IntoIndexes, MutMetadata};
use crate::db::schemas::{
    CommentDoc, IssueDoc, IssueStatus, NoticeDoc, StatusEntry, COMMENT_COLLECTION,
    ISSUE_COLLECTION, NOTICE_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{CivicError, Result};

/// Default attempts for a contended toggle
pub const DEFAULT_TOGGLE_ATTEMPTS: u32 = 5;

/// MongoDB-backed store
#[derive(Clone)]
pub struct MongoStore {
    issues: MongoCollection<IssueDoc>,
    comments: MongoCollection<CommentDoc>,
    notices: MongoCollection<NoticeDoc>,
    toggle_attempts: u32,
}

impl MongoStore {
    /// Open collections and apply their indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            issues: client.collection(ISSUE_COLLECTION).await?,
            comments: client.collection(COMMENT_COLLECTION).await?,
            notices: client.collection(NOTICE_COLLECTION).await?,
            toggle_attempts: DEFAULT_TOGGLE_ATTEMPTS,
        })
    }

    pub fn with_toggle_attempts(mut self, attempts: u32) -> Self {
        self.toggle_attempts = attempts.max(1);
        self
    }
}

// ============================================================================
// Query translation
// ============================================================================

/// Escape a literal for use inside `$regex`
fn escape_regex(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn issue_query(filter: &IssueFilter, near: bool) -> Document {
    let mut query = Document::new();
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(category) = filter.category {
        query.insert("category", category.as_str());
    }
    if let Some(author) = filter.author {
        query.insert("author", author);
    }
    if let Some(ref search) = filter.search {
        let pattern = escape_regex(search);
        query.insert(
            "$or",
            vec![
                doc! { "title": { "$regex": &pattern, "$options": "i" } },
                doc! { "description": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }
    if let Some(ref geo) = filter.geo {
        let clause = if near { geo.to_near() } else { None };
        query.insert("location", clause.unwrap_or_else(|| geo.to_within()));
    }
    query
}

fn notice_query(filter: &NoticeFilter, near: bool) -> Document {
    let mut query = Document::new();
    if let Some(category) = filter.category {
        query.insert("category", category.as_str());
    }
    if let Some(created_by) = filter.created_by {
        query.insert("created_by", created_by);
    }
    if let Some(now) = filter.active_at {
        query.insert(
            "$or",
            vec![
                doc! { "end_time": { "$exists": false } },
                doc! { "end_time": Bson::Null },
                doc! { "end_time": { "$gte": now } },
            ],
        );
    }
    if let Some(ref geo) = filter.geo {
        let clause = if near { geo.to_near() } else { None };
        query.insert("location", clause.unwrap_or_else(|| geo.to_within()));
    }
    query
}

/// Equality on an optional date field; `null` also matches a missing field
fn optional_date(value: Option<DateTime>) -> Bson {
    value.map(Bson::DateTime).unwrap_or(Bson::Null)
}

fn window_guard(window: &NoticeWindow) -> Document {
    doc! {
        "start_time": optional_date(window.start_time),
        "end_time": optional_date(window.end_time),
    }
}

fn recency(direction: i32) -> Document {
    doc! { "metadata.created_at": direction, "_id": direction }
}

fn find_options(sort: Option<Document>, window: Window) -> FindOptions {
    let mut options = FindOptions::default();
    options.sort = sort;
    options.skip = (window.skip > 0).then_some(window.skip);
    options.limit = window.limit.map(|l| l as i64);
    options
}

// ============================================================================
// Toggle
// ============================================================================

/// Flip `user` in `field` with guarded add/remove
///
/// The add only matches when the user is absent and the remove only when
/// present, so neither can clobber a concurrent flip by another user.
async fn toggle_in<T>(
    collection: &MongoCollection<T>,
    id: &ObjectId,
    field: &str,
    user: &ObjectId,
    attempts: u32,
    members: impl Fn(&T) -> usize,
) -> Result<Option<ToggleOutcome>>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    for attempt in 1..=attempts {
        let absent = exclude_deleted(doc! { "_id": id, field: { "$ne": user } });
        let add = doc! {
            "$addToSet": { field: user },
            "$set": { "metadata.updated_at": DateTime::now() },
        };
        if let Some(doc) = collection.find_one_and_update(absent, add).await? {
            return Ok(Some(ToggleOutcome {
                added: true,
                count: members(&doc),
            }));
        }

        let present = exclude_deleted(doc! { "_id": id, field: user });
        let remove = doc! {
            "$pull": { field: user },
            "$set": { "metadata.updated_at": DateTime::now() },
        };
        if let Some(doc) = collection.find_one_and_update(present, remove).await? {
            return Ok(Some(ToggleOutcome {
                added: false,
                count: members(&doc),
            }));
        }

        if collection.find_one(doc! { "_id": id }).await?.is_none() {
            return Ok(None);
        }
        debug!(id = %id, field, attempt, "Toggle raced with a concurrent flip, retrying");
    }

    warn!(id = %id, field, attempts, "Toggle retries exhausted");
    Err(CivicError::Conflict(format!(
        "Could not update {} after {} attempts",
        field, attempts
    )))
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl EntityStore for MongoStore {
    async fn insert_issue(&self, issue: IssueDoc) -> Result<IssueDoc> {
        self.issues.insert_one(issue).await
    }

    async fn get_issue(&self, id: &ObjectId) -> Result<Option<IssueDoc>> {
        self.issues.find_one(doc! { "_id": id }).await
    }

    async fn append_status(
        &self,
        id: &ObjectId,
        expected: IssueStatus,
        entry: StatusEntry,
    ) -> Result<StatusWrite> {
        let entry_bson = bson::to_bson(&entry)
            .map_err(|e| CivicError::Internal(format!("Failed to encode status entry: {}", e)))?;
        let guard = exclude_deleted(doc! {
            "_id": id,
            "status": { "$eq": expected.as_str(), "$ne": IssueStatus::Closed.as_str() },
        });
        let update = doc! {
            "$set": {
                "status": entry.status.as_str(),
                "metadata.updated_at": entry.at,
            },
            "$push": { "status_history": entry_bson },
        };

        if let Some(issue) = self.issues.find_one_and_update(guard, update).await? {
            return Ok(StatusWrite::Applied(issue));
        }

        Ok(match self.issues.find_one(doc! { "_id": id }).await? {
            None => StatusWrite::Missing,
            Some(issue) if issue.status.is_terminal() => StatusWrite::Closed,
            Some(issue) => StatusWrite::Stale(issue.status),
        })
    }

    async fn soft_delete_issue(&self, id: &ObjectId, by: &ObjectId) -> Result<bool> {
        Ok(self.issues.soft_delete(doc! { "_id": id }, *by).await? == 1)
    }

    async fn find_issues(
        &self,
        filter: &IssueFilter,
        sort: IssueSort,
        window: Window,
    ) -> Result<Vec<IssueDoc>> {
        let near = sort == IssueSort::Nearest && filter.geo.and_then(|g| g.center()).is_some();
        let order = match sort {
            // $near already orders by distance
            _ if near => None,
            IssueSort::Oldest => Some(recency(1)),
            IssueSort::MostUpvoted => {
                // Array length is not indexable; upvote ordering goes through aggregation
                return self.find_issues_by_upvotes(filter, window).await;
            }
            IssueSort::MostCommented => Some(doc! {
                "comments_count": -1,
                "metadata.created_at": -1,
                "_id": -1,
            }),
            IssueSort::Newest | IssueSort::Nearest => Some(recency(-1)),
        };

        self.issues
            .find_many(issue_query(filter, near), Some(find_options(order, window)))
            .await
    }

    async fn count_issues(&self, filter: &IssueFilter) -> Result<u64> {
        self.issues.count(issue_query(filter, false)).await
    }

    async fn toggle_member(
        &self,
        target: ToggleTarget,
        set: ToggleSet,
        user: &ObjectId,
    ) -> Result<Option<ToggleOutcome>> {
        match target {
            ToggleTarget::Issue(id) => {
                toggle_in(
                    &self.issues,
                    &id,
                    set.field(),
                    user,
                    self.toggle_attempts,
                    move |doc: &IssueDoc| match set {
                        ToggleSet::Upvotes => doc.upvotes.len(),
                        ToggleSet::Subscribers => doc.subscribers.len(),
                    },
                )
                .await
            }
            ToggleTarget::Notice(id) => {
                if set != ToggleSet::Upvotes {
                    return Err(CivicError::Validation(
                        "Notices only support upvotes".to_string(),
                    ));
                }
                toggle_in(
                    &self.notices,
                    &id,
                    set.field(),
                    user,
                    self.toggle_attempts,
                    |doc: &NoticeDoc| doc.upvotes.len(),
                )
                .await
            }
        }
    }

    async fn insert_comment(&self, comment: CommentDoc) -> Result<CommentDoc> {
        self.comments.insert_one(comment).await
    }

    async fn get_comment(&self, id: &ObjectId) -> Result<Option<CommentDoc>> {
        self.comments.find_one(doc! { "_id": id }).await
    }

    async fn list_comments(&self, issue_id: &ObjectId, window: Window) -> Result<Vec<CommentDoc>> {
        self.comments
            .find_many(
                doc! { "issue_id": issue_id },
                Some(find_options(Some(recency(-1)), window)),
            )
            .await
    }

    async fn count_comments(&self, issue_id: &ObjectId) -> Result<u64> {
        self.comments.count(doc! { "issue_id": issue_id }).await
    }

    async fn soft_delete_comment(&self, id: &ObjectId, by: &ObjectId) -> Result<bool> {
        Ok(self.comments.soft_delete(doc! { "_id": id }, *by).await? == 1)
    }

    async fn restore_comment(&self, id: &ObjectId) -> Result<bool> {
        let update = doc! {
            "$set": {
                "metadata.is_deleted": false,
                "metadata.updated_at": DateTime::now(),
            },
            "$unset": { "metadata.deleted_at": "", "metadata.deleted_by": "" },
        };
        let result = self
            .comments
            .update_one(doc! { "_id": id, "metadata.is_deleted": true }, update)
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn adjust_comment_count(&self, issue_id: &ObjectId, delta: i64) -> Result<()> {
        let filter = if delta < 0 {
            // Floor at zero: only decrement when enough remain
            doc! { "_id": issue_id, "comments_count": { "$gte": -delta } }
        } else {
            doc! { "_id": issue_id }
        };
        let update = doc! { "$inc": { "comments_count": delta } };
        let result = self.issues.update_one(filter, update).await?;
        if result.matched_count == 0 {
            debug!(issue_id = %issue_id, delta, "Comment count unchanged (missing issue or floor)");
        }
        Ok(())
    }

    async fn insert_notice(&self, notice: NoticeDoc) -> Result<NoticeDoc> {
        self.notices.insert_one(notice).await
    }

    async fn get_notice(&self, id: &ObjectId) -> Result<Option<NoticeDoc>> {
        self.notices.find_one(doc! { "_id": id }).await
    }

    async fn update_notice(
        &self,
        id: &ObjectId,
        window: Option<NoticeWindow>,
        update: &NoticeUpdate,
    ) -> Result<NoticeWrite> {
        let mut set = doc! { "metadata.updated_at": DateTime::now() };
        let mut unset = Document::new();

        if let Some(ref title) = update.title {
            set.insert("title", title);
        }
        if let Some(ref message) = update.message {
            set.insert("message", message);
        }
        if let Some(category) = update.category {
            set.insert("category", category.as_str());
        }
        for (field, value) in [("start_time", update.start_time), ("end_time", update.end_time)] {
            match value {
                Some(Some(at)) => {
                    set.insert(field, at);
                }
                Some(None) => {
                    unset.insert(field, "");
                }
                None => {}
            }
        }
        if let Some(location) = update.location {
            let encoded = bson::to_bson(&location)
                .map_err(|e| CivicError::Internal(format!("Failed to encode location: {}", e)))?;
            set.insert("location", encoded);
        }
        if let Some(ref images) = update.images {
            set.insert("images", images.clone());
        }

        let mut modifications = doc! { "$set": set };
        if !unset.is_empty() {
            modifications.insert("$unset", unset);
        }

        let mut filter = doc! { "_id": id };
        if let Some(ref window) = window {
            for (field, value) in window_guard(window) {
                filter.insert(field, value);
            }
        }
        if let Some(notice) = self
            .notices
            .find_one_and_update(exclude_deleted(filter), modifications)
            .await?
        {
            return Ok(NoticeWrite::Applied(notice));
        }

        Ok(match self.notices.find_one(doc! { "_id": id }).await? {
            Some(_) => NoticeWrite::Stale,
            None => NoticeWrite::Missing,
        })
    }

    async fn delete_notice(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.notices.delete_one(doc! { "_id": id }).await?.deleted_count == 1)
    }

    async fn find_notices(
        &self,
        filter: &NoticeFilter,
        sort: NoticeSort,
        window: Window,
    ) -> Result<Vec<NoticeDoc>> {
        let near = sort == NoticeSort::Nearest && filter.geo.and_then(|g| g.center()).is_some();
        let order = match sort {
            _ if near => None,
            NoticeSort::Oldest => Some(recency(1)),
            NoticeSort::Newest | NoticeSort::Nearest => Some(recency(-1)),
        };

        self.notices
            .find_many(notice_query(filter, near), Some(find_options(order, window)))
            .await
    }

    async fn count_notices(&self, filter: &NoticeFilter) -> Result<u64> {
        self.notices.count(notice_query(filter, false)).await
    }
}

impl MongoStore {
    /// Upvote-count ordering through an aggregation pipeline
    async fn find_issues_by_upvotes(
        &self,
        filter: &IssueFilter,
        window: Window,
    ) -> Result<Vec<IssueDoc>> {
        use futures_util::TryStreamExt;

        let mut pipeline = vec![
            doc! { "$match": exclude_deleted(issue_query(filter, false)) },
            doc! { "$addFields": { "upvotes_len": { "$size": "$upvotes" } } },
            doc! { "$sort": { "upvotes_len": -1, "metadata.created_at": -1, "_id": -1 } },
            doc! { "$skip": window.skip as i64 },
        ];
        if let Some(limit) = window.limit {
            pipeline.push(doc! { "$limit": limit as i64 });
        }
        pipeline.push(doc! { "$project": { "upvotes_len": 0 } });

        let cursor = self
            .issues
            .inner()
            .aggregate(pipeline)
            .await
            .map_err(|e| CivicError::Database(format!("Aggregate failed: {}", e)))?;
        let raw: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| CivicError::Database(format!("Cursor read failed: {}", e)))?;

        raw.into_iter()
            .map(|d| {
                bson::from_document(d)
                    .map_err(|e| CivicError::Database(format!("Failed to decode issue: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::IssueStatus;
    use crate::geo::{BoundingBox, GeoFilter, GeoPoint, Radius};

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("a.b"), "a\\.b");
        assert_eq!(escape_regex("(x)*"), "\\(x\\)\\*");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn test_issue_query_uses_within_for_counts() {
        let center = GeoPoint::from_lat_lng(40.7128, -74.0060).unwrap();
        let filter = IssueFilter {
            status: Some(IssueStatus::InProgress),
            geo: Some(GeoFilter::Radius(Radius::new(center, 5.0).unwrap())),
            ..Default::default()
        };
        let counted = issue_query(&filter, false);
        assert_eq!(counted.get_str("status").unwrap(), "in_progress");
        assert!(counted.get_document("location").unwrap().contains_key("$geoWithin"));

        let listed = issue_query(&filter, true);
        assert!(listed.get_document("location").unwrap().contains_key("$near"));

        let boxed = IssueFilter {
            geo: Some(GeoFilter::Within(
                BoundingBox::new(-74.1, 40.6, -73.9, 40.8).unwrap(),
            )),
            ..Default::default()
        };
        // $near has no box form; listing and counting share the flat $box
        for near in [false, true] {
            let query = issue_query(&boxed, near);
            let within = query
                .get_document("location")
                .unwrap()
                .get_document("$geoWithin")
                .unwrap();
            assert_eq!(
                within.get_array("$box").unwrap(),
                &vec![bson::bson!([-74.1, 40.6]), bson::bson!([-73.9, 40.8])]
            );
            assert!(!within.contains_key("$geometry"));
        }
    }

    #[test]
    fn test_notice_query_gates_on_end_time() {
        let filter = NoticeFilter {
            active_at: Some(DateTime::from_millis(1_000)),
            ..Default::default()
        };
        let query = notice_query(&filter, false);
        assert_eq!(query.get_array("$or").unwrap().len(), 3);
    }

    #[test]
    fn test_window_guard_matches_cleared_fields_as_null() {
        let guard = window_guard(&NoticeWindow {
            start_time: None,
            end_time: Some(DateTime::from_millis(5_000)),
        });
        assert_eq!(guard.get("start_time"), Some(&Bson::Null));
        assert_eq!(guard.get_datetime("end_time").unwrap(), &DateTime::from_millis(5_000));
    }

    #[test]
    fn test_find_options_window() {
        let options = find_options(Some(recency(-1)), Window::page(2, 20));
        assert_eq!(options.skip, Some(20));
        assert_eq!(options.limit, Some(20));
        let options = find_options(None, Window::page(1, 20));
        assert_eq!(options.skip, None);
    }
}
