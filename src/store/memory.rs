//! In-memory entity store
//!
//! DashMap-backed. Every mutation runs under the shard write lock of the
//! one entry it touches, which makes it atomic per document the same way a
//! single-document MongoDB update is.

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use dashmap::DashMap;
use std::cmp::Ordering;
use tracing::debug;

use super::{
    EntityStore, IssueFilter, IssueSort, NoticeFilter, NoticeSort, NoticeUpdate, NoticeWindow,
    NoticeWrite, StatusWrite, ToggleOutcome, ToggleSet, ToggleTarget, Window,
};
use crate::db::schemas::{CommentDoc, IssueDoc, IssueStatus, NoticeDoc, StatusEntry};
use crate::geo::GeoPoint;
use crate::types::{CivicError, Result};

/// In-memory store with concurrent access
#[derive(Default)]
pub struct MemoryStore {
    issues: DashMap<ObjectId, IssueDoc>,
    comments: DashMap<ObjectId, CommentDoc>,
    notices: DashMap<ObjectId, NoticeDoc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw issue including soft-deleted records
    pub fn issue_any(&self, id: &ObjectId) -> Option<IssueDoc> {
        self.issues.get(id).map(|e| e.value().clone())
    }
}

/// Newest first, id as tie-break so pages are deterministic
fn newest_first(a_at: DateTime, a_id: &ObjectId, b_at: DateTime, b_id: &ObjectId) -> Ordering {
    b_at.cmp(&a_at).then_with(|| b_id.cmp(a_id))
}

fn by_distance(center: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> Ordering {
    center
        .distance_km(a)
        .partial_cmp(&center.distance_km(b))
        .unwrap_or(Ordering::Equal)
}

/// Flip `user` in a list-shaped set, keeping it duplicate-free
fn flip(members: &mut Vec<ObjectId>, user: &ObjectId) -> ToggleOutcome {
    let before = members.len();
    members.retain(|m| m != user);
    let added = members.len() == before;
    if added {
        members.push(*user);
    }
    ToggleOutcome {
        added,
        count: members.len(),
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_issue(&self, issue: IssueDoc) -> Result<IssueDoc> {
        self.issues.insert(issue.id, issue.clone());
        Ok(issue)
    }

    async fn get_issue(&self, id: &ObjectId) -> Result<Option<IssueDoc>> {
        Ok(self
            .issues
            .get(id)
            .filter(|e| !e.is_deleted())
            .map(|e| e.value().clone()))
    }

    async fn append_status(
        &self,
        id: &ObjectId,
        expected: IssueStatus,
        entry: StatusEntry,
    ) -> Result<StatusWrite> {
        let Some(mut issue) = self.issues.get_mut(id) else {
            return Ok(StatusWrite::Missing);
        };
        if issue.is_deleted() {
            return Ok(StatusWrite::Missing);
        }
        if issue.status.is_terminal() {
            return Ok(StatusWrite::Closed);
        }
        if issue.status != expected {
            return Ok(StatusWrite::Stale(issue.status));
        }
        issue.status = entry.status;
        issue.metadata.updated_at = entry.at;
        issue.status_history.append(entry);
        Ok(StatusWrite::Applied(issue.value().clone()))
    }

    async fn soft_delete_issue(&self, id: &ObjectId, by: &ObjectId) -> Result<bool> {
        match self.issues.get_mut(id) {
            Some(mut issue) if !issue.is_deleted() => {
                issue.metadata.mark_deleted(*by, DateTime::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_issues(
        &self,
        filter: &IssueFilter,
        sort: IssueSort,
        window: Window,
    ) -> Result<Vec<IssueDoc>> {
        let mut matched: Vec<IssueDoc> = self
            .issues
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();

        let center = filter.geo.as_ref().and_then(|g| g.center());
        matched.sort_by(|a, b| {
            let recency = newest_first(a.created_at(), &a.id, b.created_at(), &b.id);
            match (sort, center) {
                (IssueSort::Nearest, Some(ref c)) => {
                    by_distance(c, &a.location, &b.location).then(recency)
                }
                (IssueSort::Oldest, _) => recency.reverse(),
                (IssueSort::MostUpvoted, _) => {
                    b.upvotes.len().cmp(&a.upvotes.len()).then(recency)
                }
                (IssueSort::MostCommented, _) => {
                    b.comments_count.cmp(&a.comments_count).then(recency)
                }
                _ => recency,
            }
        });

        Ok(window.apply(matched))
    }

    async fn count_issues(&self, filter: &IssueFilter) -> Result<u64> {
        Ok(self.issues.iter().filter(|e| filter.matches(e.value())).count() as u64)
    }

    async fn toggle_member(
        &self,
        target: ToggleTarget,
        set: ToggleSet,
        user: &ObjectId,
    ) -> Result<Option<ToggleOutcome>> {
        match target {
            ToggleTarget::Issue(id) => {
                let Some(mut issue) = self.issues.get_mut(&id) else {
                    return Ok(None);
                };
                if issue.is_deleted() {
                    return Ok(None);
                }
                let members = match set {
                    ToggleSet::Upvotes => &mut issue.upvotes,
                    ToggleSet::Subscribers => &mut issue.subscribers,
                };
                Ok(Some(flip(members, user)))
            }
            ToggleTarget::Notice(id) => {
                if set != ToggleSet::Upvotes {
                    return Err(CivicError::Validation(
                        "Notices only support upvotes".to_string(),
                    ));
                }
                let Some(mut notice) = self.notices.get_mut(&id) else {
                    return Ok(None);
                };
                if notice.metadata.is_deleted {
                    return Ok(None);
                }
                Ok(Some(flip(&mut notice.upvotes, user)))
            }
        }
    }

    async fn insert_comment(&self, comment: CommentDoc) -> Result<CommentDoc> {
        self.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: &ObjectId) -> Result<Option<CommentDoc>> {
        Ok(self
            .comments
            .get(id)
            .filter(|e| !e.is_deleted())
            .map(|e| e.value().clone()))
    }

    async fn list_comments(&self, issue_id: &ObjectId, window: Window) -> Result<Vec<CommentDoc>> {
        let mut matched: Vec<CommentDoc> = self
            .comments
            .iter()
            .filter(|e| e.issue_id == *issue_id && !e.is_deleted())
            .map(|e| e.value().clone())
            .collect();
        matched.sort_by(|a, b| newest_first(a.created_at(), &a.id, b.created_at(), &b.id));
        Ok(window.apply(matched))
    }

    async fn count_comments(&self, issue_id: &ObjectId) -> Result<u64> {
        Ok(self
            .comments
            .iter()
            .filter(|e| e.issue_id == *issue_id && !e.is_deleted())
            .count() as u64)
    }

    async fn soft_delete_comment(&self, id: &ObjectId, by: &ObjectId) -> Result<bool> {
        match self.comments.get_mut(id) {
            Some(mut comment) if !comment.is_deleted() => {
                comment.metadata.mark_deleted(*by, DateTime::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_comment(&self, id: &ObjectId) -> Result<bool> {
        match self.comments.get_mut(id) {
            Some(mut comment) if comment.is_deleted() => {
                comment.metadata.restore();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn adjust_comment_count(&self, issue_id: &ObjectId, delta: i64) -> Result<()> {
        // Counter follows comments even on soft-deleted issues
        if let Some(mut issue) = self.issues.get_mut(issue_id) {
            issue.comments_count = (issue.comments_count + delta).max(0);
            debug!(issue_id = %issue_id, count = issue.comments_count, "Comment count adjusted");
        }
        Ok(())
    }

    async fn insert_notice(&self, notice: NoticeDoc) -> Result<NoticeDoc> {
        self.notices.insert(notice.id, notice.clone());
        Ok(notice)
    }

    async fn get_notice(&self, id: &ObjectId) -> Result<Option<NoticeDoc>> {
        Ok(self
            .notices
            .get(id)
            .filter(|e| !e.metadata.is_deleted)
            .map(|e| e.value().clone()))
    }

    async fn update_notice(
        &self,
        id: &ObjectId,
        window: Option<NoticeWindow>,
        update: &NoticeUpdate,
    ) -> Result<NoticeWrite> {
        let Some(mut notice) = self.notices.get_mut(id) else {
            return Ok(NoticeWrite::Missing);
        };
        if notice.metadata.is_deleted {
            return Ok(NoticeWrite::Missing);
        }
        if window.is_some_and(|w| w != NoticeWindow::of(&notice)) {
            return Ok(NoticeWrite::Stale);
        }
        update.apply_to(&mut notice);
        Ok(NoticeWrite::Applied(notice.value().clone()))
    }

    async fn delete_notice(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.notices.remove(id).is_some())
    }

    async fn find_notices(
        &self,
        filter: &NoticeFilter,
        sort: NoticeSort,
        window: Window,
    ) -> Result<Vec<NoticeDoc>> {
        let mut matched: Vec<NoticeDoc> = self
            .notices
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();

        let center = filter.geo.as_ref().and_then(|g| g.center());
        matched.sort_by(|a, b| {
            let recency = newest_first(a.created_at(), &a.id, b.created_at(), &b.id);
            match (sort, center) {
                (NoticeSort::Nearest, Some(ref c)) => {
                    by_distance(c, &a.location, &b.location).then(recency)
                }
                (NoticeSort::Oldest, _) => recency.reverse(),
                _ => recency,
            }
        });

        Ok(window.apply(matched))
    }

    async fn count_notices(&self, filter: &NoticeFilter) -> Result<u64> {
        Ok(self.notices.iter().filter(|e| filter.matches(e.value())).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{IssueCategory, NoticeCategory};
    use std::sync::Arc;

    fn issue_at(lat: f64, lng: f64) -> IssueDoc {
        IssueDoc::new(
            "Leaking hydrant".into(),
            "Water pooling across the road".into(),
            IssueCategory::WaterLeak,
            3,
            ObjectId::new(),
            GeoPoint::from_lat_lng(lat, lng).unwrap(),
            vec![],
        )
    }

    #[test]
    fn test_flip_is_set_semantics() {
        let user = ObjectId::new();
        let mut members = vec![];
        assert_eq!(flip(&mut members, &user), ToggleOutcome { added: true, count: 1 });
        assert_eq!(flip(&mut members, &user), ToggleOutcome { added: false, count: 0 });

        // A duplicated legacy entry is collapsed on removal
        let mut members = vec![user, user];
        assert_eq!(flip(&mut members, &user), ToggleOutcome { added: false, count: 0 });
    }

    #[tokio::test]
    async fn test_append_status_guards_closed_and_deleted() {
        let store = MemoryStore::new();
        let issue = store.insert_issue(issue_at(1.0, 1.0)).await.unwrap();
        let author = issue.author;

        let closed = StatusEntry::new(IssueStatus::Closed, author, "close");
        assert!(matches!(
            store.append_status(&issue.id, IssueStatus::Reported, closed).await.unwrap(),
            StatusWrite::Applied(_)
        ));

        let again = StatusEntry::new(IssueStatus::Reported, author, "reopen");
        assert_eq!(
            store.append_status(&issue.id, IssueStatus::Closed, again).await.unwrap(),
            StatusWrite::Closed
        );
        assert_eq!(store.issue_any(&issue.id).unwrap().status_history.len(), 2);

        let other = store.insert_issue(issue_at(1.0, 1.0)).await.unwrap();
        assert!(store.soft_delete_issue(&other.id, &other.author).await.unwrap());
        let entry = StatusEntry::new(IssueStatus::Acknowledged, author, "ack");
        assert_eq!(
            store.append_status(&other.id, IssueStatus::Reported, entry).await.unwrap(),
            StatusWrite::Missing
        );
    }

    #[tokio::test]
    async fn test_append_status_rejects_stale_expected_status() {
        let store = MemoryStore::new();
        let issue = store.insert_issue(issue_at(1.0, 1.0)).await.unwrap();
        let author = issue.author;

        let ack = StatusEntry::new(IssueStatus::Acknowledged, author, "ack");
        assert!(matches!(
            store.append_status(&issue.id, IssueStatus::Reported, ack).await.unwrap(),
            StatusWrite::Applied(_)
        ));

        // A writer that still believes the issue is reported loses
        let late = StatusEntry::new(IssueStatus::InProgress, author, "from reported");
        assert_eq!(
            store.append_status(&issue.id, IssueStatus::Reported, late).await.unwrap(),
            StatusWrite::Stale(IssueStatus::Acknowledged)
        );
        let stored = store.issue_any(&issue.id).unwrap();
        assert_eq!(stored.status, IssueStatus::Acknowledged);
        assert_eq!(stored.status_history.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_comment_only_undoes_deleted() {
        let store = MemoryStore::new();
        let issue = store.insert_issue(issue_at(1.0, 1.0)).await.unwrap();
        let comment = store
            .insert_comment(CommentDoc::new(issue.id, issue.author, "Fixed?".into()))
            .await
            .unwrap();

        assert!(!store.restore_comment(&comment.id).await.unwrap());
        assert!(store.soft_delete_comment(&comment.id, &issue.author).await.unwrap());
        assert!(store.restore_comment(&comment.id).await.unwrap());

        let restored = store.get_comment(&comment.id).await.unwrap().unwrap();
        assert_eq!(restored.metadata.deleted_by, None);
        assert_eq!(restored.metadata.deleted_at, None);
        assert!(!store.restore_comment(&ObjectId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_notice_guards_window() {
        let store = MemoryStore::new();
        let notice = NoticeDoc {
            id: ObjectId::new(),
            metadata: crate::db::schemas::Metadata::new(),
            title: "Road works".into(),
            message: "Lane closures all week long".into(),
            category: NoticeCategory::Road,
            start_time: Some(DateTime::from_millis(1_000)),
            end_time: Some(DateTime::from_millis(5_000)),
            images: vec![],
            location: GeoPoint::from_lat_lng(1.0, 1.0).unwrap(),
            created_by: ObjectId::new(),
            upvotes: vec![],
        };
        let notice = store.insert_notice(notice).await.unwrap();
        let read = NoticeWindow::of(&notice);

        let extend = NoticeUpdate {
            end_time: Some(Some(DateTime::from_millis(9_000))),
            ..Default::default()
        };
        assert!(matches!(
            store.update_notice(&notice.id, Some(read), &extend).await.unwrap(),
            NoticeWrite::Applied(_)
        ));

        let shift = NoticeUpdate {
            start_time: Some(Some(DateTime::from_millis(4_000))),
            ..Default::default()
        };
        assert_eq!(
            store.update_notice(&notice.id, Some(read), &shift).await.unwrap(),
            NoticeWrite::Stale
        );

        // Edits that leave the window alone are not guarded
        let retitle = NoticeUpdate {
            title: Some("Road works ahead".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_notice(&notice.id, None, &retitle).await.unwrap(),
            NoticeWrite::Applied(_)
        ));
        assert_eq!(
            store.update_notice(&ObjectId::new(), None, &retitle).await.unwrap(),
            NoticeWrite::Missing
        );
    }

    #[tokio::test]
    async fn test_concurrent_toggles_do_not_lose_updates() {
        let store = Arc::new(MemoryStore::new());
        let issue = store.insert_issue(issue_at(1.0, 1.0)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let id = issue.id;
            handles.push(tokio::spawn(async move {
                store
                    .toggle_member(ToggleTarget::Issue(id), ToggleSet::Upvotes, &ObjectId::new())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.issue_any(&issue.id).unwrap().upvotes.len(), 32);
    }

    #[tokio::test]
    async fn test_comment_count_floor() {
        let store = MemoryStore::new();
        let issue = store.insert_issue(issue_at(1.0, 1.0)).await.unwrap();
        store.adjust_comment_count(&issue.id, 1).await.unwrap();
        store.adjust_comment_count(&issue.id, -1).await.unwrap();
        store.adjust_comment_count(&issue.id, -1).await.unwrap();
        assert_eq!(store.issue_any(&issue.id).unwrap().comments_count, 0);
    }

    #[tokio::test]
    async fn test_nearest_sort_uses_radius_center() {
        let store = MemoryStore::new();
        let far = store.insert_issue(issue_at(40.74, -74.0060)).await.unwrap();
        let near = store.insert_issue(issue_at(40.72, -74.0060)).await.unwrap();
        let center = GeoPoint::from_lat_lng(40.7128, -74.0060).unwrap();
        let filter = IssueFilter {
            geo: Some(crate::geo::GeoFilter::Radius(
                crate::geo::Radius::new(center, 5.0).unwrap(),
            )),
            ..Default::default()
        };

        let found = store
            .find_issues(&filter, IssueSort::Nearest, Window::all())
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
    }
}
