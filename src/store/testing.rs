//! Test store with scripted faults and interleavings
//!
//! Wraps a [`MemoryStore`] and, when armed, fails counter decrements or
//! lands a competing write just before a guarded one.

use async_trait::async_trait;
use bson::oid::ObjectId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{
    EntityStore, IssueFilter, IssueSort, MemoryStore, NoticeFilter, NoticeSort, NoticeUpdate,
    NoticeWindow, NoticeWrite, StatusWrite, ToggleOutcome, ToggleSet, ToggleTarget, Window,
};
use crate::db::schemas::{CommentDoc, IssueDoc, IssueStatus, NoticeDoc, StatusEntry};
use crate::types::{CivicError, Result};

#[derive(Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    fail_decrement: AtomicBool,
    before_append: Mutex<Option<StatusEntry>>,
    before_notice_update: Mutex<Option<NoticeUpdate>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make negative counter adjustments fail until disarmed
    pub fn fail_decrements(&self, fail: bool) {
        self.fail_decrement.store(fail, Ordering::SeqCst);
    }

    /// Commit `entry` just before the next status append
    pub fn interleave_status(&self, entry: StatusEntry) {
        *self.before_append.lock().unwrap() = Some(entry);
    }

    /// Commit `update` just before the next notice edit
    pub fn interleave_notice_update(&self, update: NoticeUpdate) {
        *self.before_notice_update.lock().unwrap() = Some(update);
    }
}

#[async_trait]
impl EntityStore for ScriptedStore {
    async fn insert_issue(&self, issue: IssueDoc) -> Result<IssueDoc> {
        self.inner.insert_issue(issue).await
    }

    async fn get_issue(&self, id: &ObjectId) -> Result<Option<IssueDoc>> {
        self.inner.get_issue(id).await
    }

    async fn append_status(
        &self,
        id: &ObjectId,
        expected: IssueStatus,
        entry: StatusEntry,
    ) -> Result<StatusWrite> {
        let competing = self.before_append.lock().unwrap().take();
        if let Some(competing) = competing {
            if let Some(current) = self.inner.issue_any(id) {
                self.inner
                    .append_status(id, current.status, competing)
                    .await?;
            }
        }
        self.inner.append_status(id, expected, entry).await
    }

    async fn soft_delete_issue(&self, id: &ObjectId, by: &ObjectId) -> Result<bool> {
        self.inner.soft_delete_issue(id, by).await
    }

    async fn find_issues(
        &self,
        filter: &IssueFilter,
        sort: IssueSort,
        window: Window,
    ) -> Result<Vec<IssueDoc>> {
        self.inner.find_issues(filter, sort, window).await
    }

    async fn count_issues(&self, filter: &IssueFilter) -> Result<u64> {
        self.inner.count_issues(filter).await
    }

    async fn toggle_member(
        &self,
        target: ToggleTarget,
        set: ToggleSet,
        user: &ObjectId,
    ) -> Result<Option<ToggleOutcome>> {
        self.inner.toggle_member(target, set, user).await
    }

    async fn insert_comment(&self, comment: CommentDoc) -> Result<CommentDoc> {
        self.inner.insert_comment(comment).await
    }

    async fn get_comment(&self, id: &ObjectId) -> Result<Option<CommentDoc>> {
        self.inner.get_comment(id).await
    }

    async fn list_comments(&self, issue_id: &ObjectId, window: Window) -> Result<Vec<CommentDoc>> {
        self.inner.list_comments(issue_id, window).await
    }

    async fn count_comments(&self, issue_id: &ObjectId) -> Result<u64> {
        self.inner.count_comments(issue_id).await
    }

    async fn soft_delete_comment(&self, id: &ObjectId, by: &ObjectId) -> Result<bool> {
        self.inner.soft_delete_comment(id, by).await
    }

    async fn restore_comment(&self, id: &ObjectId) -> Result<bool> {
        self.inner.restore_comment(id).await
    }

    async fn adjust_comment_count(&self, issue_id: &ObjectId, delta: i64) -> Result<()> {
        if delta < 0 && self.fail_decrement.load(Ordering::SeqCst) {
            return Err(CivicError::Database("transient".to_string()));
        }
        self.inner.adjust_comment_count(issue_id, delta).await
    }

    async fn insert_notice(&self, notice: NoticeDoc) -> Result<NoticeDoc> {
        self.inner.insert_notice(notice).await
    }

    async fn get_notice(&self, id: &ObjectId) -> Result<Option<NoticeDoc>> {
        self.inner.get_notice(id).await
    }

    async fn update_notice(
        &self,
        id: &ObjectId,
        window: Option<NoticeWindow>,
        update: &NoticeUpdate,
    ) -> Result<NoticeWrite> {
        let competing = self.before_notice_update.lock().unwrap().take();
        if let Some(competing) = competing {
            self.inner.update_notice(id, None, &competing).await?;
        }
        self.inner.update_notice(id, window, update).await
    }

    async fn delete_notice(&self, id: &ObjectId) -> Result<bool> {
        self.inner.delete_notice(id).await
    }

    async fn find_notices(
        &self,
        filter: &NoticeFilter,
        sort: NoticeSort,
        window: Window,
    ) -> Result<Vec<NoticeDoc>> {
        self.inner.find_notices(filter, sort, window).await
    }

    async fn count_notices(&self, filter: &NoticeFilter) -> Result<u64> {
        self.inner.count_notices(filter).await
    }
}
