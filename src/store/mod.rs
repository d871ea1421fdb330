//! Entity store
//!
//! Single authoritative store for issues, comments, and notices. Every
//! mutation is an atomic, single-document operation:
//!
//! - status appends are guarded by "live and not closed"
//! - toggle sets use conditional add/remove, never a read-modify-write of the
//!   whole array
//! - the comment counter moves by atomic increments with a floor of zero
//! - soft deletes flip the flag only on live documents, so a repeated delete
//!   reports that nothing changed
//!
//! Two implementations: [`MemoryStore`] (DashMap, tests and dev mode) and
//! [`MongoStore`].

pub mod memory;
pub mod mongo;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use std::str::FromStr;

use crate::db::schemas::{
    CommentDoc, IssueCategory, IssueDoc, IssueStatus, NoticeCategory, NoticeDoc, StatusEntry,
};
use crate::geo::{GeoFilter, GeoPoint};
use crate::types::{CivicError, Result};

// ============================================================================
// Toggle sets
// ============================================================================

/// Entity holding a toggle set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleTarget {
    Issue(ObjectId),
    Notice(ObjectId),
}

/// Membership set on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleSet {
    Upvotes,
    Subscribers,
}

impl ToggleSet {
    /// Document field holding the set
    pub fn field(&self) -> &'static str {
        match self {
            ToggleSet::Upvotes => "upvotes",
            ToggleSet::Subscribers => "subscribers",
        }
    }
}

impl FromStr for ToggleSet {
    type Err = CivicError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "upvotes" => Ok(ToggleSet::Upvotes),
            "subscribers" => Ok(ToggleSet::Subscribers),
            other => Err(CivicError::Validation(format!("Unknown set: {}", other))),
        }
    }
}

/// Result of a membership flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// True when the user was added, false when removed
    pub added: bool,
    /// Set size after the flip
    pub count: usize,
}

// ============================================================================
// Guarded writes
// ============================================================================

/// Outcome of a status append guarded by "live and still in the status
/// the caller read"
#[derive(Debug, Clone, PartialEq)]
pub enum StatusWrite {
    /// Entry appended; the issue as written
    Applied(IssueDoc),
    /// Issue missing or soft-deleted
    Missing,
    /// Issue already closed
    Closed,
    /// Issue moved to another open status since it was read
    Stale(IssueStatus),
}

/// Notice time window as last read, used to guard window edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeWindow {
    pub start_time: Option<DateTime>,
    pub end_time: Option<DateTime>,
}

impl NoticeWindow {
    pub fn of(notice: &NoticeDoc) -> Self {
        Self {
            start_time: notice.start_time,
            end_time: notice.end_time,
        }
    }
}

/// Outcome of a guarded notice edit
#[derive(Debug, Clone, PartialEq)]
pub enum NoticeWrite {
    /// Edit applied; the notice as written
    Applied(NoticeDoc),
    /// Notice missing or deleted
    Missing,
    /// Window changed since it was read
    Stale,
}

// ============================================================================
// Queries
// ============================================================================

/// Skip/limit slice of a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Window {
    pub fn page(page: u32, per_page: u32) -> Self {
        Self {
            skip: u64::from(page.saturating_sub(1)) * u64::from(per_page),
            limit: Some(u64::from(per_page)),
        }
    }

    pub fn first(limit: u64) -> Self {
        Self {
            skip: 0,
            limit: Some(limit),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.skip as usize);
        match self.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }
}

/// Ordering of issue results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssueSort {
    #[default]
    Newest,
    Oldest,
    MostUpvoted,
    MostCommented,
    /// Ascending distance from the radius center
    Nearest,
}

impl FromStr for IssueSort {
    type Err = CivicError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "newest" | "-createdAt" => Ok(IssueSort::Newest),
            "oldest" | "createdAt" => Ok(IssueSort::Oldest),
            "most_upvoted" => Ok(IssueSort::MostUpvoted),
            "most_commented" | "-commentsCount" => Ok(IssueSort::MostCommented),
            "nearest" => Ok(IssueSort::Nearest),
            other => Err(CivicError::Validation(format!("Invalid sort: {}", other))),
        }
    }
}

/// Ordering of notice results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoticeSort {
    #[default]
    Newest,
    Oldest,
    Nearest,
}

impl FromStr for NoticeSort {
    type Err = CivicError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "newest" | "-createdAt" => Ok(NoticeSort::Newest),
            "oldest" | "createdAt" => Ok(NoticeSort::Oldest),
            "nearest" | "distance" => Ok(NoticeSort::Nearest),
            other => Err(CivicError::Validation(format!("Invalid sort: {}", other))),
        }
    }
}

/// Attribute and spatial filter over live issues
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueFilter {
    pub status: Option<IssueStatus>,
    pub category: Option<IssueCategory>,
    pub author: Option<ObjectId>,
    /// Case-insensitive substring over title and description
    pub search: Option<String>,
    pub geo: Option<GeoFilter>,
}

impl IssueFilter {
    /// In-memory evaluation, shared by the memory store and tests
    pub fn matches(&self, issue: &IssueDoc) -> bool {
        if issue.is_deleted() {
            return false;
        }
        if self.status.is_some_and(|s| s != issue.status) {
            return false;
        }
        if self.category.is_some_and(|c| c != issue.category) {
            return false;
        }
        if self.author.is_some_and(|a| a != issue.author) {
            return false;
        }
        if let Some(ref needle) = self.search {
            let needle = needle.to_lowercase();
            if !issue.title.to_lowercase().contains(&needle)
                && !issue.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        match self.geo {
            Some(ref geo) => geo.contains(&issue.location),
            None => true,
        }
    }
}

/// Filter over stored notices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoticeFilter {
    pub category: Option<NoticeCategory>,
    pub created_by: Option<ObjectId>,
    pub geo: Option<GeoFilter>,
    /// Only notices with no end or an end at/after this instant
    pub active_at: Option<DateTime>,
}

impl NoticeFilter {
    pub fn matches(&self, notice: &NoticeDoc) -> bool {
        if notice.metadata.is_deleted {
            return false;
        }
        if self.category.is_some_and(|c| c != notice.category) {
            return false;
        }
        if self.created_by.is_some_and(|c| c != notice.created_by) {
            return false;
        }
        if self.active_at.is_some_and(|now| !notice.is_active(now)) {
            return false;
        }
        match self.geo {
            Some(ref geo) => geo.contains(&notice.location),
            None => true,
        }
    }
}

/// Field-level notice changes; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoticeUpdate {
    pub title: Option<String>,
    pub message: Option<String>,
    pub category: Option<NoticeCategory>,
    /// `Some(None)` clears the start time
    pub start_time: Option<Option<DateTime>>,
    /// `Some(None)` clears the end time
    pub end_time: Option<Option<DateTime>>,
    pub location: Option<GeoPoint>,
    pub images: Option<Vec<String>>,
}

impl NoticeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == NoticeUpdate::default()
    }

    /// Whether the edit touches the start or end time
    pub fn touches_window(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    pub(crate) fn apply_to(&self, notice: &mut NoticeDoc) {
        if let Some(ref title) = self.title {
            notice.title = title.clone();
        }
        if let Some(ref message) = self.message {
            notice.message = message.clone();
        }
        if let Some(category) = self.category {
            notice.category = category;
        }
        if let Some(start) = self.start_time {
            notice.start_time = start;
        }
        if let Some(end) = self.end_time {
            notice.end_time = end;
        }
        if let Some(location) = self.location {
            notice.location = location;
        }
        if let Some(ref images) = self.images {
            notice.images = images.clone();
        }
        notice.metadata.touch();
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Persistence for issues, comments, and notices
///
/// Reads hide soft-deleted records unless the method says otherwise.
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ---- issues ----

    async fn insert_issue(&self, issue: IssueDoc) -> Result<IssueDoc>;

    async fn get_issue(&self, id: &ObjectId) -> Result<Option<IssueDoc>>;

    /// Append a history entry and set the status, only while the issue is
    /// live and still in `expected`; a closed issue always reports `Closed`
    async fn append_status(
        &self,
        id: &ObjectId,
        expected: IssueStatus,
        entry: StatusEntry,
    ) -> Result<StatusWrite>;

    /// Flip the soft-delete flag; false when the issue was missing or
    /// already deleted
    async fn soft_delete_issue(&self, id: &ObjectId, by: &ObjectId) -> Result<bool>;

    async fn find_issues(
        &self,
        filter: &IssueFilter,
        sort: IssueSort,
        window: Window,
    ) -> Result<Vec<IssueDoc>>;

    async fn count_issues(&self, filter: &IssueFilter) -> Result<u64>;

    // ---- toggle sets ----

    /// Atomically add or remove `user`; `None` when the target is missing
    /// or soft-deleted
    async fn toggle_member(
        &self,
        target: ToggleTarget,
        set: ToggleSet,
        user: &ObjectId,
    ) -> Result<Option<ToggleOutcome>>;

    // ---- comments ----

    async fn insert_comment(&self, comment: CommentDoc) -> Result<CommentDoc>;

    async fn get_comment(&self, id: &ObjectId) -> Result<Option<CommentDoc>>;

    /// Live comments of an issue, newest first
    async fn list_comments(&self, issue_id: &ObjectId, window: Window) -> Result<Vec<CommentDoc>>;

    async fn count_comments(&self, issue_id: &ObjectId) -> Result<u64>;

    /// Flip the soft-delete flag; false when already deleted or missing
    async fn soft_delete_comment(&self, id: &ObjectId, by: &ObjectId) -> Result<bool>;

    /// Clear the soft-delete flag; false when the comment is missing or live
    async fn restore_comment(&self, id: &ObjectId) -> Result<bool>;

    /// Atomically add `delta` to the comment counter, never going below zero
    async fn adjust_comment_count(&self, issue_id: &ObjectId, delta: i64) -> Result<()>;

    // ---- notices ----

    async fn insert_notice(&self, notice: NoticeDoc) -> Result<NoticeDoc>;

    async fn get_notice(&self, id: &ObjectId) -> Result<Option<NoticeDoc>>;

    /// Field update, last write wins; with `window` set it applies only
    /// while the stored start/end times still equal it
    async fn update_notice(
        &self,
        id: &ObjectId,
        window: Option<NoticeWindow>,
        update: &NoticeUpdate,
    ) -> Result<NoticeWrite>;

    /// Physically remove a notice; false when it did not exist
    async fn delete_notice(&self, id: &ObjectId) -> Result<bool>;

    async fn find_notices(
        &self,
        filter: &NoticeFilter,
        sort: NoticeSort,
        window: Window,
    ) -> Result<Vec<NoticeDoc>>;

    async fn count_notices(&self, filter: &NoticeFilter) -> Result<u64>;
}
