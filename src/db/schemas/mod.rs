//! Database schemas for Community Sense
//!
//! Defines MongoDB document structures for issues, comments, and notices.
//! Users are owned by the authentication collaborator and referenced by id.

mod comment;
mod issue;
mod metadata;
mod notice;

pub use comment::{CommentDoc, COMMENT_COLLECTION, MAX_COMMENT_CHARS};
pub use issue::{
    IssueCategory, IssueDoc, IssueStatus, StatusEntry, StatusHistory, ISSUE_COLLECTION,
};
pub use metadata::Metadata;
pub use notice::{validate_window, NoticeCategory, NoticeDoc, NOTICE_COLLECTION};
