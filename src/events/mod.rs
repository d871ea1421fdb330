//! Domain events
//!
//! Every committed mutation produces a [`DomainEvent`]. The
//! [`EventNotifier`] hands it to an [`EventSink`] as either a broadcast or a
//! per-user addressed message. Delivery is best-effort: no acknowledgment,
//! no retry, no ordering across event names.

pub mod notifier;
pub mod sink;

pub use notifier::EventNotifier;
pub use sink::{Audience, BroadcastSink, EventSink, NatsEventSink, Published, RecordingSink};

use serde::Serialize;

use crate::db::schemas::{CommentDoc, IssueDoc, IssueStatus, NoticeDoc, StatusEntry};
use crate::geo::GeoPoint;

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IssueCreated {
    pub id: String,
    pub title: String,
    pub location: GeoPoint,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusChanged {
    #[serde(rename = "issueId")]
    pub issue_id: String,
    pub status: IssueStatus,
    #[serde(rename = "changedBy")]
    pub changed_by: String,
    pub status_description: Option<String>,
    pub status_images: Vec<String>,
}

/// Direct notification to one subscriber of an issue
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IssueStatusUpdate {
    #[serde(rename = "issueId")]
    pub issue_id: String,
    pub title: String,
    pub status: IssueStatus,
    pub status_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpvoteChanged {
    #[serde(rename = "issueId")]
    pub issue_id: String,
    #[serde(rename = "upvotesCount")]
    pub upvotes_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommentSummary {
    pub id: String,
    pub text: String,
    pub author: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewComment {
    #[serde(rename = "issueId")]
    pub issue_id: String,
    pub comment: CommentSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommentDeleted {
    #[serde(rename = "issueId")]
    pub issue_id: String,
    #[serde(rename = "commentId")]
    pub comment_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoticeCreated {
    pub id: String,
    pub title: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoticeUpdated {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoticeDeleted {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoticeUpvoteChanged {
    #[serde(rename = "noticeId")]
    pub notice_id: String,
    #[serde(rename = "upvotesCount")]
    pub upvotes_count: usize,
}

// ============================================================================
// Event enum
// ============================================================================

/// Event emitted after a committed mutation
///
/// Serializes to its payload alone; the name travels separately.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DomainEvent {
    IssueCreated(IssueCreated),
    StatusChanged(StatusChanged),
    IssueStatusUpdate(IssueStatusUpdate),
    UpvoteChanged(UpvoteChanged),
    NewComment(NewComment),
    CommentDeleted(CommentDeleted),
    NoticeCreated(NoticeCreated),
    NoticeUpdated(NoticeUpdated),
    NoticeDeleted(NoticeDeleted),
    NoticeUpvoteChanged(NoticeUpvoteChanged),
}

impl DomainEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::IssueCreated(_) => "issueCreated",
            DomainEvent::StatusChanged(_) => "statusChanged",
            DomainEvent::IssueStatusUpdate(_) => "issueStatusUpdate",
            DomainEvent::UpvoteChanged(_) => "upvoteChanged",
            DomainEvent::NewComment(_) => "newComment",
            DomainEvent::CommentDeleted(_) => "commentDeleted",
            DomainEvent::NoticeCreated(_) => "noticeCreated",
            DomainEvent::NoticeUpdated(_) => "noticeUpdated",
            DomainEvent::NoticeDeleted(_) => "noticeDeleted",
            DomainEvent::NoticeUpvoteChanged(_) => "noticeUpvoteChanged",
        }
    }

    pub fn issue_created(issue: &IssueDoc) -> Self {
        DomainEvent::IssueCreated(IssueCreated {
            id: issue.id.to_hex(),
            title: issue.title.clone(),
            location: issue.location,
            category: issue.category.as_str().to_string(),
        })
    }

    pub fn status_changed(issue: &IssueDoc, entry: &StatusEntry) -> Self {
        DomainEvent::StatusChanged(StatusChanged {
            issue_id: issue.id.to_hex(),
            status: entry.status,
            changed_by: entry.changed_by.to_hex(),
            status_description: entry.status_description.clone(),
            status_images: entry.status_images.clone(),
        })
    }

    pub fn issue_status_update(issue: &IssueDoc, entry: &StatusEntry) -> Self {
        DomainEvent::IssueStatusUpdate(IssueStatusUpdate {
            issue_id: issue.id.to_hex(),
            title: issue.title.clone(),
            status: entry.status,
            status_description: entry.status_description.clone(),
        })
    }

    pub fn new_comment(comment: &CommentDoc) -> Self {
        DomainEvent::NewComment(NewComment {
            issue_id: comment.issue_id.to_hex(),
            comment: CommentSummary {
                id: comment.id.to_hex(),
                text: comment.text.clone(),
                author: comment.author.to_hex(),
                created_at: comment.created_at().to_chrono().to_rfc3339(),
            },
        })
    }

    pub fn comment_deleted(comment: &CommentDoc) -> Self {
        DomainEvent::CommentDeleted(CommentDeleted {
            issue_id: comment.issue_id.to_hex(),
            comment_id: comment.id.to_hex(),
        })
    }

    pub fn notice_created(notice: &NoticeDoc) -> Self {
        DomainEvent::NoticeCreated(NoticeCreated {
            id: notice.id.to_hex(),
            title: notice.title.clone(),
            category: notice.category.as_str().to_string(),
        })
    }

    pub fn notice_updated(notice: &NoticeDoc) -> Self {
        DomainEvent::NoticeUpdated(NoticeUpdated {
            id: notice.id.to_hex(),
            title: notice.title.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::IssueCategory;
    use bson::oid::ObjectId;

    #[test]
    fn test_payload_serializes_without_tag() {
        let issue = IssueDoc::new(
            "Broken light".into(),
            "Streetlight out for a week".into(),
            IssueCategory::Streetlight,
            2,
            ObjectId::new(),
            GeoPoint::from_lat_lng(40.7, -74.0).unwrap(),
            vec![],
        );
        let entry = StatusEntry::new(IssueStatus::InProgress, ObjectId::new(), "x")
            .with_description(Some("Crew assigned today".into()));
        let event = DomainEvent::status_changed(&issue, &entry);
        assert_eq!(event.name(), "statusChanged");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["issueId"], issue.id.to_hex());
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["status_description"], "Crew assigned today");
        assert!(value.get("StatusChanged").is_none());
    }

    #[test]
    fn test_issue_created_carries_geojson_location() {
        let issue = IssueDoc::new(
            "Garbage pile".into(),
            "Bags piling up on the corner".into(),
            IssueCategory::Garbage,
            3,
            ObjectId::new(),
            GeoPoint::from_lat_lng(10.0, 20.0).unwrap(),
            vec![],
        );
        let value = serde_json::to_value(DomainEvent::issue_created(&issue)).unwrap();
        assert_eq!(value["category"], "garbage");
        assert_eq!(value["location"]["type"], "Point");
        assert_eq!(value["location"]["coordinates"][0], 20.0);
    }
}
