//! Issue document schema
//!
//! A reported civic problem with a point location, a moderated status, and
//! an append-only status history.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::geo::GeoPoint;
use crate::types::CivicError;

/// Collection name for issues
pub const ISSUE_COLLECTION: &str = "issues";

/// Issue category
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Pothole,
    Garbage,
    WaterLeak,
    Streetlight,
    Traffic,
    #[default]
    Other,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Pothole => "pothole",
            IssueCategory::Garbage => "garbage",
            IssueCategory::WaterLeak => "water_leak",
            IssueCategory::Streetlight => "streetlight",
            IssueCategory::Traffic => "traffic",
            IssueCategory::Other => "other",
        }
    }
}

impl FromStr for IssueCategory {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pothole" => Ok(IssueCategory::Pothole),
            "garbage" => Ok(IssueCategory::Garbage),
            "water_leak" => Ok(IssueCategory::WaterLeak),
            "streetlight" => Ok(IssueCategory::Streetlight),
            "traffic" => Ok(IssueCategory::Traffic),
            "other" => Ok(IssueCategory::Other),
            other => Err(CivicError::Validation(format!("Invalid category: {}", other))),
        }
    }
}

/// Issue lifecycle status, in canonical order
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Reported,
    Acknowledged,
    InProgress,
    Resolved,
    /// Terminal: no transition leaves this state
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Reported => "reported",
            IssueStatus::Acknowledged => "acknowledged",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Closed)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reported" => Ok(IssueStatus::Reported),
            "acknowledged" => Ok(IssueStatus::Acknowledged),
            "in_progress" => Ok(IssueStatus::InProgress),
            "resolved" => Ok(IssueStatus::Resolved),
            "closed" => Ok(IssueStatus::Closed),
            other => Err(CivicError::Validation(format!("Invalid status: {}", other))),
        }
    }
}

/// One entry of an issue's status log
///
/// Entries are immutable once appended; every entry carries its own id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub status: IssueStatus,

    #[serde(rename = "changedBy")]
    pub changed_by: ObjectId,

    pub at: DateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_images: Vec<String>,
}

impl StatusEntry {
    pub fn new(status: IssueStatus, changed_by: ObjectId, note: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            status,
            changed_by,
            at: DateTime::now(),
            note: Some(note.into()),
            status_description: None,
            status_images: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.status_description = description;
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.status_images = images;
        self
    }
}

/// Append-only, insertion-ordered status log
///
/// There is no way to edit or remove an entry through this type; the only
/// mutation is [`StatusHistory::append`], reserved to the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct StatusHistory(Vec<StatusEntry>);

impl StatusHistory {
    pub fn starting_with(entry: StatusEntry) -> Self {
        Self(vec![entry])
    }

    pub fn latest(&self) -> Option<&StatusEntry> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn append(&mut self, entry: StatusEntry) {
        self.0.push(entry);
    }
}

/// Issue document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IssueDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Common metadata (creation time, soft delete)
    #[serde(default)]
    pub metadata: Metadata,

    pub title: String,

    pub description: String,

    pub category: IssueCategory,

    /// 1 (minor) to 5 (critical)
    pub severity: u8,

    /// Image references supplied at report time
    #[serde(default)]
    pub images: Vec<String>,

    /// Reporting user
    pub author: ObjectId,

    pub location: GeoPoint,

    pub status: IssueStatus,

    pub status_history: StatusHistory,

    /// Users who upvoted; each id at most once
    #[serde(default)]
    pub upvotes: Vec<ObjectId>,

    /// Users notified on status changes; each id at most once
    #[serde(default)]
    pub subscribers: Vec<ObjectId>,

    /// Count of non-deleted comments
    #[serde(default)]
    pub comments_count: i64,
}

impl IssueDoc {
    /// Create a new issue with its synthetic "reported" history entry
    pub fn new(
        title: String,
        description: String,
        category: IssueCategory,
        severity: u8,
        author: ObjectId,
        location: GeoPoint,
        images: Vec<String>,
    ) -> Self {
        let metadata = Metadata::new();
        let mut created = StatusEntry::new(IssueStatus::Reported, author, "Issue created");
        created.at = metadata.created_at;
        Self {
            id: ObjectId::new(),
            metadata,
            title,
            description,
            category,
            severity,
            images,
            author,
            location,
            status: IssueStatus::Reported,
            status_history: StatusHistory::starting_with(created),
            upvotes: Vec::new(),
            subscribers: Vec::new(),
            comments_count: 0,
        }
    }

    pub fn created_at(&self) -> DateTime {
        self.metadata.created_at
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.is_deleted
    }
}

impl IntoIndexes for IssueDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Geospatial index for radius / box queries
            (
                doc! { "location": "2dsphere" },
                Some(
                    IndexOptions::builder()
                        .name("location_2dsphere".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("status_created".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "category": 1, "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("category_status".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "author": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("author_created".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for IssueDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
