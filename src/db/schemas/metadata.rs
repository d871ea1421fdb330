//! Common metadata for all documents
//!
//! Tracks creation, update, and soft deletion.

use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Metadata {
    /// Whether this document has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    /// Who soft-deleted the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<ObjectId>,

    /// When the document was last updated
    pub updated_at: DateTime,

    /// When the document was created
    pub created_at: DateTime,
}

impl Metadata {
    /// Create new metadata with current timestamp
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            updated_at: now,
            created_at: now,
        }
    }

    /// Flip the soft-delete flag and stamp the deleter
    pub fn mark_deleted(&mut self, by: ObjectId, at: DateTime) {
        self.is_deleted = true;
        self.deleted_by = Some(by);
        self.deleted_at = Some(at);
        self.updated_at = at;
    }

    /// Undo a soft delete
    pub fn restore(&mut self) {
        self.is_deleted = false;
        self.deleted_by = None;
        self.deleted_at = None;
        self.updated_at = DateTime::now();
    }

    pub fn touch(&mut self) {
        self.updated_at = DateTime::now();
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}
