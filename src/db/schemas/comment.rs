//! Comment document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for comments
pub const COMMENT_COLLECTION: &str = "comments";

/// Maximum comment length in characters (after trimming)
pub const MAX_COMMENT_CHARS: usize = 1000;

/// Comment on an issue
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommentDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Common metadata (creation time, soft delete)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning issue
    pub issue_id: ObjectId,

    pub author: ObjectId,

    pub text: String,
}

impl CommentDoc {
    pub fn new(issue_id: ObjectId, author: ObjectId, text: String) -> Self {
        Self {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            issue_id,
            author,
            text,
        }
    }

    pub fn created_at(&self) -> DateTime {
        self.metadata.created_at
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.is_deleted
    }
}

impl IntoIndexes for CommentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "issue_id": 1, "metadata.created_at": -1 },
            Some(
                IndexOptions::builder()
                    .name("issue_created".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CommentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
