//! Notice document schema
//!
//! Location-scoped announcements posted by authorities, optionally bounded
//! by a time window. Only `end_time` gates visibility.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::geo::GeoPoint;
use crate::types::CivicError;

/// Collection name for notices
pub const NOTICE_COLLECTION: &str = "notices";

/// Notice category
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoticeCategory {
    Water,
    Road,
    Electricity,
    Sanitation,
    #[default]
    Other,
}

impl NoticeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeCategory::Water => "water",
            NoticeCategory::Road => "road",
            NoticeCategory::Electricity => "electricity",
            NoticeCategory::Sanitation => "sanitation",
            NoticeCategory::Other => "other",
        }
    }
}

impl FromStr for NoticeCategory {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "water" => Ok(NoticeCategory::Water),
            "road" => Ok(NoticeCategory::Road),
            "electricity" => Ok(NoticeCategory::Electricity),
            "sanitation" => Ok(NoticeCategory::Sanitation),
            "other" => Ok(NoticeCategory::Other),
            other => Err(CivicError::Validation(format!(
                "Invalid notice category: {}",
                other
            ))),
        }
    }
}

/// Notice document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NoticeDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default)]
    pub metadata: Metadata,

    pub title: String,

    pub message: String,

    pub category: NoticeCategory,

    /// Informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime>,

    /// Notice stops being listed after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime>,

    #[serde(default)]
    pub images: Vec<String>,

    pub location: GeoPoint,

    /// Authority that posted the notice
    pub created_by: ObjectId,

    #[serde(default)]
    pub upvotes: Vec<ObjectId>,
}

impl NoticeDoc {
    pub fn created_at(&self) -> DateTime {
        self.metadata.created_at
    }

    /// A notice is listed while it has no end or its end is not yet past
    pub fn is_active(&self, now: DateTime) -> bool {
        match self.end_time {
            None => true,
            Some(end) => end >= now,
        }
    }
}

/// Reject windows whose end is not strictly after the start
pub fn validate_window(
    start_time: Option<DateTime>,
    end_time: Option<DateTime>,
) -> Result<(), CivicError> {
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            return Err(CivicError::Validation(
                "End time must be after start time".to_string(),
            ));
        }
    }
    Ok(())
}

impl IntoIndexes for NoticeDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "location": "2dsphere" },
                Some(
                    IndexOptions::builder()
                        .name("location_2dsphere".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "category": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("category_created".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "created_by": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("creator_created".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for NoticeDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime {
        DateTime::from_millis(ms)
    }

    #[test]
    fn test_window_validation() {
        assert!(validate_window(None, None).is_ok());
        assert!(validate_window(Some(at(10)), None).is_ok());
        assert!(validate_window(None, Some(at(10))).is_ok());
        assert!(validate_window(Some(at(10)), Some(at(20))).is_ok());
        assert!(validate_window(Some(at(10)), Some(at(10))).is_err());
        assert!(validate_window(Some(at(20)), Some(at(10))).is_err());
    }

    #[test]
    fn test_active_ignores_start_time() {
        let mut notice = NoticeDoc {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            title: "Water outage".into(),
            message: "Mains repair on 5th street".into(),
            category: NoticeCategory::Water,
            start_time: Some(at(5_000)),
            end_time: None,
            images: vec![],
            location: GeoPoint::from_lat_lng(0.0, 0.0).unwrap(),
            created_by: ObjectId::new(),
            upvotes: vec![],
        };
        // Not started yet, still listed
        assert!(notice.is_active(at(1_000)));

        notice.end_time = Some(at(2_000));
        assert!(notice.is_active(at(2_000)));
        assert!(!notice.is_active(at(2_001)));
    }
}
