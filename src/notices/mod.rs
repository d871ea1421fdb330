//! Notice service
//!
//! Authorities post location-scoped announcements. Only the creator may
//! edit or remove a notice; removal is physical.

use bson::{oid::ObjectId, DateTime};
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::Actor;
use crate::db::schemas::{validate_window, Metadata, NoticeCategory, NoticeDoc};
use crate::events::{DomainEvent, EventNotifier, NoticeDeleted};
use crate::geo::GeoPoint;
use crate::lifecycle::{MAX_IMAGES, TITLE_MAX_CHARS, TITLE_MIN_CHARS};
use crate::store::{EntityStore, NoticeUpdate, NoticeWindow, NoticeWrite};
use crate::types::{CivicError, Result};

pub const MESSAGE_MIN_CHARS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct NewNotice {
    pub title: String,
    pub message: String,
    pub category: NoticeCategory,
    pub start_time: Option<DateTime>,
    pub end_time: Option<DateTime>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub images: Vec<String>,
}

pub struct NoticeService {
    store: Arc<dyn EntityStore>,
    notifier: EventNotifier,
}

fn check_title(title: &str) -> Result<()> {
    let len = title.chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&len) {
        return Err(CivicError::Validation(format!(
            "Title must be between {} and {} characters",
            TITLE_MIN_CHARS, TITLE_MAX_CHARS
        )));
    }
    Ok(())
}

fn check_message(message: &str) -> Result<()> {
    if message.chars().count() < MESSAGE_MIN_CHARS {
        return Err(CivicError::Validation(format!(
            "Message must be at least {} characters",
            MESSAGE_MIN_CHARS
        )));
    }
    Ok(())
}

fn check_images(images: &[String]) -> Result<()> {
    if images.len() > MAX_IMAGES {
        return Err(CivicError::Validation(format!(
            "At most {} images are allowed",
            MAX_IMAGES
        )));
    }
    Ok(())
}

impl NoticeService {
    pub fn new(store: Arc<dyn EntityStore>, notifier: EventNotifier) -> Self {
        Self { store, notifier }
    }

    pub async fn create(&self, actor: &Actor, input: NewNotice) -> Result<NoticeDoc> {
        if !actor.role.can_publish_notices() {
            return Err(CivicError::Forbidden(
                "Only authorities can post notices".to_string(),
            ));
        }

        let title = input.title.trim();
        let message = input.message.trim();
        check_title(title)?;
        check_message(message)?;
        check_images(&input.images)?;
        validate_window(input.start_time, input.end_time)?;
        let location = GeoPoint::require(input.lat, input.lng)?;

        let notice = NoticeDoc {
            id: ObjectId::new(),
            metadata: Metadata::new(),
            title: title.to_string(),
            message: message.to_string(),
            category: input.category,
            start_time: input.start_time,
            end_time: input.end_time,
            images: input.images,
            location,
            created_by: actor.id,
            upvotes: Vec::new(),
        };
        let notice = self.store.insert_notice(notice).await?;

        info!(notice_id = %notice.id, creator = %actor.id, "Notice created");
        self.notifier
            .publish(DomainEvent::notice_created(&notice))
            .await;

        Ok(notice)
    }

    pub async fn get(&self, id: &ObjectId) -> Result<NoticeDoc> {
        self.store
            .get_notice(id)
            .await?
            .ok_or_else(|| CivicError::NotFound("Notice not found".to_string()))
    }

    /// Apply a partial edit; the merged time window must stay valid
    pub async fn update(
        &self,
        id: &ObjectId,
        actor: &Actor,
        mut changes: NoticeUpdate,
    ) -> Result<NoticeDoc> {
        let current = self.get(id).await?;
        if current.created_by != actor.id {
            return Err(CivicError::Forbidden(
                "You can only edit your own notices".to_string(),
            ));
        }

        if let Some(ref mut title) = changes.title {
            *title = title.trim().to_string();
            check_title(title)?;
        }
        if let Some(ref mut message) = changes.message {
            *message = message.trim().to_string();
            check_message(message)?;
        }
        if let Some(ref images) = changes.images {
            check_images(images)?;
        }
        validate_window(
            changes.start_time.unwrap_or(current.start_time),
            changes.end_time.unwrap_or(current.end_time),
        )?;

        if changes.is_empty() {
            return Ok(current);
        }

        // The window was validated against `current`; only write it over that same window
        let guard = changes.touches_window().then(|| NoticeWindow::of(&current));
        let notice = match self.store.update_notice(id, guard, &changes).await? {
            NoticeWrite::Applied(notice) => notice,
            NoticeWrite::Missing => {
                return Err(CivicError::NotFound("Notice not found".to_string()));
            }
            NoticeWrite::Stale => {
                debug!(notice_id = %id, "Notice window changed by a concurrent edit");
                return Err(CivicError::Conflict(
                    "Notice time window changed while this update was in flight".to_string(),
                ));
            }
        };

        info!(notice_id = %id, "Notice updated");
        self.notifier
            .publish(DomainEvent::notice_updated(&notice))
            .await;

        Ok(notice)
    }

    pub async fn delete(&self, id: &ObjectId, actor: &Actor) -> Result<()> {
        let current = self.get(id).await?;
        if current.created_by != actor.id {
            return Err(CivicError::Forbidden(
                "You can only delete your own notices".to_string(),
            ));
        }

        if !self.store.delete_notice(id).await? {
            return Err(CivicError::NotFound("Notice not found".to_string()));
        }

        info!(notice_id = %id, "Notice deleted");
        self.notifier
            .publish(DomainEvent::NoticeDeleted(NoticeDeleted { id: id.to_hex() }))
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::store::testing::ScriptedStore;
    use crate::store::MemoryStore;

    fn service() -> (NoticeService, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let service = NoticeService::new(
            Arc::new(MemoryStore::new()),
            EventNotifier::new(sink.clone()),
        );
        (service, sink)
    }

    fn outage() -> NewNotice {
        NewNotice {
            title: "Water outage".into(),
            message: "Mains repair on Elm Street until evening".into(),
            category: NoticeCategory::Water,
            lat: Some(40.71),
            lng: Some(-74.0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_only_authorities_post() {
        let (service, sink) = service();
        let err = service
            .create(&Actor::user(ObjectId::new()), outage())
            .await
            .unwrap_err();
        assert!(matches!(err, CivicError::Forbidden(_)));

        service
            .create(&Actor::authority(ObjectId::new()), outage())
            .await
            .unwrap();
        assert_eq!(sink.named("noticeCreated").await.len(), 1);
    }

    #[tokio::test]
    async fn test_window_must_move_forward() {
        let (service, _) = service();
        let mut bad = outage();
        bad.start_time = Some(DateTime::from_millis(2_000));
        bad.end_time = Some(DateTime::from_millis(2_000));
        assert!(matches!(
            service.create(&Actor::authority(ObjectId::new()), bad).await,
            Err(CivicError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_window_edits_cannot_invert_window() {
        let store = Arc::new(ScriptedStore::new());
        let service = NoticeService::new(
            store.clone(),
            EventNotifier::new(Arc::new(RecordingSink::new())),
        );
        let author = Actor::authority(ObjectId::new());
        let mut input = outage();
        input.start_time = Some(DateTime::from_millis(10_000));
        input.end_time = Some(DateTime::from_millis(50_000));
        let notice = service.create(&author, input).await.unwrap();

        // Another edit pushes the start past the end this one is about to set
        store.interleave_notice_update(NoticeUpdate {
            start_time: Some(Some(DateTime::from_millis(40_000))),
            ..Default::default()
        });
        let shorten = NoticeUpdate {
            end_time: Some(Some(DateTime::from_millis(20_000))),
            ..Default::default()
        };
        assert!(matches!(
            service.update(&notice.id, &author, shorten.clone()).await,
            Err(CivicError::Conflict(_))
        ));

        let stored = service.get(&notice.id).await.unwrap();
        assert_eq!(stored.start_time, Some(DateTime::from_millis(40_000)));
        assert_eq!(stored.end_time, Some(DateTime::from_millis(50_000)));

        // Re-reading shows the edit no longer fits
        assert!(matches!(
            service.update(&notice.id, &author, shorten).await,
            Err(CivicError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_revalidates_merged_window() {
        let (service, sink) = service();
        let author = Actor::authority(ObjectId::new());
        let mut input = outage();
        input.start_time = Some(DateTime::from_millis(10_000));
        let notice = service.create(&author, input).await.unwrap();

        let backwards = NoticeUpdate {
            end_time: Some(Some(DateTime::from_millis(5_000))),
            ..Default::default()
        };
        assert!(matches!(
            service.update(&notice.id, &author, backwards).await,
            Err(CivicError::Validation(_))
        ));

        let retitle = NoticeUpdate {
            title: Some("  Water outage extended ".into()),
            ..Default::default()
        };
        let updated = service.update(&notice.id, &author, retitle).await.unwrap();
        assert_eq!(updated.title, "Water outage extended");
        assert_eq!(sink.named("noticeUpdated").await.len(), 1);
    }

    #[tokio::test]
    async fn test_creator_only_and_physical_delete() {
        let (service, sink) = service();
        let author = Actor::authority(ObjectId::new());
        let notice = service.create(&author, outage()).await.unwrap();

        let other = Actor::authority(ObjectId::new());
        assert!(matches!(
            service.delete(&notice.id, &other).await,
            Err(CivicError::Forbidden(_))
        ));

        service.delete(&notice.id, &author).await.unwrap();
        assert!(matches!(service.get(&notice.id).await, Err(CivicError::NotFound(_))));
        assert_eq!(sink.named("noticeDeleted").await.len(), 1);
    }
}
