//! Composition root
//!
//! Builds the store-backed services once and hands each the same store and
//! event notifier. Nothing here is process-global; callers own the value.

use std::sync::Arc;

use crate::comments::CommentService;
use crate::config::QueryArgs;
use crate::events::{EventNotifier, EventSink};
use crate::lifecycle::LifecycleEngine;
use crate::moderation::SoftDeleteCoordinator;
use crate::notices::NoticeService;
use crate::query::ProximityQueryService;
use crate::store::{EntityStore, MemoryStore};
use crate::toggle::ToggleSetManager;

pub struct CivicCore {
    pub store: Arc<dyn EntityStore>,
    pub notifier: EventNotifier,
    pub lifecycle: LifecycleEngine,
    pub toggles: ToggleSetManager,
    pub moderation: SoftDeleteCoordinator,
    pub comments: CommentService,
    pub notices: NoticeService,
    pub query: ProximityQueryService,
}

impl CivicCore {
    pub fn new(store: Arc<dyn EntityStore>, sink: Arc<dyn EventSink>, config: QueryArgs) -> Self {
        let notifier = EventNotifier::new(sink);
        Self {
            lifecycle: LifecycleEngine::new(store.clone(), notifier.clone()),
            toggles: ToggleSetManager::new(store.clone(), notifier.clone()),
            moderation: SoftDeleteCoordinator::new(store.clone(), notifier.clone()),
            comments: CommentService::new(store.clone(), notifier.clone(), config.max_per_page),
            notices: NoticeService::new(store.clone(), notifier.clone()),
            query: ProximityQueryService::new(store.clone(), config),
            store,
            notifier,
        }
    }

    /// Core over a fresh in-memory store with default query settings
    pub fn in_memory(sink: Arc<dyn EventSink>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), sink, QueryArgs::default())
    }
}
