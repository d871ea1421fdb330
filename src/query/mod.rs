//! Proximity query service
//!
//! Read paths over the store: filtered issue search (radius or bounding
//! box), active notice search with distance annotation, a creator's own
//! notices, and the lightweight nearby-reports projection. Reads are
//! idempotent, so storage failures are retried a few times before they
//! surface.

pub mod page;

pub use page::{Page, PageRequest, Pagination};

use bson::{oid::ObjectId, DateTime};
use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::QueryArgs;
use crate::db::schemas::{IssueCategory, IssueDoc, IssueStatus, NoticeCategory, NoticeDoc};
use crate::geo::{round_km, BoundingBox, GeoFilter, GeoPoint, Radius};
use crate::store::{EntityStore, IssueFilter, IssueSort, NoticeFilter, NoticeSort, Window};
use crate::types::{CivicError, Result};

/// Hard cap on nearby-report results
pub const NEARBY_LIMIT: u64 = 100;

/// Characters kept from the description in a nearby report
pub const SHORT_DESC_CHARS: usize = 100;

/// Thumbnails kept in a nearby report
pub const MAX_THUMBNAILS: usize = 2;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    pub status: Option<IssueStatus>,
    pub category: Option<IssueCategory>,
    pub author: Option<ObjectId>,
    /// Case-insensitive substring over title and description
    pub search: Option<String>,
    /// Takes precedence over `bbox`
    pub near: Option<Radius>,
    pub bbox: Option<BoundingBox>,
    pub sort: IssueSort,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default)]
pub struct NoticeQuery {
    pub category: Option<NoticeCategory>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    /// Defaults to nearest with a point, newest without
    pub sort: Option<NoticeSort>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NearbySort {
    #[default]
    Nearest,
    Newest,
    MostCommented,
}

impl FromStr for NearbySort {
    type Err = CivicError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(NearbySort::Nearest),
            "newest" => Ok(NearbySort::Newest),
            "most_commented" => Ok(NearbySort::MostCommented),
            other => Err(CivicError::Validation(format!("Invalid sort: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NearbyQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub category: Option<IssueCategory>,
    pub status: Option<IssueStatus>,
    pub sort: NearbySort,
}

// ============================================================================
// Results
// ============================================================================

/// Notice annotated with its distance from the search point
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoticeHit {
    #[serde(flatten)]
    pub notice: NoticeDoc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Lightweight issue projection for map pins
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NearbyReport {
    pub id: String,
    pub title: String,
    pub short_desc: String,
    pub category: IssueCategory,
    pub status: IssueStatus,
    pub lat: f64,
    pub lng: f64,
    pub distance_km: f64,
    pub thumbnails: Vec<String>,
    pub created_at: DateTime,
}

impl NearbyReport {
    fn project(issue: IssueDoc, center: &GeoPoint) -> Self {
        Self {
            id: issue.id.to_hex(),
            distance_km: round_km(center.distance_km(&issue.location)),
            short_desc: shorten(&issue.description),
            lat: issue.location.lat(),
            lng: issue.location.lng(),
            thumbnails: issue.images.into_iter().take(MAX_THUMBNAILS).collect(),
            created_at: issue.metadata.created_at,
            title: issue.title,
            category: issue.category,
            status: issue.status,
        }
    }
}

fn shorten(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SHORT_DESC_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct ProximityQueryService {
    store: Arc<dyn EntityStore>,
    config: QueryArgs,
}

impl ProximityQueryService {
    pub fn new(store: Arc<dyn EntityStore>, config: QueryArgs) -> Self {
        Self { store, config }
    }

    /// Run an idempotent read, retrying storage failures with linear backoff
    async fn read<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Err(e) if e.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, "Read failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                other => return other,
            }
        }
    }

    pub async fn get_issue(&self, id: &ObjectId) -> Result<IssueDoc> {
        self.read("get_issue", || self.store.get_issue(id))
            .await?
            .ok_or_else(|| CivicError::NotFound("Issue not found".to_string()))
    }

    pub async fn search_issues(&self, query: &IssueQuery) -> Result<Page<IssueDoc>> {
        let (page, per_page) = query
            .page
            .resolve(self.config.default_per_page, self.config.max_per_page)?;

        let geo = GeoFilter::select(query.near, query.bbox);
        if query.sort == IssueSort::Nearest && query.near.is_none() {
            return Err(CivicError::Validation(
                "Sorting by distance requires a search radius".to_string(),
            ));
        }

        let filter = IssueFilter {
            status: query.status,
            category: query.category,
            author: query.author,
            search: query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            geo,
        };
        let window = Window::page(page, per_page);

        let items = self
            .read("find_issues", || {
                self.store.find_issues(&filter, query.sort, window)
            })
            .await?;
        let total = self
            .read("count_issues", || self.store.count_issues(&filter))
            .await?;

        debug!(page, per_page, total, returned = items.len(), "Issue search");
        Ok(Page::new(items, page, per_page, total))
    }

    /// Active notices, optionally around a point
    pub async fn search_notices(&self, query: &NoticeQuery) -> Result<Page<NoticeHit>> {
        let (page, per_page) = query
            .page
            .resolve(self.config.default_per_page, self.config.max_per_page)?;

        let center = match (query.lat, query.lng) {
            (None, None) => None,
            (lat, lng) => Some(GeoPoint::require(lat, lng)?),
        };
        let geo = match center {
            Some(center) => {
                let radius_km = query.radius_km.unwrap_or(self.config.notice_radius_km);
                Some(GeoFilter::Radius(Radius::new(center, radius_km)?))
            }
            None => None,
        };

        let sort = match (query.sort, center) {
            (Some(NoticeSort::Nearest), None) => {
                return Err(CivicError::Validation(
                    "Sorting by distance requires latitude and longitude".to_string(),
                ));
            }
            (Some(sort), _) => sort,
            (None, Some(_)) => NoticeSort::Nearest,
            (None, None) => NoticeSort::Newest,
        };

        let filter = NoticeFilter {
            category: query.category,
            created_by: None,
            geo,
            active_at: Some(DateTime::now()),
        };
        let window = Window::page(page, per_page);

        let notices = self
            .read("find_notices", || self.store.find_notices(&filter, sort, window))
            .await?;
        let total = self
            .read("count_notices", || self.store.count_notices(&filter))
            .await?;

        let hits = notices
            .into_iter()
            .map(|notice| NoticeHit {
                distance_km: center.map(|c| round_km(c.distance_km(&notice.location))),
                notice,
            })
            .collect();

        Ok(Page::new(hits, page, per_page, total))
    }

    /// Every notice posted by `creator`, expired ones included
    pub async fn my_notices(
        &self,
        creator: &ObjectId,
        sort: NoticeSort,
        request: PageRequest,
    ) -> Result<Page<NoticeDoc>> {
        let (page, per_page) =
            request.resolve(self.config.default_per_page, self.config.max_per_page)?;
        let sort = match sort {
            NoticeSort::Nearest => NoticeSort::Newest,
            other => other,
        };
        let filter = NoticeFilter {
            created_by: Some(*creator),
            ..Default::default()
        };
        let window = Window::page(page, per_page);

        let items = self
            .read("find_notices", || self.store.find_notices(&filter, sort, window))
            .await?;
        let total = self
            .read("count_notices", || self.store.count_notices(&filter))
            .await?;

        Ok(Page::new(items, page, per_page, total))
    }

    /// Up to 100 issue pins around a point
    pub async fn nearby_reports(&self, query: &NearbyQuery) -> Result<Vec<NearbyReport>> {
        let center = GeoPoint::require(query.lat, query.lng)?;
        let radius_km = query.radius_km.unwrap_or(self.config.nearby_radius_km);
        let radius = Radius::new(center, radius_km)?;

        let filter = IssueFilter {
            status: query.status,
            category: query.category,
            geo: Some(GeoFilter::Radius(radius)),
            ..Default::default()
        };
        let sort = match query.sort {
            NearbySort::Nearest => IssueSort::Nearest,
            NearbySort::Newest => IssueSort::Newest,
            NearbySort::MostCommented => IssueSort::MostCommented,
        };

        let issues = self
            .read("find_issues", || {
                self.store
                    .find_issues(&filter, sort, Window::first(NEARBY_LIMIT))
            })
            .await?;

        Ok(issues
            .into_iter()
            .map(|issue| NearbyReport::project(issue, &center))
            .collect())
    }
}
