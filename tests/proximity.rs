//! Geospatial reads: issue search, notice gating, nearby reports

use bson::{oid::ObjectId, DateTime};
use std::sync::Arc;

use community_sense::auth::Actor;
use community_sense::db::schemas::{IssueCategory, IssueStatus, NoticeCategory};
use community_sense::events::RecordingSink;
use community_sense::geo::{haversine_km, round_km, BoundingBox, GeoPoint, Radius};
use community_sense::lifecycle::{NewIssue, StatusChange};
use community_sense::notices::NewNotice;
use community_sense::query::{IssueQuery, NearbyQuery, NearbySort, NoticeQuery, PageRequest};
use community_sense::store::{IssueSort, NoticeUpdate};
use community_sense::{CivicCore, CivicError};

const CENTER: (f64, f64) = (40.7128, -74.0060);

fn core() -> CivicCore {
    CivicCore::in_memory(Arc::new(RecordingSink::new()))
}

fn center() -> GeoPoint {
    GeoPoint::from_lat_lng(CENTER.0, CENTER.1).unwrap()
}

/// Report an issue `north_km` due north of the center
async fn report_at(core: &CivicCore, title: &str, north_km: f64) -> ObjectId {
    let lat = CENTER.0 + north_km / 111.195;
    core.lifecycle
        .report(
            &Actor::user(ObjectId::new()),
            NewIssue {
                title: title.into(),
                description: format!("{} needs attention soon", title),
                category: IssueCategory::Pothole,
                lat: Some(lat),
                lng: Some(CENTER.1),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
}

#[test]
fn test_haversine_reference_points() {
    assert_eq!(haversine_km(40.7128, -74.0060, 40.7128, -74.0060), 0.0);
    let quarter = haversine_km(0.0, 0.0, 0.0, 90.0);
    assert!((quarter - 10007.5).abs() <= 1.0, "got {}", quarter);
    assert_eq!(round_km(1.26), 1.3);
}

#[tokio::test]
async fn test_radius_query_filters_and_sorts_by_distance() {
    let core = core();
    let far = report_at(&core, "Far pothole", 8.0).await;
    let mid = report_at(&core, "Mid pothole", 3.0).await;
    let near = report_at(&core, "Near pothole", 0.5).await;
    let edge = report_at(&core, "Edge pothole", 4.9).await;

    let page = core
        .query
        .search_issues(&IssueQuery {
            near: Some(Radius::new(center(), 5.0).unwrap()),
            sort: IssueSort::Nearest,
            ..Default::default()
        })
        .await
        .unwrap();

    let ids: Vec<ObjectId> = page.items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![near, mid, edge]);
    assert!(!ids.contains(&far));
    for issue in &page.items {
        assert!(center().distance_km(&issue.location) <= 5.0);
    }
    assert_eq!(page.pagination.total, 3);
}

#[tokio::test]
async fn test_radius_wins_over_bbox_and_nearest_needs_radius() {
    let core = core();
    report_at(&core, "Inside both", 1.0).await;
    report_at(&core, "Box only", 20.0).await;

    let bbox = BoundingBox::new(-74.5, 40.0, -73.5, 41.5).unwrap();
    let page = core
        .query
        .search_issues(&IssueQuery {
            near: Some(Radius::new(center(), 2.0).unwrap()),
            bbox: Some(bbox),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);

    let boxed = core
        .query
        .search_issues(&IssueQuery {
            bbox: Some(bbox),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(boxed.items.len(), 2);

    let err = core
        .query
        .search_issues(&IssueQuery {
            bbox: Some(bbox),
            sort: IssueSort::Nearest,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CivicError::Validation(_)));
}

#[tokio::test]
async fn test_issue_search_filters_and_pages() {
    let core = core();
    for i in 0..5 {
        report_at(&core, &format!("Pothole number {}", i), 0.1 * i as f64).await;
    }
    let special = report_at(&core, "Sinkhole forming", 0.2).await;
    core.lifecycle
        .transition(
            &special,
            &Actor::authority(ObjectId::new()),
            StatusChange::to(IssueStatus::InProgress).with_description("Road crew assigned"),
        )
        .await
        .unwrap();

    let page = core
        .query
        .search_issues(&IssueQuery {
            page: PageRequest::new(2, 2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.pagination.total, 6);
    assert_eq!(page.pagination.pages, 3);

    let found = core
        .query
        .search_issues(&IssueQuery {
            search: Some("SINKHOLE".into()),
            status: Some(IssueStatus::InProgress),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].id, special);

    let err = core
        .query
        .search_issues(&IssueQuery {
            page: PageRequest::new(0, 20),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CivicError::Validation(_)));
}

#[tokio::test]
async fn test_expired_notices_leave_both_listings_until_extended() {
    let core = core();
    let authority = Actor::authority(ObjectId::new());
    let now = DateTime::now().timestamp_millis();

    let notice = core
        .notices
        .create(
            &authority,
            NewNotice {
                title: "Boil water advisory".into(),
                message: "Boil tap water before drinking until further notice".into(),
                category: NoticeCategory::Water,
                start_time: Some(DateTime::from_millis(now - 7_200_000)),
                end_time: Some(DateTime::from_millis(now - 3_600_000)),
                lat: Some(CENTER.0),
                lng: Some(CENTER.1),
                images: vec![],
            },
        )
        .await
        .unwrap();

    let plain = NoticeQuery::default();
    let geo = NoticeQuery {
        lat: Some(CENTER.0),
        lng: Some(CENTER.1),
        radius_km: Some(10.0),
        ..Default::default()
    };
    assert!(core.query.search_notices(&plain).await.unwrap().items.is_empty());
    assert!(core.query.search_notices(&geo).await.unwrap().items.is_empty());

    // Still visible to its creator
    let mine = core
        .query
        .my_notices(&authority.id, Default::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(mine.items.len(), 1);

    core.notices
        .update(
            &notice.id,
            &authority,
            NoticeUpdate {
                end_time: Some(Some(DateTime::from_millis(now + 3_600_000))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(core.query.search_notices(&plain).await.unwrap().items.len(), 1);
    let hits = core.query.search_notices(&geo).await.unwrap();
    assert_eq!(hits.items.len(), 1);
    assert_eq!(hits.items[0].distance_km, Some(0.0));
}

#[tokio::test]
async fn test_notice_search_needs_both_coordinates() {
    let core = core();
    let err = core
        .query
        .search_notices(&NoticeQuery {
            lat: Some(CENTER.0),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CivicError::Validation(_)));
}

#[tokio::test]
async fn test_nearby_reports_projection() {
    let core = core();
    let long_desc = "x".repeat(180);
    let issue = core
        .lifecycle
        .report(
            &Actor::user(ObjectId::new()),
            NewIssue {
                title: "Garbage heap".into(),
                description: long_desc,
                category: IssueCategory::Garbage,
                lat: Some(CENTER.0 + 1.0 / 111.195),
                lng: Some(CENTER.1),
                images: vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    report_at(&core, "Out of range", 9.0).await;

    let reports = core
        .query
        .nearby_reports(&NearbyQuery {
            lat: Some(CENTER.0),
            lng: Some(CENTER.1),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    let pin = &reports[0];
    assert_eq!(pin.id, issue.id.to_hex());
    assert_eq!(pin.short_desc.chars().count(), 103);
    assert!(pin.short_desc.ends_with("..."));
    assert_eq!(pin.thumbnails, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
    assert_eq!(pin.distance_km, 1.0);

    let err = core
        .query
        .nearby_reports(&NearbyQuery {
            lat: Some(CENTER.0),
            lng: None,
            sort: NearbySort::Newest,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CivicError::Validation(_)));

    let err = core
        .query
        .nearby_reports(&NearbyQuery {
            lat: Some(95.0),
            lng: Some(CENTER.1),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CivicError::Validation(_)));
}
