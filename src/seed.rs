//! Demo data
//!
//! Reports a batch of sample issues and notices scattered around a center
//! point, then walks some of them through the lifecycle and adds votes and
//! comments. Everything goes through the services, so counters, history,
//! and events are exactly what real traffic would produce.

use bson::{oid::ObjectId, DateTime};
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::auth::Actor;
use crate::core::CivicCore;
use crate::db::schemas::{IssueCategory, IssueStatus, NoticeCategory};
use crate::geo::GeoPoint;
use crate::lifecycle::{NewIssue, StatusChange};
use crate::notices::NewNotice;
use crate::types::Result;

/// Kilometers per degree of latitude
const KM_PER_DEGREE: f64 = 111.32;

const ISSUES: &[(&str, &str, IssueCategory, u8)] = &[
    (
        "Large pothole on Main Street",
        "There is a large pothole near the intersection of Main Street and Oak Avenue. It has been getting worse over the past few weeks and is causing damage to vehicles.",
        IssueCategory::Pothole,
        4,
    ),
    (
        "Garbage not collected for 2 weeks",
        "The garbage bins on Elm Street have not been collected for over two weeks. The area is starting to smell and attract pests.",
        IssueCategory::Garbage,
        3,
    ),
    (
        "Water leak on sidewalk",
        "There is a continuous water leak coming from a broken pipe under the sidewalk on Park Avenue. Water is pooling and creating a hazard.",
        IssueCategory::WaterLeak,
        5,
    ),
    (
        "Streetlight out on corner",
        "The streetlight at the corner of 5th Street and Maple Drive has been out for several days. The area is very dark at night.",
        IssueCategory::Streetlight,
        2,
    ),
    (
        "Traffic signal malfunction",
        "The traffic signal at the intersection of Broadway and 3rd Street is stuck on red. Traffic is backing up significantly.",
        IssueCategory::Traffic,
        5,
    ),
    (
        "Broken bench in park",
        "One of the benches in Central Park is broken and unsafe to sit on. The wood is splintered and the legs are unstable.",
        IssueCategory::Other,
        2,
    ),
    (
        "Overflowing dumpster",
        "The dumpster behind the shopping center on Commerce Street is overflowing. Garbage is spilling onto the parking lot.",
        IssueCategory::Garbage,
        3,
    ),
    (
        "Broken fire hydrant",
        "The fire hydrant on Pine Street appears to be leaking. Water is running down the street continuously.",
        IssueCategory::WaterLeak,
        4,
    ),
    (
        "Road construction debris",
        "There is leftover construction debris blocking part of the bike lane on Riverside Drive. It has been there for over a week.",
        IssueCategory::Traffic,
        3,
    ),
    (
        "Deep pothole causing flat tires",
        "A very deep pothole on Market Street has caused multiple flat tires. It needs immediate attention.",
        IssueCategory::Pothole,
        5,
    ),
    (
        "Multiple streetlights out",
        "Three consecutive streetlights are out on Sunset Boulevard, making the area very dark and potentially unsafe.",
        IssueCategory::Streetlight,
        3,
    ),
    (
        "Damaged playground equipment",
        "One of the swings in the playground at Memorial Park is broken and hanging at an angle. It is unsafe for children.",
        IssueCategory::Other,
        3,
    ),
];

const COMMENTS: &[&str] = &[
    "This is a serious issue that needs immediate attention.",
    "I have also noticed this problem. Thanks for reporting!",
    "I hope this gets fixed soon.",
    "This has been an ongoing issue for months.",
    "I will follow up on this.",
    "This is affecting many people in the neighborhood.",
];

/// Authority notes for each forward step
const PROGRESS_NOTES: &[(IssueStatus, &str)] = &[
    (IssueStatus::Acknowledged, "Report received and queued for inspection"),
    (IssueStatus::InProgress, "Crew dispatched to the site"),
    (IssueStatus::Resolved, "Repair completed and site inspected"),
];

/// (title, message, category, starts in days, lasts days)
const NOTICES: &[(&str, &str, NoticeCategory, i64, i64)] = &[
    (
        "Scheduled water outage",
        "Water supply will be interrupted for mains replacement on Elm Street.",
        NoticeCategory::Water,
        1,
        1,
    ),
    (
        "Lane closure on Riverside Drive",
        "One lane closed for resurfacing. Expect delays during rush hour.",
        NoticeCategory::Road,
        0,
        7,
    ),
    (
        "Grid maintenance completed",
        "Planned electricity maintenance in the north district has finished.",
        NoticeCategory::Electricity,
        -3,
        1,
    ),
    (
        "Bulk waste pickup week",
        "Large items can be left at the curb for collection all week.",
        NoticeCategory::Sanitation,
        0,
        5,
    ),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub issues: usize,
    pub transitions: usize,
    pub comments: usize,
    pub notices: usize,
}

/// Uniformly random point within `spread_km` of `center`
fn scatter(rng: &mut StdRng, center: &GeoPoint, spread_km: f64) -> Result<GeoPoint> {
    let distance = spread_km * rng.gen::<f64>().sqrt();
    let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
    let dlat = distance * bearing.cos() / KM_PER_DEGREE;
    let lng_scale = KM_PER_DEGREE * center.lat().to_radians().cos().max(0.01);
    let dlng = distance * bearing.sin() / lng_scale;
    let lat = (center.lat() + dlat).clamp(-90.0, 90.0);
    let mut lng = center.lng() + dlng;
    if lng > 180.0 {
        lng -= 360.0;
    } else if lng < -180.0 {
        lng += 360.0;
    }
    GeoPoint::from_lat_lng(lat, lng)
}

/// Load demo data; `rng_seed` makes the layout reproducible
pub async fn seed(
    core: &CivicCore,
    center: GeoPoint,
    spread_km: f64,
    rng_seed: Option<u64>,
) -> Result<SeedSummary> {
    let mut rng = match rng_seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let authority = Actor::authority(ObjectId::new());
    let residents: Vec<Actor> = (0..3).map(|_| Actor::user(ObjectId::new())).collect();
    let mut summary = SeedSummary::default();

    for (i, (title, description, category, severity)) in ISSUES.iter().enumerate() {
        let author = residents[rng.gen_range(0..residents.len())];
        let location = scatter(&mut rng, &center, spread_km)?;
        let issue = core
            .lifecycle
            .report(
                &author,
                NewIssue {
                    title: title.to_string(),
                    description: description.to_string(),
                    category: *category,
                    severity: Some(*severity),
                    lat: Some(location.lat()),
                    lng: Some(location.lng()),
                    images: vec![format!("/uploads/placeholder-{}.jpg", i % 5 + 1)],
                },
            )
            .await?;
        summary.issues += 1;

        // 0..=3 forward steps, and sometimes the reporter closes it after
        let steps = rng.gen_range(0..=PROGRESS_NOTES.len());
        for (status, note) in &PROGRESS_NOTES[..steps] {
            core.lifecycle
                .transition(
                    &issue.id,
                    &authority,
                    StatusChange::to(*status).with_description(*note),
                )
                .await?;
            summary.transitions += 1;
        }
        if steps == PROGRESS_NOTES.len() && rng.gen_bool(0.5) {
            core.lifecycle
                .transition(&issue.id, &author, StatusChange::to(IssueStatus::Closed))
                .await?;
            summary.transitions += 1;
        }

        for resident in &residents {
            if rng.gen_bool(0.4) {
                core.toggles.toggle_issue_upvote(issue.id, resident).await?;
            }
            if rng.gen_bool(0.2) {
                core.toggles.toggle_subscription(issue.id, resident).await?;
            }
        }

        if rng.gen_bool(0.5) {
            let commenter = residents[rng.gen_range(0..residents.len())];
            let text = COMMENTS[rng.gen_range(0..COMMENTS.len())];
            core.comments.add_comment(&issue.id, &commenter, text).await?;
            summary.comments += 1;
        }
    }

    let now = Utc::now();
    for (title, message, category, starts_in, lasts) in NOTICES {
        let start = now + Duration::days(*starts_in);
        let end = start + Duration::days(*lasts);
        let location = scatter(&mut rng, &center, spread_km)?;
        core.notices
            .create(
                &authority,
                NewNotice {
                    title: title.to_string(),
                    message: message.to_string(),
                    category: *category,
                    start_time: Some(DateTime::from_chrono(start)),
                    end_time: Some(DateTime::from_chrono(end)),
                    lat: Some(location.lat()),
                    lng: Some(location.lng()),
                    images: Vec::new(),
                },
            )
            .await?;
        summary.notices += 1;
    }

    info!(
        issues = summary.issues,
        transitions = summary.transitions,
        comments = summary.comments,
        notices = summary.notices,
        "Seed complete"
    );
    Ok(summary)
}
