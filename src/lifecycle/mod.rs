//! Issue lifecycle engine
//!
//! Creates issues and moves them through the status lifecycle. Role rules
//! are checked against a fresh read, then the append itself is a store-level
//! conditional write guarded by "live and not closed", so two concurrent
//! transitions can never both land on a closed issue.
//!
//! The append is also guarded on the status that was read, so the "from"
//! recorded in the history is always the status actually replaced. A
//! transition that loses that race fails with `Conflict`.
//!
//! Rules for `transition`, in order:
//!
//! 1. missing or soft-deleted issue: `NotFound`
//! 2. issue already closed: `Terminal`, whoever asks
//! 3. authority targeting `closed`: `Forbidden`
//! 4. user: only `reported` or `closed`, and closing only their own issue
//! 5. authority: a description of at least 10 characters after trim
//!
//! Admins are bound only by rules 1 and 2. Authorities may jump between any
//! non-closed statuses; the canonical order is a UI convention.

use bson::oid::ObjectId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{Actor, Role};
use crate::db::schemas::{IssueCategory, IssueDoc, IssueStatus, StatusEntry};
use crate::events::{DomainEvent, EventNotifier};
use crate::geo::GeoPoint;
use crate::store::{EntityStore, StatusWrite};
use crate::types::{CivicError, Result};

pub const TITLE_MIN_CHARS: usize = 3;
pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MIN_CHARS: usize = 10;
pub const STATUS_DESCRIPTION_MIN_CHARS: usize = 10;
pub const MAX_IMAGES: usize = 5;
pub const DEFAULT_SEVERITY: u8 = 3;

/// Input for reporting a new issue
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    /// 1-5, defaults to 3
    pub severity: Option<u8>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub images: Vec<String>,
}

/// Requested status change
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub target: IssueStatus,
    pub description: Option<String>,
    pub images: Vec<String>,
}

impl StatusChange {
    pub fn to(target: IssueStatus) -> Self {
        Self {
            target,
            description: None,
            images: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// A committed transition: the issue as written and the entry appended
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub issue: IssueDoc,
    pub activity: StatusEntry,
}

pub struct LifecycleEngine {
    store: Arc<dyn EntityStore>,
    notifier: EventNotifier,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn EntityStore>, notifier: EventNotifier) -> Self {
        Self { store, notifier }
    }

    /// Validate and persist a new issue in `reported` state
    pub async fn report(&self, author: &Actor, input: NewIssue) -> Result<IssueDoc> {
        let title = input.title.trim();
        let title_len = title.chars().count();
        if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&title_len) {
            return Err(CivicError::Validation(format!(
                "Title must be between {} and {} characters",
                TITLE_MIN_CHARS, TITLE_MAX_CHARS
            )));
        }

        let description = input.description.trim();
        if description.chars().count() < DESCRIPTION_MIN_CHARS {
            return Err(CivicError::Validation(format!(
                "Description must be at least {} characters",
                DESCRIPTION_MIN_CHARS
            )));
        }

        let severity = input.severity.unwrap_or(DEFAULT_SEVERITY);
        if !(1..=5).contains(&severity) {
            return Err(CivicError::Validation(
                "Severity must be between 1 and 5".to_string(),
            ));
        }

        if input.images.len() > MAX_IMAGES {
            return Err(CivicError::Validation(format!(
                "At most {} images are allowed",
                MAX_IMAGES
            )));
        }

        let location = GeoPoint::require(input.lat, input.lng)?;

        let issue = IssueDoc::new(
            title.to_string(),
            description.to_string(),
            input.category,
            severity,
            author.id,
            location,
            input.images,
        );
        let issue = self.store.insert_issue(issue).await?;

        info!(
            issue_id = %issue.id,
            author = %author.id,
            category = issue.category.as_str(),
            "Issue reported"
        );
        self.notifier
            .publish(DomainEvent::issue_created(&issue))
            .await;

        Ok(issue)
    }

    /// Move an issue to `change.target`
    pub async fn transition(
        &self,
        issue_id: &ObjectId,
        actor: &Actor,
        change: StatusChange,
    ) -> Result<Transition> {
        let issue = self
            .store
            .get_issue(issue_id)
            .await?
            .ok_or_else(|| CivicError::NotFound("Issue not found".to_string()))?;

        if issue.status.is_terminal() {
            return Err(closed_error());
        }

        let description = change
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        check_role(&issue, actor, change.target, description.as_deref())?;

        let entry = StatusEntry::new(
            change.target,
            actor.id,
            format!("Status changed from {} to {}", issue.status, change.target),
        )
        .with_description(description)
        .with_images(change.images);

        let write = self
            .store
            .append_status(issue_id, issue.status, entry.clone())
            .await?;
        let updated = match write {
            StatusWrite::Applied(updated) => updated,
            StatusWrite::Closed => {
                debug!(issue_id = %issue_id, "Issue closed by a concurrent transition");
                return Err(closed_error());
            }
            StatusWrite::Stale(current) => {
                debug!(
                    issue_id = %issue_id,
                    read = %issue.status,
                    current = %current,
                    "Issue status moved by a concurrent transition"
                );
                return Err(CivicError::Conflict(format!(
                    "Issue status changed to {} while this update was in flight",
                    current
                )));
            }
            StatusWrite::Missing => {
                return Err(CivicError::NotFound("Issue not found".to_string()));
            }
        };

        info!(
            issue_id = %issue_id,
            actor = %actor.id,
            role = %actor.role,
            from = %issue.status,
            to = %change.target,
            "Issue status changed"
        );

        self.notifier
            .publish(DomainEvent::status_changed(&updated, &entry))
            .await;
        self.notifier
            .publish_to(
                &updated.subscribers,
                DomainEvent::issue_status_update(&updated, &entry),
            )
            .await;

        Ok(Transition {
            issue: updated,
            activity: entry,
        })
    }
}

fn closed_error() -> CivicError {
    CivicError::Terminal(
        "Closed issues cannot be reopened or have their status changed".to_string(),
    )
}

/// Role and ownership rules for a transition
fn check_role(
    issue: &IssueDoc,
    actor: &Actor,
    target: IssueStatus,
    description: Option<&str>,
) -> Result<()> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Authority => {
            if target == IssueStatus::Closed {
                return Err(CivicError::Forbidden(
                    "Authorities cannot close issues; only the original reporter can".to_string(),
                ));
            }
            match description {
                Some(d) if d.chars().count() >= STATUS_DESCRIPTION_MIN_CHARS => Ok(()),
                _ => Err(CivicError::Validation(format!(
                    "A status description of at least {} characters is required",
                    STATUS_DESCRIPTION_MIN_CHARS
                ))),
            }
        }
        Role::User => match target {
            IssueStatus::Reported => Ok(()),
            IssueStatus::Closed if actor.id == issue.author => Ok(()),
            IssueStatus::Closed => Err(CivicError::Forbidden(
                "You can only close your own issues".to_string(),
            )),
            _ => Err(CivicError::Forbidden(
                "Users can only reopen or close issues".to_string(),
            )),
        },
    }
}
