//! Community Sense - civic issue reporting core
//!
//! Residents report geolocated issues, authorities move them through a
//! moderated lifecycle and post time-windowed notices, and everyone finds
//! what is near them.
//!
//! ## Components
//!
//! - **Lifecycle**: issue creation and the status state machine
//! - **Toggle**: idempotent upvote / subscription flips
//! - **Moderation**: author soft deletes with comment counter upkeep
//! - **Query**: radius / bounding box search, notice search, nearby pins
//! - **Events**: best-effort fan-out to NATS or in-process listeners
//!
//! All state lives in one [`store::EntityStore`]; services are stateless and
//! built once by [`CivicCore`].

pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod db;
pub mod events;
pub mod geo;
pub mod lifecycle;
pub mod moderation;
pub mod nats;
pub mod notices;
pub mod query;
pub mod seed;
pub mod store;
pub mod toggle;
pub mod types;

pub use config::Args;
pub use crate::core::CivicCore;
pub use types::{CivicError, Result};
