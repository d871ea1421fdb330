//! Database layer
//!
//! MongoDB client wrapper plus the document schemas for issues, comments,
//! and notices.

pub mod mongo;
pub mod schemas;

pub use mongo::{MongoClient, MongoCollection};
