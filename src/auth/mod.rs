//! Caller identity for core operations
//!
//! Authentication happens outside the core. Every mutating call receives an
//! [`Actor`] that the request boundary has already verified.

pub mod roles;

pub use roles::{Actor, Role};
