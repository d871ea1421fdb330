//! NATS transport for domain events

pub mod client;

pub use client::{event_headers, NatsClient};
