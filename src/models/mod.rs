//! Core data models for the upload broker.
//!
//! Metadata rows map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`. Credentials are transient and never stored.

pub mod credential;
pub mod object;
pub mod user;
