//! Kinfeed — a family-scoped social feed backend.
//!
//! Users belong to one or more named families; every post, comment, reaction
//! and direct message is partitioned by the family the caller selected at
//! login. The active family travels inside a signed, expiring bearer token
//! and is re-checked against live membership on every request, so revoking a
//! membership takes effect at the next request even for unexpired tokens.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod store;
pub mod summary;

pub use error::ApiError;
