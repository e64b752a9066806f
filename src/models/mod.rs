//! Core data models for protocol media storage and rental billing.
//!
//! Manifest rows map onto the `protocol_manifests` table via `sqlx::FromRow`;
//! everything else serializes as JSON via `serde`.

pub mod manifest;
pub mod rental;
pub mod storage_path;
