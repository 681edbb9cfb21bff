//! Core data models shared by the sync pipeline, the blob store and the
//! HTTP front end.
//!
//! `bucket` and `object` map to database tables via `sqlx::FromRow`;
//! `content` and `object_name` describe what flows through the pipeline.

pub mod bucket;
pub mod content;
pub mod object;
pub mod object_name;
