//! The single bucket a sync deployment publishes into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket. Several watch roots may share one bucket as long as
/// they use distinct namespaces.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// Bucket name (S3-like naming rules).
    pub name: String,

    pub created_at: DateTime<Utc>,
}
