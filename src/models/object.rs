//! Represents an object (blob) published to the CDN bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single stored object.
///
/// The payload bytes live on disk; this row only records what the read path
/// needs to serve them back (type tags, size, visibility).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object name, `<namespace>/<relative path>`.
    pub key: String,

    /// MIME type recorded at upload time.
    pub content_type: Option<String>,

    /// Content encoding (e.g. `gzip`) recorded at upload time.
    pub content_encoding: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: Option<String>,

    /// Whether the object may be served to anonymous readers.
    pub is_public: bool,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,

    /// Soft-delete marker.
    pub is_deleted: bool,
}
