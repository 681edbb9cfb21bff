//! The remote blob-store contract the sync pipeline uploads through.

use crate::models::{
    content::{Content, ContentTypeInfo},
    object::Object,
    object_name::ObjectName,
};
use async_trait::async_trait;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Object operations the uploader needs from the CDN backend.
///
/// `delete` reports a missing object as [`StorageError::ObjectNotFound`];
/// callers treat that as an idempotent success.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) `name` with the full content and its type tags.
    async fn put(
        &self,
        name: &ObjectName,
        content: Content,
        type_info: &ContentTypeInfo,
    ) -> StorageResult<Object>;

    /// Make `name` readable by anonymous clients.
    async fn set_public(&self, name: &ObjectName) -> StorageResult<()>;

    async fn delete(&self, name: &ObjectName) -> StorageResult<()>;

    /// URL under which a public object is served.
    fn public_url(&self, name: &ObjectName) -> String;
}
