//! src/services/storage_service.rs
//!
//! StorageService — the CDN backend the sync pipeline publishes into. SQLite
//! holds object metadata (type tags, size, etag, visibility); payloads live on
//! disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{
        bucket::Bucket,
        content::{Content, ContentTypeInfo},
        object::Object,
        object_name::ObjectName,
    },
    services::blob_store::{BlobStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const OBJECT_COLUMNS: &str = "id, bucket_id, key, content_type, content_encoding, size_bytes, \
                              etag, is_public, last_modified, is_deleted";

/// Blob storage bound to a single bucket.
///
/// Cheap to clone; the pool is shared.
#[derive(Clone, Debug)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: Bucket,
    public_base_url: String,
}

impl StorageService {
    /// Open (creating on first use) the bucket `bucket_name` and its payload
    /// directory.
    pub async fn open(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket_name: &str,
        public_base_url: impl Into<String>,
    ) -> StorageResult<Self> {
        ensure_bucket_name_safe(bucket_name)?;
        let base_path = base_path.into();
        fs::create_dir_all(base_path.join(bucket_name)).await?;

        sqlx::query(
            "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(bucket_name)
        .bind(Utc::now())
        .execute(&*db)
        .await?;

        let bucket = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket_name)
        .fetch_one(&*db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket_name.to_string()),
            other => StorageError::Sqlx(other),
        })?;

        Ok(Self {
            db,
            base_path,
            bucket,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Reject keys that could escape the bucket directory.
    fn ensure_key_safe(key: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidObjectKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN || key.starts_with('/') {
            return Err(invalid());
        }
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid());
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(invalid());
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket.name)
    }

    /// First two bytes of MD5(bucket/key) as lowercase hex, to keep
    /// directory fan-out bounded.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket.name, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.name.clone(),
            key: key.to_string(),
        }
    }

    /// Fetch a non-deleted object row.
    async fn fetch_object(&self, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0"
        ))
        .bind(key)
        .bind(self.bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => self.not_found(key),
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream an object to disk and upsert its metadata.
    ///
    /// Bytes go to a temp file first (size and MD5 computed on the way),
    /// are fsynced, then renamed into place. Overwrites keep the public flag
    /// of a live object; a previously deleted key starts private again.
    pub async fn upload_object_stream<S>(
        &self,
        key: &str,
        type_info: &ContentTypeInfo,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = self.bucket_root().join(format!(".tmp-{}", Uuid::new_v4()));

        let written = write_temp(&tmp_path, stream).await;
        let (size_bytes, etag) = match written {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let upsert = sqlx::query_as::<_, Object>(&format!(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, content_encoding, size_bytes,
                etag, is_public, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                content_encoding = excluded.content_encoding,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                is_public = CASE WHEN objects.is_deleted = 1 THEN 0 ELSE objects.is_public END,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(self.bucket.id)
        .bind(key)
        .bind(type_info.mime_type.as_deref())
        .bind(type_info.encoding.as_deref())
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match upsert {
            Ok(object) => Ok(object),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Flag an existing object as publicly readable.
    pub async fn mark_public(&self, key: &str) -> StorageResult<()> {
        Self::ensure_key_safe(key)?;
        let result = sqlx::query(
            "UPDATE objects SET is_public = 1
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(self.bucket.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.not_found(key));
        }
        Ok(())
    }

    /// Metadata plus an open payload handle.
    ///
    /// With `public_only`, private objects are reported as missing.
    pub async fn get_object_reader(
        &self,
        key: &str,
        public_only: bool,
    ) -> StorageResult<(Object, File)> {
        Self::ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;
        if public_only && !object.is_public {
            return Err(self.not_found(key));
        }

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                self.not_found(key)
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Soft-delete an object and remove its payload.
    ///
    /// A second delete of the same key reports `ObjectNotFound`.
    pub async fn delete_object(&self, key: &str) -> StorageResult<Object> {
        Self::ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;

        let result = sqlx::query(
            "UPDATE objects SET is_deleted = 1, is_public = 0
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(self.bucket.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.not_found(key));
        }

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(object)
    }

    /// Remove now-empty directories from `start` up to (not including) the
    /// bucket root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.bucket_root();
        let mut current = start.to_path_buf();
        while current.starts_with(&stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for StorageService {
    async fn put(
        &self,
        name: &ObjectName,
        mut content: Content,
        type_info: &ContentTypeInfo,
    ) -> StorageResult<Object> {
        content.rewind().await?;
        self.upload_object_stream(name.as_str(), type_info, ReaderStream::new(content))
            .await
    }

    async fn set_public(&self, name: &ObjectName) -> StorageResult<()> {
        self.mark_public(name.as_str()).await
    }

    async fn delete(&self, name: &ObjectName) -> StorageResult<()> {
        self.delete_object(name.as_str()).await.map(|_| ())
    }

    fn public_url(&self, name: &ObjectName) -> String {
        format!("{}/objects/{}", self.public_base_url, name)
    }
}

/// Drain `stream` into a fresh file at `path`, returning (size, md5 hex).
async fn write_temp<S>(path: &Path, stream: S) -> io::Result<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// Enforce S3-like bucket naming: 3–63 chars of lowercase letters, digits,
/// dots and hyphens, alphanumeric at both ends, no `..`/`.-`/`-.`, and not
/// shaped like an IPv4 address.
fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.into(),
    };

    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|segment| !segment.is_empty() && segment.parse::<u8>().is_ok())
}
