//! Upload queue and remote removal.
//!
//! `enqueue` submits one path and drains the whole queue before returning,
//! including every dependency the processors discover along the way. The
//! queue is FIFO; dependency cycles are broken by processing each path at
//! most once per drain.

use crate::{
    models::{
        content::{Content, ContentTypeInfo},
        object_name::ObjectName,
    },
    services::blob_store::{BlobStore, StorageError},
    sync::{
        context::SyncContext,
        error::{SyncError, SyncResult},
        processor::Processor,
    },
};
use std::{
    collections::{HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::{debug, error, info, warn};

/// What one drain did, for logging and for callers that want URLs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    /// Objects written, in upload order.
    pub uploaded: Vec<ObjectName>,
    /// Items dropped without an upload (vanished or outside the root).
    pub skipped: usize,
    /// Paths already handled earlier in the same drain.
    pub duplicates: usize,
    /// Items abandoned because a processor or the store failed.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The remote object did not exist; removal is idempotent.
    NotFound,
    /// The path has no remote name (outside the watch root).
    Skipped,
    Failed,
}

enum ItemOutcome {
    Uploaded(ObjectName),
    Skipped,
}

pub struct UploadCoordinator {
    context: SyncContext,
    store: Arc<dyn BlobStore>,
    processors: Vec<Box<dyn Processor>>,
    queue: VecDeque<PathBuf>,
}

impl UploadCoordinator {
    pub fn new(context: SyncContext, store: Arc<dyn BlobStore>) -> Self {
        Self {
            context,
            store,
            processors: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Append a processor; processors run in registration order.
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn public_url(&self, name: &ObjectName) -> String {
        self.store.public_url(name)
    }

    /// Queue `path` for upload and drain the queue to completion.
    ///
    /// A path that no longer exists is logged and skipped; the file may have
    /// been deleted again before its create event got here.
    pub async fn enqueue(&mut self, path: &Path) -> SyncResult<DrainSummary> {
        if !path.is_absolute() {
            return Err(SyncError::InvalidPath(path.to_path_buf()));
        }
        if !exists(path).await {
            info!(path = %path.display(), "file no longer exists, nothing to upload");
            return Ok(DrainSummary {
                skipped: 1,
                ..DrainSummary::default()
            });
        }

        self.queue.push_back(path.to_path_buf());
        Ok(self.drain().await)
    }

    /// Delete the remote object that mirrors `path`.
    pub async fn remove(&self, path: &Path) -> SyncResult<RemoveOutcome> {
        if !path.is_absolute() {
            return Err(SyncError::InvalidPath(path.to_path_buf()));
        }
        let name = match self.context.object_name(path) {
            Ok(name) => name,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "no remote object for path");
                return Ok(RemoveOutcome::Skipped);
            }
        };

        match self.store.delete(&name).await {
            Ok(()) => {
                info!(object = %name, "removed from cloud");
                Ok(RemoveOutcome::Removed)
            }
            Err(StorageError::ObjectNotFound { .. }) => {
                info!(object = %name, "object was not found online");
                Ok(RemoveOutcome::NotFound)
            }
            Err(err) => {
                error!(object = %name, path = %path.display(), error = %err, "remote delete failed");
                Ok(RemoveOutcome::Failed)
            }
        }
    }

    async fn drain(&mut self) -> DrainSummary {
        let mut summary = DrainSummary::default();
        let mut seen = HashSet::new();

        while let Some(next) = self.queue.pop_front() {
            if !seen.insert(next.clone()) {
                debug!(path = %next.display(), "already handled in this drain");
                summary.duplicates += 1;
                continue;
            }

            match self.process_item(&next).await {
                Ok(ItemOutcome::Uploaded(name)) => summary.uploaded.push(name),
                Ok(ItemOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    error!(path = %next.display(), error = %err, "upload failed, continuing with queue");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            uploaded = summary.uploaded.len(),
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "drain finished"
        );
        summary
    }

    /// Run one path through the processor chain and upload the result.
    async fn process_item(&mut self, path: &Path) -> SyncResult<ItemOutcome> {
        if !exists(path).await {
            debug!(path = %path.display(), "queued file vanished");
            return Ok(ItemOutcome::Skipped);
        }

        let resolved = fs::canonicalize(path).await?;
        if !self.context.watch_root.contains(&resolved) {
            warn!(
                path = %path.display(),
                target = %resolved.display(),
                "not uploading file that resolves outside the watch directory"
            );
            return Ok(ItemOutcome::Skipped);
        }

        let type_info = ContentTypeInfo::guess(path);
        let mut content = Content::open(path).await?;
        let mut name_override = None;

        for processor in &self.processors {
            let processed = processor
                .process(content, path, &type_info)
                .await
                .map_err(|source| SyncError::Processor {
                    processor: processor.name(),
                    path: path.to_path_buf(),
                    source,
                })?;

            content = processed.content;
            if processed.name.is_some() {
                name_override = processed.name;
            }
            self.queue.extend(processed.dependencies);
        }

        let name = match name_override {
            Some(name) => name,
            None => match self.context.object_name(path) {
                Ok(name) => name,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "not uploading file outside the watch directory");
                    return Ok(ItemOutcome::Skipped);
                }
            },
        };

        info!(path = %path.display(), object = %name, "uploading to cloud");
        self.store.put(&name, content, &type_info).await?;
        self.store.set_public(&name).await?;
        info!(url = %self.store.public_url(&name), "file uploaded");

        Ok(ItemOutcome::Uploaded(name))
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}
