use crate::{models::object_name::NamingError, services::blob_store::StorageError};
use std::{io, path::PathBuf};
use thiserror::Error;

/// Failures inside the sync pipeline.
///
/// Only [`SyncError::InvalidPath`] is ever returned from the coordinator's
/// public operations; everything else is contained per queue item or per
/// event and reported through logs.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("`{}` is not an absolute path", .0.display())]
    InvalidPath(PathBuf),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("processor `{processor}` failed on `{}`: {source}", path.display())]
    Processor {
        processor: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("watcher error: {0}")]
    Watch(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
