//! Shared fixtures for unit tests.

use crate::{
    db,
    models::{
        content::{Content, ContentTypeInfo},
        object::Object,
        object_name::ObjectName,
    },
    services::{
        blob_store::{BlobStore, StorageError, StorageResult},
        storage_service::StorageService,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::{HashMap, HashSet},
    io,
    path::Path,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

/// A real `StorageService` on a scratch SQLite file and payload directory.
pub async fn storage(dir: &Path) -> StorageService {
    let url = format!("sqlite://{}", dir.join("meta.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    StorageService::open(
        Arc::new(pool),
        dir.join("objects"),
        "cdn",
        "http://127.0.0.1:3000",
    )
    .await
    .unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put {
        name: String,
        content_type: Option<String>,
        encoding: Option<String>,
        bytes: Vec<u8>,
    },
    SetPublic(String),
    Delete(String),
}

/// In-memory `BlobStore` that records every call.
#[derive(Default)]
pub struct RecordingStore {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<StoreCall>,
    /// Live objects and their public flag.
    live: HashMap<String, bool>,
    failing_puts: HashSet<String>,
}

impl RecordingStore {
    /// Make every `put` of `name` fail.
    pub fn fail_put(&self, name: &str) {
        self.state.lock().unwrap().failing_puts.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn puts(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, StoreCall::Put { .. }))
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Delete(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn is_public(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .live
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// Pretend `name` was uploaded earlier.
    pub fn seed(&self, name: &str) {
        self.state.lock().unwrap().live.insert(name.to_string(), true);
    }
}

#[async_trait]
impl BlobStore for RecordingStore {
    async fn put(
        &self,
        name: &ObjectName,
        mut content: Content,
        type_info: &ContentTypeInfo,
    ) -> StorageResult<Object> {
        let bytes = content.read_all().await?;

        let mut state = self.state.lock().unwrap();
        if state.failing_puts.contains(name.as_str()) {
            return Err(StorageError::Io(io::Error::other("injected put failure")));
        }
        state.calls.push(StoreCall::Put {
            name: name.to_string(),
            content_type: type_info.mime_type.clone(),
            encoding: type_info.encoding.clone(),
            bytes: bytes.clone(),
        });
        state.live.entry(name.to_string()).or_insert(false);

        Ok(Object {
            id: Uuid::new_v4(),
            bucket_id: Uuid::nil(),
            key: name.to_string(),
            content_type: type_info.mime_type.clone(),
            content_encoding: type_info.encoding.clone(),
            size_bytes: bytes.len() as i64,
            etag: None,
            is_public: false,
            last_modified: Utc::now(),
            is_deleted: false,
        })
    }

    async fn set_public(&self, name: &ObjectName) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::SetPublic(name.to_string()));
        match state.live.get_mut(name.as_str()) {
            Some(public) => {
                *public = true;
                Ok(())
            }
            None => Err(StorageError::ObjectNotFound {
                bucket: "test".into(),
                key: name.to_string(),
            }),
        }
    }

    async fn delete(&self, name: &ObjectName) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Delete(name.to_string()));
        match state.live.remove(name.as_str()) {
            Some(_) => Ok(()),
            None => Err(StorageError::ObjectNotFound {
                bucket: "test".into(),
                key: name.to_string(),
            }),
        }
    }

    fn public_url(&self, name: &ObjectName) -> String {
        format!("memory://{name}")
    }
}
