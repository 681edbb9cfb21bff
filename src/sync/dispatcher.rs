//! Turns classified filesystem events into coordinator calls.
//!
//! File events map one-to-one onto `enqueue`/`remove`. Directory deletes
//! and moves are expanded into per-file operations: deletes against the
//! listing of files known before the event (the directory is already gone),
//! moves by walking the directory at its new location. A directory that
//! appears is walked too, since a tree moved in from outside the root
//! arrives as a single event. Nothing here returns an error; a failed event
//! is logged and dropped so the watch loop keeps running.

use crate::sync::{
    coordinator::UploadCoordinator,
    events::{EntryKind, FsEvent},
};
use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Files known to exist under the watch root.
#[derive(Debug, Default)]
pub struct LocalIndex {
    files: BTreeSet<PathBuf>,
}

impl LocalIndex {
    /// List every regular file below `root`. Unreadable entries are skipped.
    pub fn scan(root: &Path) -> Self {
        let files = WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        Self { files }
    }

    pub fn insert(&mut self, path: PathBuf) {
        self.files.insert(path);
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.files.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Indexed files strictly below `dir`, in path order.
    fn under<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.files
            .range(dir.to_path_buf()..)
            .take_while(move |file| file.starts_with(dir))
            .filter(move |file| file.as_path() != dir)
    }

    pub fn has_under(&self, dir: &Path) -> bool {
        self.under(dir).next().is_some()
    }

    /// Remove and return every indexed file below `dir`.
    pub fn drain_under(&mut self, dir: &Path) -> Vec<PathBuf> {
        let under: Vec<PathBuf> = self.under(dir).cloned().collect();
        for file in &under {
            self.files.remove(file);
        }
        under
    }
}

pub struct FsEventDispatcher {
    coordinator: UploadCoordinator,
    index: LocalIndex,
}

impl FsEventDispatcher {
    /// Wrap `coordinator`, indexing the current contents of its watch root.
    pub fn new(coordinator: UploadCoordinator) -> Self {
        let index = LocalIndex::scan(coordinator.context().watch_root.as_path());
        debug!(files = index.len(), "indexed watch root");
        Self { coordinator, index }
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub async fn handle(&mut self, event: FsEvent) {
        match event {
            FsEvent::Created {
                path,
                kind: EntryKind::Directory,
            } => {
                info!("Created directory: {}", path.display());
                self.upload_directory(&path).await;
            }
            FsEvent::Modified {
                path,
                kind: EntryKind::Directory,
            } => {
                debug!(path = %path.display(), "directory modified, waiting for file events");
            }
            FsEvent::Created { path, .. } => {
                info!("Created file: {}", path.display());
                self.upload_file(&path).await;
            }
            FsEvent::Modified { path, .. } => {
                info!("Modified file: {}", path.display());
                self.upload_file(&path).await;
            }
            FsEvent::Deleted { path, kind } => {
                let is_directory = kind == EntryKind::Directory
                    || (!self.index.contains(&path) && self.index.has_under(&path));
                if is_directory {
                    info!("Deleted directory: {}", path.display());
                    for file in self.index.drain_under(&path) {
                        self.remove_file(&file).await;
                    }
                } else {
                    info!("Deleted file: {}", path.display());
                    self.remove_file(&path).await;
                }
            }
            FsEvent::Moved { from, to, kind } => {
                info!(
                    "Moved {}: from {} to {}",
                    kind.label(),
                    from.display(),
                    to.display()
                );
                match kind {
                    EntryKind::File => self.move_file(&from, &to).await,
                    EntryKind::Directory => {
                        if let Err(err) = self.move_directory(&from, &to).await {
                            error!(
                                from = %from.display(),
                                to = %to.display(),
                                error = %err,
                                "dropping directory move event"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn upload_file(&mut self, path: &Path) {
        if fs::try_exists(path).await.unwrap_or(false) {
            self.index.insert(path.to_path_buf());
        }
        match self.coordinator.enqueue(path).await {
            Ok(summary) => debug!(
                path = %path.display(),
                uploaded = summary.uploaded.len(),
                failed = summary.failed,
                "event handled"
            ),
            Err(err) => error!(path = %path.display(), error = %err, "cannot queue upload"),
        }
    }

    /// Upload every file already present in a directory that just appeared.
    /// A directory moved in from outside the watch root produces no events
    /// for its contents.
    async fn upload_directory(&mut self, dir: &Path) {
        let files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| !self.index.contains(path))
            .collect();

        for file in files {
            self.upload_file(&file).await;
        }
    }

    async fn remove_file(&mut self, path: &Path) {
        self.index.remove(path);
        if let Err(err) = self.coordinator.remove(path).await {
            error!(path = %path.display(), error = %err, "cannot remove remote object");
        }
    }

    /// Delete-then-create; the new location needs a fresh name and a fresh
    /// pass through the processors.
    async fn move_file(&mut self, from: &Path, to: &Path) {
        self.remove_file(from).await;
        self.upload_file(to).await;
    }

    /// Walk the moved tree at its new location with an explicit stack of
    /// (old directory, new directory) pairs, then drop whatever the index
    /// still holds under the old location.
    async fn move_directory(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];

        while let Some((old_dir, new_dir)) = pending.pop() {
            let mut entries = fs::read_dir(&new_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let name = entry.file_name();
                if file_type.is_dir() {
                    pending.push((old_dir.join(&name), new_dir.join(&name)));
                } else if file_type.is_file() {
                    self.move_file(&old_dir.join(&name), &new_dir.join(&name))
                        .await;
                }
            }
        }

        for stale in self.index.drain_under(from) {
            self.remove_file(&stale).await;
        }
        Ok(())
    }
}
