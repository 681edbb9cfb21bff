//! Notify-based event source for the watch root.

use crate::sync::{
    error::{SyncError, SyncResult},
    events::{EntryKind, FsEvent},
};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode,
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::{path::Path, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// A running recursive watch. Dropping it stops event delivery and closes
/// the sending side of the channel.
pub struct EventSource {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl EventSource {
    /// Watch `root` recursively and forward classified events to `sender`.
    pub fn start(
        root: &Path,
        debounce: Duration,
        sender: mpsc::UnboundedSender<FsEvent>,
    ) -> SyncResult<Self> {
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        let Some(fs_event) = classify(&event.event) else {
                            continue;
                        };
                        if sender.send(fs_event).is_err() {
                            debug!("event consumer has stopped, dropping event");
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        error!("Notify error: {:?}", error);
                    }
                }
            }
        })
        .map_err(|e| SyncError::Watch(format!("failed to create notify watcher: {e}")))?;

        debouncer
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watch(format!("failed to watch {}: {e}", root.display())))?;

        info!("Watching {} (debounce {:?})", root.display(), debounce);
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

/// Map a notify event onto the dispatcher's vocabulary.
///
/// A rename with both ends known is a move; a lone rename-from is a delete
/// and a lone rename-to a create. Metadata and access changes are dropped.
/// Removals not tagged as folders are reported as files; the dispatcher
/// recognises directories it has indexed.
pub fn classify(event: &Event) -> Option<FsEvent> {
    let path = event.paths.first()?.clone();

    match event.kind {
        EventKind::Create(create) => Some(FsEvent::Created {
            kind: match create {
                CreateKind::File => EntryKind::File,
                CreateKind::Folder => EntryKind::Directory,
                _ => kind_on_disk(&path),
            },
            path,
        }),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let to = event.paths.get(1)?.clone();
            Some(FsEvent::Moved {
                kind: kind_on_disk(&to),
                from: path,
                to,
            })
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FsEvent::Deleted {
            path,
            kind: EntryKind::File,
        }),
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.exists() {
                Some(FsEvent::Created {
                    kind: kind_on_disk(&path),
                    path,
                })
            } else {
                Some(FsEvent::Deleted {
                    path,
                    kind: EntryKind::File,
                })
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FsEvent::Modified {
            kind: kind_on_disk(&path),
            path,
        }),
        EventKind::Remove(RemoveKind::Folder) => Some(FsEvent::Deleted {
            path,
            kind: EntryKind::Directory,
        }),
        EventKind::Remove(_) => Some(FsEvent::Deleted {
            path,
            kind: EntryKind::File,
        }),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn kind_on_disk(path: &Path) -> EntryKind {
    if path.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use std::path::PathBuf;

    fn event<P: AsRef<Path>>(kind: EventKind, paths: &[P]) -> Event {
        paths.iter().fold(Event::new(kind), |event, path| {
            event.add_path(path.as_ref().to_path_buf())
        })
    }

    #[test]
    fn rename_with_both_ends_is_a_move() {
        let dir = tempfile::tempdir().unwrap();
        let to = dir.path().join("moved");
        std::fs::create_dir(&to).unwrap();
        let from = dir.path().join("original");

        let classified = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&from, &to],
        ));

        assert_eq!(
            classified,
            Some(FsEvent::Moved {
                from,
                to,
                kind: EntryKind::Directory,
            })
        );
    }

    #[test]
    fn folder_events_are_tagged_as_directories() {
        let path = PathBuf::from("/watch/dir");
        assert_eq!(
            classify(&event(EventKind::Create(CreateKind::Folder), &[&path])),
            Some(FsEvent::Created {
                path: path.clone(),
                kind: EntryKind::Directory,
            })
        );
        assert_eq!(
            classify(&event(EventKind::Remove(RemoveKind::Folder), &[&path])),
            Some(FsEvent::Deleted {
                path,
                kind: EntryKind::Directory,
            })
        );
    }

    #[test]
    fn data_changes_are_modifications() {
        let path = PathBuf::from("/watch/a.txt");
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &[&path]
            )),
            Some(FsEvent::Modified {
                path,
                kind: EntryKind::File,
            })
        );
    }

    #[test]
    fn rename_halves_become_delete_and_create() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.txt");
        let arrived = dir.path().join("arrived.txt");
        std::fs::write(&arrived, "x").unwrap();

        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &[&gone]
            )),
            Some(FsEvent::Deleted {
                path: gone,
                kind: EntryKind::File,
            })
        );
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &[&arrived]
            )),
            Some(FsEvent::Created {
                path: arrived,
                kind: EntryKind::File,
            })
        );
    }

    #[test]
    fn metadata_and_access_events_are_ignored() {
        let path = PathBuf::from("/watch/a.txt");
        assert_eq!(
            classify(&event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                &[&path]
            )),
            None
        );
        assert_eq!(
            classify(&event(EventKind::Access(AccessKind::Any), &[&path])),
            None
        );
        assert_eq!(classify(&Event::new(EventKind::Create(CreateKind::File))), None);
    }
}
