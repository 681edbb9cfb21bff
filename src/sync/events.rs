use std::path::PathBuf;

/// Whether an event concerns a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn label(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }
}

/// A classified change inside the watched tree. Paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created { path: PathBuf, kind: EntryKind },
    Modified { path: PathBuf, kind: EntryKind },
    Deleted { path: PathBuf, kind: EntryKind },
    Moved {
        from: PathBuf,
        to: PathBuf,
        kind: EntryKind,
    },
}
