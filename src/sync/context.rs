use crate::models::object_name::{Namespace, NamingError, ObjectName, WatchRoot};
use std::path::Path;

/// Settings fixed for the lifetime of a sync process, built once at startup
/// and handed to the coordinator, processors and dispatcher.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub watch_root: WatchRoot,
    pub namespace: Namespace,
}

impl SyncContext {
    pub fn new(watch_root: WatchRoot, namespace: Namespace) -> Self {
        Self {
            watch_root,
            namespace,
        }
    }

    /// Remote object name for an absolute local path.
    pub fn object_name(&self, path: &Path) -> Result<ObjectName, NamingError> {
        let relative = self.watch_root.relative(path)?;
        self.namespace.object_name(relative)
    }
}
