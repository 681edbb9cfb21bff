//! The sync core: filesystem events in, remote object operations out.
//!
//! `watcher` produces classified events, `dispatcher` expands them into
//! per-file operations, `coordinator` drives each file through the
//! `processor` chain (`html_links` being the built-in one) and into the
//! blob store.

pub mod context;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod html_links;
pub mod processor;
pub mod watcher;

use crate::sync::{dispatcher::FsEventDispatcher, error::SyncResult, watcher::EventSource};
use std::{path::Path, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Watch `root` until `shutdown` fires.
///
/// Events are handled one at a time on a single task, so a large directory
/// move holds back later events until all of its uploads are done. On
/// shutdown the event source is stopped first; an event already being
/// handled runs to completion, queued ones are dropped.
pub async fn run_watch(
    mut dispatcher: FsEventDispatcher,
    root: &Path,
    debounce: Duration,
    shutdown: CancellationToken,
) -> SyncResult<()> {
    let (sender, mut events) = mpsc::unbounded_channel();
    let source = EventSource::start(root, debounce, sender)?;

    let stop = shutdown.clone();
    let worker = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => dispatcher.handle(event).await,
                    None => break,
                },
            }
        }
    });

    shutdown.cancelled().await;
    info!("Interrupting observer");
    drop(source);

    if let Err(err) = worker.await {
        error!(error = %err, "event worker terminated abnormally");
    }
    info!("Observer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object_name::{Namespace, WatchRoot},
        sync::{context::SyncContext, coordinator::UploadCoordinator},
        test_support::RecordingStore,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn watch_loop_uploads_new_files_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let root = WatchRoot::new(dir.path()).unwrap();
        let store = Arc::new(RecordingStore::default());
        let coordinator = UploadCoordinator::new(
            SyncContext::new(root.clone(), Namespace::new("ns")),
            store.clone(),
        );
        let dispatcher = FsEventDispatcher::new(coordinator);
        let shutdown = CancellationToken::new();

        let file = root.as_path().join("a.txt");
        let observed = store.clone();
        let stop = shutdown.clone();
        let probe = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::fs::write(&file, "hello").unwrap();

            let mut uploaded = false;
            for _ in 0..100 {
                if observed.is_public("ns/a.txt") {
                    uploaded = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            stop.cancel();
            uploaded
        });

        run_watch(dispatcher, root.as_path(), Duration::from_millis(50), shutdown)
            .await
            .unwrap();
        assert!(probe.await.unwrap(), "a.txt was never uploaded");
    }

    #[tokio::test]
    async fn directory_moved_into_the_root_is_uploaded() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("root")).unwrap();
        std::fs::create_dir_all(base.path().join("staging/assets")).unwrap();
        std::fs::write(base.path().join("staging/assets/a.txt"), "a").unwrap();
        std::fs::write(base.path().join("staging/assets/b.txt"), "b").unwrap();

        let root = WatchRoot::new(base.path().join("root")).unwrap();
        let store = Arc::new(RecordingStore::default());
        let coordinator = UploadCoordinator::new(
            SyncContext::new(root.clone(), Namespace::default()),
            store.clone(),
        );
        let dispatcher = FsEventDispatcher::new(coordinator);
        let shutdown = CancellationToken::new();

        let from = base.path().join("staging/assets");
        let to = root.as_path().join("assets");
        let observed = store.clone();
        let stop = shutdown.clone();
        let mover = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::fs::rename(&from, &to).unwrap();

            let mut uploaded = false;
            for _ in 0..100 {
                if observed.is_public("assets/a.txt") && observed.is_public("assets/b.txt") {
                    uploaded = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            stop.cancel();
            uploaded
        });

        run_watch(dispatcher, root.as_path(), Duration::from_millis(50), shutdown)
            .await
            .unwrap();
        assert!(mover.await.unwrap(), "moved-in files were never uploaded");
    }
}
