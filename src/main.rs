use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod sync;
#[cfg(test)]
mod test_support;

use crate::{
    config::{AppConfig, Command},
    handlers::AppState,
    models::object_name::{Namespace, WatchRoot},
    services::storage_service::StorageService,
    sync::{
        context::SyncContext, coordinator::UploadCoordinator, dispatcher::FsEventDispatcher,
        html_links::HtmlLinkProcessor,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting cdn-sync with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite + blob store ---
    let db = db::connect(&cfg.database_url)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;
    db::run_migrations(&db).await?;
    let storage = StorageService::open(
        Arc::new(db),
        cfg.storage_dir.clone(),
        &cfg.bucket,
        cfg.public_base_url.clone(),
    )
    .await?;
    let namespace = Namespace::new(&cfg.namespace);

    match command {
        Command::Watch {
            watch_dir,
            debounce,
        } => watch(storage, namespace, &watch_dir, debounce).await,
        Command::Push { watch_dir, paths } => push(storage, namespace, &watch_dir, &paths).await,
        Command::Serve { host, port } => serve(storage, namespace, &host, port).await,
    }
}

fn build_coordinator(
    storage: StorageService,
    namespace: Namespace,
    watch_dir: &Path,
) -> Result<UploadCoordinator> {
    let root = WatchRoot::new(watch_dir)
        .with_context(|| format!("{} is not a usable watch directory", watch_dir.display()))?;
    Ok(
        UploadCoordinator::new(SyncContext::new(root.clone(), namespace), Arc::new(storage))
            .with_processor(HtmlLinkProcessor::new(root)),
    )
}

async fn watch(
    storage: StorageService,
    namespace: Namespace,
    watch_dir: &Path,
    debounce: Duration,
) -> Result<()> {
    let coordinator = build_coordinator(storage, namespace, watch_dir)?;
    let root = coordinator.context().watch_root.as_path().to_path_buf();
    let dispatcher = FsEventDispatcher::new(coordinator);
    tracing::info!(
        "Indexed {} files under {}",
        dispatcher.index().len(),
        root.display()
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    sync::run_watch(dispatcher, &root, debounce, shutdown).await?;
    Ok(())
}

async fn push(
    storage: StorageService,
    namespace: Namespace,
    watch_dir: &Path,
    paths: &[std::path::PathBuf],
) -> Result<()> {
    let mut coordinator = build_coordinator(storage, namespace, watch_dir)?;
    let mut failed = 0;

    for path in paths {
        let path = match fs::canonicalize(path) {
            Ok(path) => path,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "cannot upload");
                failed += 1;
                continue;
            }
        };

        let summary = coordinator.enqueue(&path).await?;
        for name in &summary.uploaded {
            println!("{}", coordinator.public_url(name));
        }
        failed += summary.failed;
    }

    if failed > 0 {
        anyhow::bail!("{} upload(s) failed", failed);
    }
    Ok(())
}

async fn serve(storage: StorageService, namespace: Namespace, host: &str, port: u16) -> Result<()> {
    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState { storage, namespace });

    // --- Start server ---
    let addr = format!("{}:{}", host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied && matches!(host, "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Cancel `token` on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    token.cancel();
}
