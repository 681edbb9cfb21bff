//! Routes for the CDN read path.
//!
//! - `GET /healthz`, `GET /readyz` — probes
//! - `GET /objects/{*key}` — a public object by its full name (what
//!   `public_url` hands out)
//! - `GET /load/` and `GET /load/{*path}` — namespace-relative reads with
//!   `index.html` fallback for directory-like paths
//! - `GET /test/{*path}` — echoes the path and its guessed type
//!
//! The wildcard segments allow nested names like `site/img/logo.png`.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    load_handlers::{get_object, load, load_index, probe},
};
use axum::{Router, routing::get};

/// Build the router; state is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects/{*key}", get(get_object))
        .route("/load/", get(load_index))
        .route("/load/{*path}", get(load))
        .route("/test/{*path}", get(probe))
}
