//! HTTP handlers for the CDN front end.

pub mod health_handlers;
pub mod load_handlers;

use crate::{models::object_name::Namespace, services::storage_service::StorageService};

/// Shared state for every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub storage: StorageService,
    /// Namespace the `/load` read path resolves names in.
    pub namespace: Namespace,
}
