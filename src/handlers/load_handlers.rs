//! Read path: serves published objects back over HTTP.
//!
//! `/load/{*path}` resolves names with the same `<namespace>/<path>`
//! convention the uploader uses; `/objects/{*key}` addresses an object name
//! directly and is what `public_url` points at. Bodies are streamed from
//! disk, and only public objects are served.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        content::ContentTypeInfo,
        object::Object,
        object_name::{Namespace, ObjectName},
    },
    services::storage_service::StorageService,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

const INDEX_DOCUMENT: &str = "index.html";

/// `GET /load/{*path}`
pub async fn load(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let name = read_path_object_name(&state.namespace, &path);
    serve_object(&state.storage, &name).await
}

/// `GET /load/` — the namespace's index document.
pub async fn load_index(State(state): State<AppState>) -> Result<Response, AppError> {
    let name = read_path_object_name(&state.namespace, "");
    serve_object(&state.storage, &name).await
}

/// `GET /objects/{*key}`
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    serve_object(&state.storage, &ObjectName::new(key)).await
}

/// `GET /test/{*path}` — echo the path and the type it would be served as.
pub async fn probe(Path(path): Path<String>) -> impl IntoResponse {
    let info = ContentTypeInfo::guess(std::path::Path::new(&path));
    (
        [(header::CONTENT_TYPE, "text/plain")],
        format!(
            "You've entered: {}\n{}",
            path,
            info.mime_type.as_deref().unwrap_or("unknown")
        ),
    )
}

/// Object name for a requested read path. A last segment without a `.`
/// is taken to be a directory and gets `index.html` appended.
pub fn read_path_object_name(namespace: &Namespace, requested: &str) -> ObjectName {
    let requested = requested.trim_matches('/');
    let last_segment = requested.rsplit('/').next().unwrap_or_default();

    if requested.is_empty() {
        namespace.apply(INDEX_DOCUMENT)
    } else if !last_segment.contains('.') {
        namespace.apply(&format!("{}/{}", requested, INDEX_DOCUMENT))
    } else {
        namespace.apply(requested)
    }
}

async fn serve_object(storage: &StorageService, name: &ObjectName) -> Result<Response, AppError> {
    let (meta, file) = storage.get_object_reader(name.as_str(), true).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if content_type == "application/pdf" {
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    }

    if let Some(encoding) = meta.content_encoding.as_deref() {
        if let Ok(value) = HeaderValue::from_str(encoding) {
            headers.insert(header::CONTENT_ENCODING, value);
        }
    }

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0)),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
