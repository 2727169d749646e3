//! Defines routes for the file-serving and management surfaces.
//!
//! ## Structure
//! - **Serving**
//!   - `GET    /f/{*path}` — stream a file (supports `Range`)
//!
//! - **Management API**
//!   - `POST   /api/upload` — multipart upload
//!   - `GET    /api/files?chat_id=` — list an owner's files
//!   - `GET    /api/files/search?q=` — name substring search
//!   - `DELETE /api/files/{id}` — delete file + blobs
//!   - `PATCH  /api/files/{id}/suffix` — rename/relocate
//!   - `PATCH  /api/files/{id}/category` — reassign category
//!   - `GET/POST /api/categories`, `DELETE /api/categories/{id}`
//!   - `GET    /api/stats?chat_id=` — per-owner aggregates
//!   - `GET/PATCH /api/settings/{chat_id}` — owner preferences
//!
//! The wildcard `*path` allows dotted suffixes like `a1b2c3d4.mp4`.

use crate::{
    handlers::{
        api_handlers::{
            create_category, delete_category, delete_file, get_settings, list_categories,
            list_files, owner_stats, recategorize_file, rename_file, search_files,
            update_settings, upload_file,
        },
        file_handlers::serve_file,
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
};

/// Uploads may exceed the chunk threshold several times over.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Build and return the router for all routes.
///
/// The router carries shared state (`FileService`) to all handlers.
pub fn routes() -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // management API
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/files", get(list_files))
        .route("/api/files/search", get(search_files))
        .route("/api/files/{id}", delete(delete_file))
        .route("/api/files/{id}/suffix", patch(rename_file))
        .route("/api/files/{id}/category", patch(recategorize_file))
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/api/categories/{id}", delete(delete_category))
        .route("/api/stats", get(owner_stats))
        .route(
            "/api/settings/{chat_id}",
            get(get_settings).patch(update_settings),
        )
        // file serving
        .route("/f/{*path}", get(serve_file))
}
