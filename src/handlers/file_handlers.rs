//! HTTP handler for serving hosted files.
//!
//! This is the surface the range contract binds: 200 with the full body,
//! 206 with `Content-Range` for a valid range, 416 for an unsatisfiable
//! one, 404 when no record matches. Bodies are streamed, never buffered
//! here.

use crate::errors::AppError;
use crate::services::file_service::{FileService, ServeOutcome};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};

/// Hosted content is immutable under its URL; a relocate changes the URL.
const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

/// GET `/f/{*path}` — stream a file, honoring a `Range` header.
pub async fn serve_file(
    State(service): State<FileService>,
    Path(path): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Response, AppError> {
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match service.open_file(&path, range_header.as_deref()).await? {
        ServeOutcome::Unsatisfiable { total } => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            let resp_headers = response.headers_mut();
            resp_headers.insert(
                header::CONTENT_RANGE,
                header_value(&format!("bytes */{total}")),
            );
            resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            Ok(response)
        }
        ServeOutcome::Stream { record, resolved } => {
            let status = if resolved.range.is_some() {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };

            let mut response = Response::new(Body::from_stream(resolved.stream));
            *response.status_mut() = status;
            let resp_headers = response.headers_mut();

            let content_type = record
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into());
            resp_headers.insert(header::CONTENT_TYPE, header_value(&content_type));
            resp_headers.insert(
                header::CONTENT_LENGTH,
                header_value(&resolved.content_length.to_string()),
            );
            if let Some(range) = resolved.range {
                resp_headers.insert(
                    header::CONTENT_RANGE,
                    header_value(&format!(
                        "bytes {}-{}/{}",
                        range.start, range.end, resolved.total_len
                    )),
                );
            }
            resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            resp_headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(IMMUTABLE_CACHE),
            );
            Ok(response)
        }
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}
