//! Thin JSON/multipart API over `FileService`.
//!
//! No logic lives here beyond extraction; every decision belongs to the
//! service. Responses are the model types serialized directly.

use crate::errors::AppError;
use crate::models::file::StorageKind;
use crate::services::file_service::{FileService, UploadRequest};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub suffix: String,
}

#[derive(Debug, Deserialize)]
pub struct RecategorizeReq {
    pub category_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsReq {
    pub storage: Option<StorageKind>,
    pub category_id: Option<i64>,
}

/// POST `/api/upload` — multipart upload.
///
/// Expects a `file` part plus optional `chat_id`, `suffix`, `category_id`
/// and `storage` text parts.
pub async fn upload_file(
    State(service): State<FileService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut bytes: Option<Bytes> = None;
    let mut file_name = String::from("upload.bin");
    let mut content_type = String::from("application/octet-stream");
    let mut chat_id = String::from("anonymous");
    let mut suffix: Option<String> = None;
    let mut category_id: Option<i64> = None;
    let mut storage: Option<StorageKind> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                if let Some(name) = field.file_name() {
                    file_name = name.to_string();
                }
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?,
                );
            }
            "chat_id" => chat_id = read_text(field).await?,
            "suffix" => suffix = Some(read_text(field).await?),
            "category_id" => {
                let raw = read_text(field).await?;
                category_id = Some(raw.parse().map_err(|_| {
                    AppError::new(StatusCode::BAD_REQUEST, "category_id must be an integer")
                })?);
            }
            "storage" => {
                let raw = read_text(field).await?;
                storage = Some(raw.parse().map_err(|_| {
                    AppError::new(StatusCode::BAD_REQUEST, "unknown storage backend")
                })?);
            }
            _ => {}
        }
    }

    let bytes = bytes
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing `file` part"))?;
    let record = service
        .upload(UploadRequest {
            bytes,
            file_name,
            content_type,
            chat_id,
            custom_suffix: suffix,
            category_id,
            storage,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))
}

/// GET `/api/files?chat_id=` — an owner's files, most recent first.
pub async fn list_files(
    State(service): State<FileService>,
    Query(q): Query<OwnerQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.files_by_owner(&q.chat_id).await?))
}

/// GET `/api/files/search?q=` — case-insensitive name substring search.
pub async fn search_files(
    State(service): State<FileService>,
    Query(q): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.search_files(&q.q).await?))
}

/// DELETE `/api/files/{id}`.
pub async fn delete_file(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_file(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH `/api/files/{id}/suffix` — the rename/relocate workflow.
pub async fn rename_file(
    State(service): State<FileService>,
    Path(id): Path<i64>,
    Json(req): Json<RenameReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.relocate(id, &req.suffix).await?))
}

/// PATCH `/api/files/{id}/category`.
pub async fn recategorize_file(
    State(service): State<FileService>,
    Path(id): Path<i64>,
    Json(req): Json<RecategorizeReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.set_file_category(id, req.category_id).await?))
}

/// GET `/api/categories`.
pub async fn list_categories(
    State(service): State<FileService>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.list_categories().await?))
}

/// POST `/api/categories`.
pub async fn create_category(
    State(service): State<FileService>,
    Json(req): Json<CreateCategoryReq>,
) -> Result<impl IntoResponse, AppError> {
    let category = service.create_category(&req.name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// DELETE `/api/categories/{id}` — rejected for the default category;
/// everything filed under the deleted one moves to the default.
pub async fn delete_category(
    State(service): State<FileService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/stats?chat_id=`.
pub async fn owner_stats(
    State(service): State<FileService>,
    Query(q): Query<OwnerQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.owner_overview(&q.chat_id).await?))
}

/// GET `/api/settings/{chat_id}`.
pub async fn get_settings(
    State(service): State<FileService>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.setting_for(&chat_id).await?))
}

/// PATCH `/api/settings/{chat_id}`.
pub async fn update_settings(
    State(service): State<FileService>,
    Path(chat_id): Path<String>,
    Json(req): Json<UpdateSettingsReq>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        service
            .set_preferences(&chat_id, req.storage, req.category_id)
            .await?,
    ))
}
