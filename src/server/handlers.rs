//! Request handlers.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use crate::ingest::{IngestReport, UploadFile};
use crate::photo::{EventRecord, EventType, Photo, PhotoStatus};
use crate::storage::{EventFilter, Page, PhotoFilter, PhotoSort};

fn to_page(page: Option<u32>, per_page: Option<u32>) -> Page {
    let default = Page::default();
    Page::new(page.unwrap_or(default.number), per_page.unwrap_or(default.size))
}

/// `POST /api/photos`: multipart batch upload.
///
/// Every part's bytes are copied into an owned buffer here, before any
/// of them reaches the upload pool; the request body is gone by the
/// time uploads run.
pub async fn upload_photos(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReport>), ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue; // non-file parts are ignored
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("failed to read part {filename}: {e}")))?;

        files.push(UploadFile {
            original_filename: filename,
            content_type,
            bytes,
        });
    }

    let report = state.ingest.ingest_batch(files).await?;
    if report.all_failed() {
        return Err(
            ApiError::validation("every file in the batch was rejected")
                .with_details(json!({ "failures": report.rejected })),
        );
    }
    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Debug, Deserialize)]
pub struct ListPhotosParams {
    status: Option<String>,
    sort: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoListResponse {
    photos: Vec<Photo>,
    page: u32,
    per_page: u32,
    total: u64,
}

/// `GET /api/photos`: paged listing, soft-deleted rows excluded.
pub async fn list_photos(
    State(state): State<AppState>,
    Query(params): Query<ListPhotosParams>,
) -> Result<Json<PhotoListResponse>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            PhotoStatus::parse(s)
                .ok_or_else(|| ApiError::validation(format!("unknown status {s:?}")))
        })
        .transpose()?;
    let sort = match params.sort.as_deref() {
        None | Some("uploadedAt:desc") => PhotoSort::UploadedAtDesc,
        Some("uploadedAt:asc") => PhotoSort::UploadedAtAsc,
        Some("updatedAt:desc") => PhotoSort::UpdatedAtDesc,
        Some(other) => return Err(ApiError::validation(format!("unknown sort {other:?}"))),
    };

    let filter = PhotoFilter {
        status,
        include_deleted: false,
    };
    let page = to_page(params.page, params.per_page);
    let photos = state.store.list(filter.clone(), page, sort).await?;
    let total = state.store.count(&filter).await?;

    Ok(Json(PhotoListResponse {
        photos,
        page: page.number,
        per_page: page.size,
        total,
    }))
}

/// `GET /api/photos/{id}`: 404 when missing or soft-deleted.
pub async fn get_photo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Photo>, ApiError> {
    let photo = state
        .store
        .find_by_id(id)
        .await?
        .filter(|p| !p.is_deleted())
        .ok_or_else(|| ApiError::not_found(format!("photo {id} not found")))?;
    Ok(Json(photo))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    status: PhotoStatus,
    message: Option<String>,
}

/// `PATCH /api/photos/{id}/status`: internal transition endpoint,
/// subject to the lifecycle rules.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Photo>, ApiError> {
    if state.store.find_by_id(id).await?.is_none() {
        return Err(ApiError::not_found(format!("photo {id} not found")));
    }

    let message = request
        .message
        .unwrap_or_else(|| format!("Status set to {}", request.status));
    let updated = state
        .coordinator
        .transition(id, request.status, &message)
        .await?;

    match updated {
        Some(photo) => Ok(Json(photo)),
        // Suppressed (terminal) or raced with a delete: report current state.
        None => {
            let photo = state
                .store
                .find_by_id(id)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("photo {id} not found")))?;
            Ok(Json(photo))
        }
    }
}

/// `DELETE /api/photos/{id}`: soft delete. A concurrent update is
/// retried once inside the store; a vanished row is a no-op.
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/photos/{id}/permanent`: remove the row (events
/// cascade) and both blobs.
pub async fn delete_photo_permanently(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let Some(photo) = state.store.delete_permanently(id).await? else {
        return Err(ApiError::not_found(format!("photo {id} not found")));
    };

    // Blob cleanup is best-effort: the row is gone either way.
    if let Err(e) = state
        .blob
        .delete(crate::storage::Bucket::Originals, &photo.storage_path)
        .await
    {
        tracing::warn!("Failed to delete blob {}: {}", photo.storage_path, e);
    }
    if let Some(thumbnail) = &photo.thumbnail_path {
        if let Err(e) = state
            .blob
            .delete(crate::storage::Bucket::Thumbnails, thumbnail)
            .await
        {
            tracing::warn!("Failed to delete thumbnail {}: {}", thumbnail, e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollParams {
    since: DateTime<Utc>,
    /// Comma-separated id set to intersect with.
    photo_ids: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    photos: Vec<Photo>,
    /// Echo to thread into the next call's `since`.
    timestamp: DateTime<Utc>,
}

/// `GET /api/photos/poll?since=...&photoIds=a,b`: the fallback for
/// subscribers that cannot hold a live channel.
pub async fn poll_status(
    State(state): State<AppState>,
    Query(params): Query<PollParams>,
) -> Result<Json<PollResponse>, ApiError> {
    let ids = params
        .photo_ids
        .as_deref()
        .map(|list| {
            list.split(',')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    Uuid::parse_str(s.trim())
                        .map_err(|e| ApiError::validation(format!("bad photo id {s:?}: {e}")))
                })
                .collect::<Result<Vec<Uuid>, ApiError>>()
        })
        .transpose()?;

    let photos = state
        .store
        .find_updated_after(params.since, ids.as_deref())
        .await?;

    Ok(Json(PollResponse {
        photos,
        timestamp: Utc::now(),
    }))
}

/// `GET /api/photos/{id}/events`: full history, newest first.
pub async fn photo_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    if state.store.find_by_id(id).await?.is_none() {
        return Err(ApiError::not_found(format!("photo {id} not found")));
    }
    Ok(Json(state.events.list_by_photo(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListEventsParams {
    #[serde(rename = "photoId")]
    photo_id: Option<Uuid>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

/// `GET /api/events`: filtered event-log query.
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let event_type = params
        .event_type
        .as_deref()
        .map(|t| {
            EventType::parse(t)
                .ok_or_else(|| ApiError::validation(format!("unknown event type {t:?}")))
        })
        .transpose()?;

    let filter = EventFilter {
        photo_id: params.photo_id,
        event_type,
    };
    let events = state
        .events
        .list(filter, to_page(params.page, params.per_page))
        .await?;
    Ok(Json(events))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: &'static str,
}

/// `GET /health`: metadata-store connectivity probe.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "up",
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                database: "down",
            }),
        ),
    }
}
