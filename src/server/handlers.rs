//! Route handlers. Each one is a thin shim over a [`crate::Pipeline`] call.

use axum::extract::{Multipart, Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::error::ApiError;
use super::extract::Owner;
use super::AppState;
use crate::output::{DeckListing, DeckUpload, SetRequest, SharedFile, SlideSetSummary, SlideView};
use crate::pipeline::input;
use crate::progress::{JobId, JobProgress};
use crate::storage::attachment_disposition;

/// Response to an accepted upload.
#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub job_id: JobId,
    pub status_url: String,
}

// ── Health ───────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "storage": state.pipeline.store().backend(),
        "jobs": state.progress.len(),
    }))
}

// ── Decks ────────────────────────────────────────────────────────────────

/// `POST /api/decks`: accept a deck in the `file` multipart field and start
/// converting it in the background.
pub async fn upload_deck(
    State(state): State<AppState>,
    Owner(owner): Owner,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), ApiError> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("No file provided in upload".into()))?;

    // Reject obvious garbage before a job exists for it.
    input::validate_upload(&filename, &bytes, state.pipeline.config().max_upload_bytes)?;

    let job_id = state.progress.register(&owner);
    let reporter = state.progress.reporter(job_id);
    let pipeline = state.pipeline.clone();
    let cancel = state.cancel.clone();
    info!("Queued job {} for {} ('{}', {} bytes)", job_id, owner, filename, bytes.len());

    state.jobs.spawn(async move {
        let upload = DeckUpload {
            owner,
            filename,
            bytes,
        };
        // Outcome is recorded by the reporter.
        let _ = pipeline.convert_deck_until(upload, &reporter, &cancel).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            job_id,
            status_url: format!("/api/jobs/{job_id}"),
        }),
    ))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(format!("Failed to read multipart field: {}", e.body_text()))
    }
}

/// `GET /api/jobs/:job_id`
pub async fn job_status(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobProgress>, ApiError> {
    state
        .progress
        .get(job_id)
        .filter(|job| job.owner == owner)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".into()))
}

/// `GET /api/decks`
pub async fn list_decks(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<DeckListing>>, ApiError> {
    Ok(Json(state.pipeline.list_decks(&owner).await?))
}

/// `GET /api/decks/:deck_id/slides`
pub async fn list_slides(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(deck_id): Path<i64>,
) -> Result<Json<Vec<SlideView>>, ApiError> {
    Ok(Json(state.pipeline.list_slides(&owner, deck_id).await?))
}

/// `GET /api/decks/:deck_id/download`
pub async fn download_deck(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(deck_id): Path<i64>,
) -> Result<Response, ApiError> {
    let file = state.pipeline.download_deck(&owner, deck_id).await?;
    Ok(pdf_response(file))
}

/// `DELETE /api/decks/:deck_id`
pub async fn delete_deck(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(deck_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.pipeline.delete_deck(&owner, deck_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Slide sets ───────────────────────────────────────────────────────────

/// `POST /api/decks/:deck_id/sets`
pub async fn create_set(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(deck_id): Path<i64>,
    Json(request): Json<SetRequest>,
) -> Result<(StatusCode, Json<SlideSetSummary>), ApiError> {
    let summary = state.pipeline.create_slide_set(&owner, deck_id, request).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// `DELETE /api/sets/:set_id`
pub async fn delete_set(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(set_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.pipeline.delete_set(&owner, set_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Public links ─────────────────────────────────────────────────────────

/// `GET /s/:link_kind/:code`: no authentication.
pub async fn share_link(
    State(state): State<AppState>,
    Path((link_kind, code)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let file = state.pipeline.open_share(&link_kind, &code).await?;
    Ok(pdf_response(file))
}

/// Stream a PDF as a never-cached attachment, or redirect to its signed URL
/// when the bytes could not be read.
fn pdf_response(file: SharedFile) -> Response {
    let Some(bytes) = file.bytes else {
        return Redirect::temporary(&file.fallback_url).into_response();
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    match HeaderValue::from_str(&attachment_disposition(&file.filename)) {
        Ok(v) => {
            headers.insert(header::CONTENT_DISPOSITION, v);
        }
        Err(e) => warn!("Dropping Content-Disposition for '{}': {}", file.filename, e),
    }
    (headers, bytes).into_response()
}

/// `GET /blobs/*name`: serve a local-backend blob after checking its token.
pub async fn serve_blob(
    State(state): State<AppState>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let store = state
        .local_blobs
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("File not found".into()))?;

    let access = store.verify(&name, query.as_deref().unwrap_or(""), Utc::now())?;
    if !access.permissions.read {
        return Err(ApiError::Forbidden("token does not grant read access".into()));
    }

    let (bytes, meta) = store.read_with_meta(&name).await?;
    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&meta.content_type)
        .map_err(|e| ApiError::Internal(format!("bad stored content type: {e}")))?;
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(disposition) = access.content_disposition.or(meta.content_disposition) {
        let value = HeaderValue::from_str(&disposition)
            .map_err(|_| ApiError::BadRequest("invalid content disposition".into()))?;
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((headers, bytes).into_response())
}
