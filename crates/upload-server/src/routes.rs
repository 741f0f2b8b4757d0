//! Request handlers and router assembly.

use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use slicedrop_chunk_store::{ChunkStore, StagedBlob};
use slicedrop_protocol::constants::{
    FIELD_CHUNK_BLOB, FIELD_CHUNK_ID, FIELD_CONTENT_HASH, FIELD_FILENAME, HEALTH_PATH,
    LEGACY_FIELD_CHUNK_BLOB, LEGACY_FIELD_CHUNK_ID, LEGACY_FIELD_CONTENT_HASH, MERGE_PATH,
    UPLOAD_CHUNK_PATH, VERIFY_PATH,
};
use slicedrop_protocol::{
    ChunkId, ContentHash, MergeRequest, MergeResponse, VerifyRequest, VerifyResponse,
};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::ApiError;

/// Builds the application router over `store`.
///
/// Request bodies above `max_body_bytes` are rejected before any handler
/// runs. Preflight requests from any origin are answered by the CORS layer.
pub fn router(store: Arc<ChunkStore>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(UPLOAD_CHUNK_PATH, post(upload_chunk))
        .route(VERIFY_PATH, post(verify))
        .route(MERGE_PATH, post(merge))
        .with_state(store)
        .route(HEALTH_PATH, get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
}

// ---------------------------------------------------------------------------
// Upload chunk
// ---------------------------------------------------------------------------

/// Fields collected from one multipart upload.
#[derive(Default)]
struct ChunkForm {
    blob: Option<StagedBlob>,
    chunk_id: Option<String>,
    content_hash: Option<String>,
    filename: Option<String>,
}

async fn upload_chunk(
    State(store): State<Arc<ChunkStore>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<&'static str, ApiError> {
    let multipart = multipart.map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "rejected chunk upload");
        ApiError::Chunk(rejection.body_text())
    })?;
    let form = read_chunk_form(&store, multipart).await.map_err(|reason| {
        warn!(%reason, "rejected chunk upload");
        ApiError::Chunk(reason)
    })?;

    let blob = form.blob.ok_or_else(|| missing(FIELD_CHUNK_BLOB))?;
    let chunk_id = form.chunk_id.ok_or_else(|| missing(FIELD_CHUNK_ID))?;
    let content_hash = form.content_hash.ok_or_else(|| missing(FIELD_CONTENT_HASH))?;
    let filename = form.filename.ok_or_else(|| missing(FIELD_FILENAME))?;

    let content_hash =
        ContentHash::parse(content_hash).map_err(|e| ApiError::Chunk(e.to_string()))?;
    let chunk_id = ChunkId::parse_for(&content_hash, &chunk_id).map_err(|e| {
        warn!(%content_hash, chunk_id, "rejected chunk upload");
        ApiError::Chunk(e.to_string())
    })?;

    let outcome = store
        .receive_chunk(blob, &chunk_id, &content_hash, &filename)
        .await
        .map_err(|e| {
            error!(%content_hash, %chunk_id, error = %e, "failed to store chunk");
            ApiError::Chunk(e.to_string())
        })?;

    Ok(outcome.as_str())
}

fn missing(field: &str) -> ApiError {
    warn!(field, "chunk upload missing field");
    ApiError::Chunk(format!("missing field {field}"))
}

/// Drains the multipart stream, streaming the blob into the staging area.
async fn read_chunk_form(store: &ChunkStore, mut multipart: Multipart) -> Result<ChunkForm, String> {
    let mut form = ChunkForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FIELD_CHUNK_BLOB | LEGACY_FIELD_CHUNK_BLOB => {
                form.blob = Some(stage_field(store, field).await?);
            }
            FIELD_CHUNK_ID | LEGACY_FIELD_CHUNK_ID => {
                form.chunk_id = Some(field.text().await.map_err(|e| e.to_string())?);
            }
            FIELD_CONTENT_HASH | LEGACY_FIELD_CONTENT_HASH => {
                form.content_hash = Some(field.text().await.map_err(|e| e.to_string())?);
            }
            FIELD_FILENAME => {
                form.filename = Some(field.text().await.map_err(|e| e.to_string())?);
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

async fn stage_field(store: &ChunkStore, mut field: Field<'_>) -> Result<StagedBlob, String> {
    let mut blob = store.stage().map_err(|e| e.to_string())?;
    while let Some(bytes) = field.chunk().await.map_err(|e| e.to_string())? {
        blob.write(&bytes).await.map_err(|e| e.to_string())?;
    }
    Ok(blob)
}

// ---------------------------------------------------------------------------
// Verify / merge
// ---------------------------------------------------------------------------

async fn verify(
    State(store): State<Arc<ChunkStore>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let resp = store.verify(&req.content_hash, &req.filename).await?;
    debug!(
        hash = %req.content_hash,
        should_upload = resp.should_upload,
        uploaded = resp.uploaded_list.as_ref().map_or(0, Vec::len),
        "verify"
    );
    Ok(Json(resp))
}

async fn merge(
    State(store): State<Arc<ChunkStore>>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, ApiError> {
    let report = store
        .merge(&req.content_hash, &req.filename, req.chunk_size)
        .await
        .map_err(|e| {
            error!(hash = %req.content_hash, error = %e, "merge failed");
            ApiError::Merge(e)
        })?;

    if report.already_merged {
        info!(hash = %req.content_hash, "merge requested for existing file");
    }
    Ok(Json(MergeResponse::success()))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "slicedrop"
    }))
}
