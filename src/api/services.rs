use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;

use super::{
    models::{
        CreatePostRequest, DeleteResponse, HealthResponse, ListQuery, ListResponse, PostResponse,
        PruneQuery,
    },
    state::AppState,
    utils::{principal, read_limited},
    validation::validate_post,
};
use crate::api::error::ApiError;
use crate::content::ContentItem;
use crate::lifecycle::NewPost;

/// Create a post (POST /posts)
///
/// ## Flow:
/// 1. Validate Content-Type and the principal header
/// 2. Read the body (already decompressed by middleware), stopping at the size limit
/// 3. Validate fields and decode base64 images
/// 4. Upload images, then write the row with `expires_at = now + TTL`
/// 5. Return 201 with resolved image URLs
pub async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let owner_id = principal(&headers)?;

    let limits = &state.config.server.api;
    let body_bytes = read_limited(body, limits.max_payload_bytes.as_usize()).await?;
    let request: CreatePostRequest = serde_json::from_slice(&body_bytes)?;
    let images = validate_post(&request, limits).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let created = state
        .lifecycle
        .creator
        .create(NewPost {
            owner_id,
            title: request.title,
            body: request.body,
            category: request.category,
            images,
        })
        .await?;
    state.metrics.post_created();

    Ok((StatusCode::CREATED, Json(to_response(&state, created.item))))
}

/// List live posts (GET /posts?owner_id=&category=)
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.lifecycle.list_live(
        query.owner_id.as_deref(),
        query.category.as_deref(),
        Utc::now(),
    )?;

    let posts: Vec<PostResponse> = items.into_iter().map(|item| to_response(&state, item)).collect();
    Ok(Json(ListResponse {
        count: posts.len(),
        posts,
    }))
}

/// Fetch one live post (GET /posts/{post_id})
pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.lifecycle.get_live(&post_id, Utc::now())?;
    Ok(Json(to_response(&state, item)))
}

/// Owner delete (DELETE /posts/{post_id})
///
/// Storage failures are not reported here: the row goes regardless and the
/// leftover objects are queued for the drain job.
pub async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = principal(&headers)?;
    state.lifecycle.deleter.delete(&post_id, &principal).await?;
    state.metrics.post_deleted();

    Ok(Json(DeleteResponse { ok: true }))
}

/// Trigger a prune run (POST /operators/prune?dry_run=bool)
pub async fn prune(
    State(state): State<AppState>,
    Query(query): Query<PruneQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match state.lifecycle.prune.run(query.dry_run).await {
        Ok(report) => {
            state.metrics.record_prune(&report);
            Ok(Json(report))
        }
        Err(e) => {
            state.metrics.job_failed();
            Err(e.into())
        }
    }
}

/// Trigger a drain run (POST /operators/drain)
pub async fn drain(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    match state.lifecycle.drain.run().await {
        Ok(report) => {
            state.metrics.record_drain(&report);
            Ok(Json(report))
        }
        Err(e) => {
            state.metrics.job_failed();
            Err(e.into())
        }
    }
}

/// Health check endpoint (GET /health, GET /operators/health)
///
/// Returns 503 Service Unavailable if the post store or the deletion queue
/// cannot be read. Storage is not probed.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let lifecycle = &state.lifecycle;
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let stats = lifecycle.store.stats();
    components.insert("post_store".to_string(), status_of(&stats));

    let queued = lifecycle.queue.len();
    components.insert("deletion_queue".to_string(), status_of(&queued));

    components.insert(
        "storage".to_string(),
        format!("configured ({})", lifecycle.storage.default_namespace()),
    );

    let all_healthy = stats.is_ok() && queued.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        posts: stats.ok().map(|s| s.post_count),
        queued_removals: queued.ok(),
        last_prune: lifecycle.store.last_prune().ok().flatten(),
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}

fn status_of<T, E: std::fmt::Display>(result: &Result<T, E>) -> String {
    match result {
        Ok(_) => "healthy".to_string(),
        Err(e) => format!("unhealthy: {e}"),
    }
}

fn to_response(state: &AppState, item: ContentItem) -> PostResponse {
    let expires_at = state.lifecycle.policy.effective_expiry(&item);
    PostResponse::from_item(item, expires_at, state.lifecycle.storage.as_ref())
}
