//! HTTP surface for the feed screen: load the feed, report rendered items,
//! toggle translation mode, and inspect or clear stored translations.

use crate::error::AppError;
use crate::feed::{FeedItem, FeedLoader};
use crate::security::api_key_allows;
use crate::translation::TranslationQueue;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub queue: TranslationQueue<FeedItem>,
    pub loader: Arc<FeedLoader>,
    pub api_key: Option<String>,
}

/// Error answered to HTTP clients.
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    /// A failed call to a hosted backend. User-facing errors keep their own
    /// status; everything else is a bad gateway.
    fn upstream(error: anyhow::Error) -> Self {
        let status = app_error_status(&error).unwrap_or(StatusCode::BAD_GATEWAY);
        Self { status, error }
    }

    fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            error: anyhow::anyhow!("{}", message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = app_error_status(&error).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, error }
    }
}

fn app_error_status(error: &anyhow::Error) -> Option<StatusCode> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<AppError>())
        .and_then(|e| StatusCode::from_u16(e.status_code()).ok())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {:#}", self.error);
        } else {
            warn!("Request rejected: {:#}", self.error);
        }
        let body = Json(json!({ "error": self.error.to_string() }));
        (self.status, body).into_response()
    }
}

/// One feed item as the client renders it.
#[derive(Debug, Serialize)]
pub struct FeedEntry {
    #[serde(flatten)]
    pub item: FeedItem,
    /// Text to show for posts; absent for clips
    pub display_text: Option<String>,
    /// A translation request for this item is outstanding
    pub translating: bool,
    /// Preview image for clips
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl FeedEntry {
    fn render(queue: &TranslationQueue<FeedItem>, item: FeedItem) -> Self {
        let thumbnail_url = match &item {
            FeedItem::Clip(clip) => Some(clip.thumbnail_url()),
            FeedItem::Post(_) => None,
        };
        Self {
            display_text: queue.display_text(item.id()),
            translating: queue.is_translating(item.id()),
            thumbnail_url,
            item,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslationModeRequest {
    pub enabled: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/feed", get(get_feed))
        .route("/feed/refresh", post(refresh_feed))
        .route("/feed/:id/rendered", post(mark_rendered))
        .route("/translation-mode", put(set_translation_mode))
        .route("/translations/metrics", get(translation_metrics))
        .route("/translations", delete(clear_translations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);
    axum::serve(listener, router(state))
        .await
        .context("HTTP server error")
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "fanfeed",
        "timestamp": chrono::Utc::now().timestamp()
    }))
}

async fn get_feed(State(state): State<AppState>) -> Json<Value> {
    let queue = &state.queue;
    let items: Vec<FeedEntry> = queue
        .items()
        .into_iter()
        .map(|item| FeedEntry::render(queue, item))
        .collect();
    let posts = items.iter().filter(|entry| entry.item.is_post()).count();

    Json(json!({
        "translation_mode": queue.translation_enabled(),
        "posts": posts,
        "clips": items.len() - posts,
        "items": items,
    }))
}

async fn refresh_feed(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let items = state.loader.load_mixed().await.map_err(ApiError::upstream)?;
    let count = items.len();
    state.queue.replace_items(items);
    info!("Feed refreshed with {} items", count);
    Ok(Json(json!({ "count": count })))
}

async fn mark_rendered(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.queue.with_item(&id, |_| ()).is_none() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Unknown feed item"));
    }
    let pass_started = state.queue.mark_rendered(&id).is_some();
    Ok(Json(json!({ "id": id, "pass_started": pass_started })))
}

async fn set_translation_mode(
    State(state): State<AppState>,
    Json(request): Json<TranslationModeRequest>,
) -> Json<Value> {
    let pass_started = state.queue.set_translation_mode(request.enabled).is_some();
    Json(json!({ "enabled": request.enabled, "pass_started": pass_started }))
}

async fn translation_metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "cached_translations": state.queue.cache().len(),
        "draining": state.queue.is_draining(),
        "metrics": state.queue.metrics(),
    }))
}

async fn clear_translations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    if !api_key_allows(state.api_key.as_deref(), provided) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid API key"));
    }
    state.queue.clear_translations().await?;
    Ok(StatusCode::NO_CONTENT)
}
