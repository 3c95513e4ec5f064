use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use tracing::info;

use crate::app::cache::{joined_raw_uris, CacheService, LiveOutcome, SiteOutcome};
use crate::server::ServerDescriptor;

use super::models::*;

/// 共享应用状态
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /servers/live — 现场评估，不写缓存
pub async fn servers_live(State(state): State<AppState>) -> Response {
    match state.cache.live_top().await {
        LiveOutcome::Busy => error(StatusCode::TOO_MANY_REQUESTS, "A test is already in progress."),
        LiveOutcome::Empty => error(
            StatusCode::SERVICE_UNAVAILABLE,
            "No servers available or all tests failed.",
        ),
        LiveOutcome::Ready(servers) => Json(ServerListResponse {
            count: servers.len(),
            servers,
        })
        .into_response(),
    }
}

/// GET /cache — 缓存的头部节点
pub async fn cache_top(State(state): State<AppState>) -> Response {
    match state.cache.cached_top().await {
        Some(servers) => Json(ServerListResponse {
            count: servers.len(),
            servers,
        })
        .into_response(),
        None => not_ready(),
    }
}

/// GET /cache/raw — 纯文本原始链接
pub async fn cache_raw(State(state): State<AppState>) -> Response {
    match state.cache.cached_top().await {
        Some(servers) => plain_text(joined_raw_uris(&servers)),
        None => not_ready(),
    }
}

/// GET /cache/base64 — Base64 订阅（头部）
pub async fn cache_base64(State(state): State<AppState>) -> Response {
    match state.cache.cached_top().await {
        Some(servers) => plain_text(encode_subscription(&servers)),
        None => not_ready(),
    }
}

/// GET /cache/all/base64 — Base64 订阅（全量）
pub async fn cache_all_base64(State(state): State<AppState>) -> Response {
    match state.cache.cached_all().await {
        Some(servers) => plain_text(encode_subscription(&servers)),
        None => not_ready(),
    }
}

/// GET /subscription/site-specific?url=…
pub async fn site_specific(
    State(state): State<AppState>,
    Query(query): Query<SiteQuery>,
) -> Response {
    match state.cache.site_specific_servers(&query.url).await {
        SiteOutcome::Busy => error(
            StatusCode::TOO_MANY_REQUESTS,
            "A test is already in progress. Please wait.",
        ),
        SiteOutcome::NotReady => error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache is empty. Please wait for it to populate.",
        ),
        SiteOutcome::Ready(servers) if servers.is_empty() => error(
            StatusCode::NOT_FOUND,
            &format!("No servers could successfully access {}.", query.url),
        ),
        SiteOutcome::Ready(servers) => {
            info!(url = query.url, count = servers.len(), "site-specific subscription served");
            plain_text(encode_subscription(&servers))
        }
    }
}

fn encode_subscription(servers: &[ServerDescriptor]) -> String {
    base64::engine::general_purpose::STANDARD.encode(joined_raw_uris(servers))
}

fn plain_text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn not_ready() -> Response {
    error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Cache not initialized. Please wait or try the /servers/live endpoint.",
    )
}

fn error(status: StatusCode, detail: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.to_string(),
        }),
    )
        .into_response()
}
