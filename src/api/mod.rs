pub mod handlers;
pub mod models;

use std::sync::Arc;

use anyhow::Result;
use axum::http::Method;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app::CacheService;
use crate::config::Settings;

use handlers::AppState;

/// 组装路由（独立出来便于测试直接挂载）
pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handlers::health))
        .route("/servers/live", get(handlers::servers_live))
        .route("/cache", get(handlers::cache_top))
        .route("/cache/raw", get(handlers::cache_raw))
        .route("/cache/base64", get(handlers::cache_base64))
        .route("/cache/all/base64", get(handlers::cache_all_base64))
        .route("/subscription/site-specific", get(handlers::site_specific))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// 启动 API 服务器并阻塞运行；收到 ctrl-c 后优雅退出，
/// 让在途批次的引擎子进程与临时配置随守卫一起回收
pub async fn serve(settings: &Settings, cache: Arc<CacheService>) -> Result<()> {
    let app = router(AppState { cache });

    let bind_addr = format!("{}:{}", settings.listen, settings.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
