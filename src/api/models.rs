use serde::{Deserialize, Serialize};

use crate::server::ServerDescriptor;

/// GET /health 响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// 节点列表响应（/servers/live 与 /cache）
#[derive(Serialize)]
pub struct ServerListResponse {
    pub count: usize,
    pub servers: Vec<ServerDescriptor>,
}

/// 错误响应体
#[derive(Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// GET /subscription/site-specific 查询参数
#[derive(Deserialize)]
pub struct SiteQuery {
    pub url: String,
}
