//! HTTP API 端点集成测试
//!
//! 启动真实的 axum 服务器（随机端口），按外部接口契约逐项验证状态码
//! 与载荷。探测路径指向不存在的引擎二进制，因此不会有真实网络探测。

use std::sync::Arc;

use base64::Engine as _;
use rayscan::api::handlers::AppState;
use rayscan::app::{CacheService, Evaluator};
use rayscan::config::Settings;
use rayscan::geo::GeoIp;
use rayscan::server::parser::parse_uri;
use rayscan::server::ServerDescriptor;
use rayscan::store::KvStore;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.sub_urls = Vec::new();
    settings.xray_path = "/nonexistent/rayscan-test-xray".to_string();
    settings.batch_size = 10;
    settings.test_timeout_secs = 1;
    settings
}

fn sample_servers(n: usize) -> Vec<ServerDescriptor> {
    (0..n)
        .map(|i| {
            parse_uri(&format!(
                "trojan://pw@host{}.example:443?sni=host{}.example#Node{}",
                i, i, i
            ))
            .unwrap()
        })
        .collect()
}

async fn start_test_api(settings: Settings) -> (String, Arc<CacheService>) {
    let settings = Arc::new(settings);
    let evaluator = Evaluator::new(settings.clone(), Arc::new(GeoIp::disabled()));
    let cache = Arc::new(CacheService::new(
        settings,
        evaluator,
        KvStore::disabled(),
        None,
    ));

    let app = rayscan::api::router(AppState {
        cache: cache.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), cache)
}

#[tokio::test]
async fn health_endpoint() {
    let (base, _cache) = start_test_api(test_settings()).await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn cache_endpoints_report_not_ready_before_first_refresh() {
    let (base, _cache) = start_test_api(test_settings()).await;

    for path in ["/cache", "/cache/raw", "/cache/base64", "/cache/all/base64"] {
        let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
        assert_eq!(resp.status(), 503, "path {}", path);
    }

    let resp = reqwest::get(format!("{}/cache", base)).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("not initialized"));
}

#[tokio::test]
async fn cache_endpoints_serve_restored_working_set() {
    let (base, cache) = start_test_api(test_settings()).await;
    cache.restore(sample_servers(30)).await;

    // /cache 返回头部 25 条
    let resp = reqwest::get(format!("{}/cache", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 25);
    assert_eq!(body["servers"].as_array().unwrap().len(), 25);
    assert_eq!(body["servers"][0]["protocol"], "trojan");

    // /cache/raw 为纯文本逐行链接
    let resp = reqwest::get(format!("{}/cache/raw", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let raw = resp.text().await.unwrap();
    assert_eq!(raw.lines().count(), 25);
    assert!(raw.lines().all(|l| l.starts_with("trojan://")));

    // /cache/base64 解码后与 raw 一致
    let resp = reqwest::get(format!("{}/cache/base64", base)).await.unwrap();
    let encoded = resp.text().await.unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&decoded), raw);

    // /cache/all/base64 包含全量 30 条
    let resp = reqwest::get(format!("{}/cache/all/base64", base)).await.unwrap();
    let encoded = resp.text().await.unwrap();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&decoded).lines().count(), 30);
}

#[tokio::test]
async fn live_endpoint_returns_unavailable_when_nothing_works() {
    // 无订阅源 ⇒ 评估产出为空 ⇒ 503；不得写缓存
    let (base, cache) = start_test_api(test_settings()).await;
    let resp = reqwest::get(format!("{}/servers/live", base)).await.unwrap();
    assert_eq!(resp.status(), 503);
    assert!(cache.cached_all().await.is_none());
}

#[tokio::test]
async fn site_specific_not_ready_then_no_reachable() {
    let mut settings = test_settings();
    settings.site_cache_ttl_secs = 3600;
    let (base, cache) = start_test_api(settings).await;
    let url = format!(
        "{}/subscription/site-specific?url=https%3A%2F%2Fwww.example.com",
        base
    );

    // 缓存未填充 ⇒ 503
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 503);

    // 填充后：引擎缺失 ⇒ 没有节点可达目标站点 ⇒ 404
    cache.restore(sample_servers(2)).await;
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("www.example.com"));
}

#[tokio::test]
async fn site_specific_requires_url_parameter() {
    let (base, _cache) = start_test_api(test_settings()).await;
    let resp = reqwest::get(format!("{}/subscription/site-specific", base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
