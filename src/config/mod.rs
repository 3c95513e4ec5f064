pub mod types;

use std::path::Path;

use anyhow::Result;
use tracing::info;

pub use types::Settings;

/// 加载配置：YAML 文件（存在则读）+ 环境变量覆盖
pub fn load_settings(path: &str) -> Result<Settings> {
    let mut settings = if Path::new(path).exists() {
        let content = std::fs::read_to_string(path)?;
        serde_yml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("config file '{}' is invalid: {}", path, e))?
    } else {
        info!(path, "config file not found, using defaults");
        Settings::default()
    };

    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// 环境变量覆盖；变量名沿用部署惯例（全大写）
fn apply_env_overrides(settings: &mut Settings) {
    // SUB_URL 为单 URL 的旧名
    if let Some(v) = env_var("SUB_URLS").or_else(|| env_var("SUB_URL")) {
        settings.sub_urls = parse_list(&v);
    }
    if let Some(v) = env_var("LATENCY_TEST_URL") {
        settings.latency_test_url = v;
    }
    set_parsed(&mut settings.batch_size, "BATCH_SIZE");
    set_parsed(&mut settings.base_port, "BASE_PORT");
    set_parsed(&mut settings.test_timeout_secs, "TEST_TIMEOUT");
    set_parsed(&mut settings.max_delay_ms, "MAX_DELAY_MS");
    set_parsed(&mut settings.cache_interval_secs, "CACHE_INTERVAL_SECONDS");
    set_parsed(&mut settings.site_cache_ttl_secs, "SITE_CACHE_TTL_SECONDS");
    if let Some(v) = env_var("PRECHECK_SITES") {
        settings.precheck_sites = parse_list(&v);
    }
    if let Some(v) = env_var("LOW_INTERNET_CONS") {
        settings.low_internet_cons = parse_bool(&v);
    }
    set_parsed(&mut settings.low_internet_limit, "LOW_INTERNET_LIMIT");
    if let Some(v) = env_var("XRAY_PATH") {
        settings.xray_path = v;
    }
    if let Some(v) = env_var("XRAY_ASSETS_PATH") {
        settings.xray_assets_path = v;
    }
    if let Some(v) = env_var("GEOIP_DB_PATH") {
        settings.geoip_db_path = v;
    }
    if let Some(v) = env_var("GEOIP_DOWNLOAD_URL") {
        settings.geoip_download_url = v;
    }
    if let Some(v) = env_var("LISTEN_HOST") {
        settings.listen = v;
    }
    set_parsed(&mut settings.port, "LISTEN_PORT");

    if let Some(v) = env_var("REDIS_HOST") {
        settings.redis.host = v;
    }
    set_parsed(&mut settings.redis.port, "REDIS_PORT");
    set_parsed(&mut settings.redis.db, "REDIS_DB");
    if let Some(v) = env_var("REDIS_PASSWORD") {
        settings.redis.password = v;
    }

    if let Some(v) = env_var("GITHUB_PUSH_ENABLED") {
        settings.publish.enabled = parse_bool(&v);
    }
    if let Some(v) = env_var("GITHUB_TOKEN") {
        settings.publish.token = v;
    }
    if let Some(v) = env_var("GITHUB_REPO_URL") {
        settings.publish.repo_url = v;
    }
    if let Some(v) = env_var("GITHUB_USER") {
        settings.publish.user = v;
    }
    if let Some(v) = env_var("GITHUB_EMAIL") {
        settings.publish.email = v;
    }
    if let Some(v) = env_var("GITHUB_BRANCH") {
        settings.publish.branch = v;
    }
    if let Some(v) = env_var("GITHUB_FILENAME") {
        settings.publish.filename = v;
    }
    if let Some(v) = env_var("GITHUB_REPO_DIR") {
        settings.publish.repo_dir = v;
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn set_parsed<T: std::str::FromStr>(target: &mut T, name: &str) {
    if let Some(v) = env_var(name) {
        if let Ok(parsed) = v.trim().parse() {
            *target = parsed;
        } else {
            tracing::warn!(var = name, value = v, "ignoring unparsable environment override");
        }
    }
}

/// 列表变量兼容 JSON 数组与逗号分隔两种写法
fn parse_list(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.starts_with('[') && value.ends_with(']') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(value) {
            return items;
        }
    }
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
