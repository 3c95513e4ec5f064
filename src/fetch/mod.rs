//! 订阅抓取
//!
//! 并发拉取全部订阅源；单个源失败只影响自身。正文先按整体 Base64 尝试
//! 解码（多数订阅如此发布），失败则按明文处理；HTML 正文直接丢弃。
//! 输出按配置顺序拼接、按指纹去重（先见先得）。

use std::time::Duration;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::config::Settings;
use crate::server::parser::{decode_base64_permissive, parse_uri};
use crate::server::{dedup_by_fingerprint, ServerDescriptor};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// 拉取所有订阅源并返回去重后的候选列表
pub async fn fetch_subscription_servers(settings: &Settings) -> Vec<ServerDescriptor> {
    let client = match reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(concat!("rayscan/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build subscription HTTP client");
            return Vec::new();
        }
    };

    let urls: Vec<&str> = settings
        .sub_urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .collect();
    info!(feeds = urls.len(), "fetching subscriptions");

    let fetches = urls.iter().map(|url| fetch_one_feed(&client, url));
    let all_servers: Vec<ServerDescriptor> =
        join_all(fetches).await.into_iter().flatten().collect();

    let mut unique = dedup_by_fingerprint(all_servers);
    info!(count = unique.len(), "total unique servers found");

    if settings.low_internet_cons && unique.len() > settings.low_internet_limit {
        info!(
            limit = settings.low_internet_limit,
            "low internet consumption mode, truncating candidate list"
        );
        unique.truncate(settings.low_internet_limit);
    }

    unique
}

async fn fetch_one_feed(client: &reqwest::Client, url: &str) -> Vec<ServerDescriptor> {
    let body = match fetch_body(client, url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(url, error = %e, "subscription fetch failed");
            return Vec::new();
        }
    };

    if body.trim_start().starts_with('<') {
        warn!(url, "subscription body looks like HTML, skipping feed");
        return Vec::new();
    }

    let servers = parse_feed_payload(&body);
    info!(url, count = servers.len(), "feed parsed");
    servers
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let resp = client.get(url).send().await?.error_for_status()?;
    Ok(resp.text().await?)
}

/// 整体 Base64 优先，失败按明文逐行解析；源内顺序保持
pub fn parse_feed_payload(body: &str) -> Vec<ServerDescriptor> {
    let text = match decode_base64_permissive(body) {
        Some(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        None => body.to_string(),
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_uri)
        .collect()
}
