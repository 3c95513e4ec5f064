//! GeoIP 富化
//!
//! MaxMind mmdb 查询国家代码并派生旗帜 emoji。数据库缺失时先尝试下载，
//! 仍失败则降级为默认国家，不影响评估流程。地址按字面使用：域名不做
//! 解析，直接返回默认值。

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Settings;

pub const DEFAULT_COUNTRY: &str = "UN";
pub const DEFAULT_FLAG: &str = "🇺🇳";

pub struct GeoIp {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

#[derive(Deserialize)]
struct CountryRecord {
    country: Option<CountryInfo>,
}

#[derive(Deserialize)]
struct CountryInfo {
    iso_code: Option<String>,
}

impl GeoIp {
    /// 打开数据库；文件缺失时先尝试下载。任何失败都只降级，不报错。
    pub async fn init(settings: &Settings) -> Self {
        let path = &settings.geoip_db_path;

        if !Path::new(path).exists() && !settings.geoip_download_url.is_empty() {
            info!(path, url = settings.geoip_download_url, "GeoIP database missing, downloading");
            if let Err(e) = download_db(&settings.geoip_download_url, path).await {
                warn!(error = %e, "GeoIP database download failed");
            }
        }

        let reader = match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path, "GeoIP database loaded");
                Some(reader)
            }
            Err(e) => {
                warn!(path, error = %e, "GeoIP database unavailable, using default country");
                None
            }
        };

        Self { reader }
    }

    /// 无数据库实例（测试与显式禁用）
    pub fn disabled() -> Self {
        Self { reader: None }
    }

    /// `address → (ISO-2, 旗帜)`；未命中或非 IP 输入返回默认值
    pub fn get_country(&self, address: &str) -> (String, String) {
        let default = || (DEFAULT_COUNTRY.to_string(), DEFAULT_FLAG.to_string());

        let Some(reader) = &self.reader else {
            return default();
        };
        let Ok(ip) = address.parse::<IpAddr>() else {
            return default();
        };

        let iso = reader
            .lookup::<CountryRecord>(ip)
            .ok()
            .and_then(|r| r.country)
            .and_then(|c| c.iso_code);

        match iso {
            Some(code) if !code.is_empty() => {
                let flag = flag_emoji(&code).unwrap_or_else(|| DEFAULT_FLAG.to_string());
                (code, flag)
            }
            _ => default(),
        }
    }
}

async fn download_db(url: &str, path: &str) -> anyhow::Result<()> {
    let resp = reqwest::get(url).await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    tokio::fs::write(path, &bytes).await?;
    info!(path, size = bytes.len(), "GeoIP database download complete");
    Ok(())
}

/// ISO-2 → 区域指示符旗帜（'A' → U+1F1E6）
fn flag_emoji(country_code: &str) -> Option<String> {
    if country_code.len() != 2 {
        return None;
    }
    country_code
        .chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_uppercase() {
                char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32))
            } else {
                None
            }
        })
        .collect()
}
