use anyhow::Result;
use serde::Deserialize;

/// 运行时配置
///
/// 来源两层：可选的 YAML 文件提供基线，环境变量逐项覆盖（见 `mod.rs`）。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 订阅源 URL 列表
    pub sub_urls: Vec<String>,
    /// 延迟探测的 HEAD 目标
    pub latency_test_url: String,
    /// 单次引擎批次的最大节点数
    pub batch_size: usize,
    /// 首个本地 SOCKS 入站端口，批内依次 +1
    pub base_port: u16,
    /// 单个探测请求的总超时（秒）
    pub test_timeout_secs: u64,
    /// 工作集延迟上限（毫秒）
    pub max_delay_ms: u64,
    /// 周期刷新间隔（秒）
    pub cache_interval_secs: u64,
    /// 站点缓存条目有效期（秒）
    pub site_cache_ttl_secs: u64,
    /// 刷新后预热的目标站点
    pub precheck_sites: Vec<String>,
    /// 低流量模式：截断候选列表
    pub low_internet_cons: bool,
    pub low_internet_limit: usize,
    /// 引擎二进制与资产目录
    pub xray_path: String,
    pub xray_assets_path: String,
    /// GeoIP 数据库路径；缺失时尝试从 `geoip_download_url` 下载
    pub geoip_db_path: String,
    pub geoip_download_url: String,
    /// HTTP API 监听地址
    pub listen: String,
    pub port: u16,
    pub redis: RedisSettings,
    pub publish: PublishSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub enabled: bool,
    pub token: String,
    pub repo_url: String,
    pub user: String,
    pub email: String,
    pub branch: String,
    pub filename: String,
    pub repo_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sub_urls: vec![
                "https://github.com/Epodonios/v2ray-configs/raw/main/Splitted-By-Protocol/vless.txt"
                    .to_string(),
            ],
            latency_test_url: "http://www.google.com/generate_204".to_string(),
            batch_size: 500,
            base_port: 20000,
            test_timeout_secs: 10,
            max_delay_ms: 8000,
            cache_interval_secs: 900,
            site_cache_ttl_secs: 3600,
            precheck_sites: Vec::new(),
            low_internet_cons: false,
            low_internet_limit: 50,
            xray_path: "/usr/local/bin/xray".to_string(),
            xray_assets_path: "/usr/share/xray/".to_string(),
            geoip_db_path: "Country.mmdb".to_string(),
            geoip_download_url:
                "https://github.com/P3TERX/GeoLite.mmdb/raw/download/GeoLite2-Country.mmdb"
                    .to_string(),
            listen: "0.0.0.0".to_string(),
            port: 8084,
            redis: RedisSettings::default(),
            publish: PublishSettings::default(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: String::new(),
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            repo_url: String::new(),
            user: "rayscan updater".to_string(),
            email: "bot@example.com".to_string(),
            branch: "main".to_string(),
            filename: "subscription.txt".to_string(),
            repo_dir: "/var/lib/rayscan/subscription_repo".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if self.base_port as usize + self.batch_size > 65536 {
            anyhow::bail!(
                "base_port {} + batch_size {} exceeds the port range",
                self.base_port,
                self.batch_size
            );
        }
        if self.test_timeout_secs == 0 {
            anyhow::bail!("test_timeout_secs must be positive");
        }
        if self.cache_interval_secs == 0 {
            anyhow::bail!("cache_interval_secs must be positive");
        }
        if self.publish.enabled && self.publish.repo_url.is_empty() {
            anyhow::bail!("publish.repo_url is required when publishing is enabled");
        }
        Ok(())
    }

    pub fn test_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.test_timeout_secs)
    }
}
