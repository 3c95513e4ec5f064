//! 评估器：抓取 → 去重 → 分批探测 → 排序 → 富化
//!
//! 批次严格串行，同一时刻只有一个引擎进程存活；端口区间
//! `[base_port, base_port+batch)` 在批次生命周期内视为独占。

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::engine::ProbeRunner;
use crate::fetch;
use crate::geo::GeoIp;
use crate::server::{generator, ServerDescriptor};

pub struct Evaluator {
    settings: Arc<Settings>,
    runner: ProbeRunner,
    geoip: Arc<GeoIp>,
}

impl Evaluator {
    pub fn new(settings: Arc<Settings>, geoip: Arc<GeoIp>) -> Self {
        let runner = ProbeRunner::new(settings.clone());
        Self {
            settings,
            runner,
            geoip,
        }
    }

    /// 完整评估一轮：返回按延迟升序排好、已富化的工作集
    pub async fn compute_top_servers(&self) -> Vec<ServerDescriptor> {
        if !Path::new(&self.settings.xray_path).exists() {
            warn!(path = self.settings.xray_path, "xray executable not found, probes will fail");
        }

        let servers = fetch::fetch_subscription_servers(&self.settings).await;
        if servers.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(servers.len());
        for (n, batch) in servers.chunks(self.settings.batch_size).enumerate() {
            info!(batch = n + 1, size = batch.len(), "probing batch");
            results.extend(self.runner.run_latency_batch(batch).await);
        }

        let working = self.rank_and_enrich(results);
        info!(count = working.len(), "working servers after ranking");
        working
    }

    /// 过滤超限/失败项，升序排序并写入延迟、地理信息与再生成的 URI
    pub fn rank_and_enrich(
        &self,
        results: Vec<(ServerDescriptor, f64)>,
    ) -> Vec<ServerDescriptor> {
        let max_delay = self.settings.max_delay_ms as f64;
        let mut working: Vec<(ServerDescriptor, f64)> = results
            .into_iter()
            .filter(|(_, delay)| *delay <= max_delay)
            .collect();
        working.sort_by(|a, b| a.1.total_cmp(&b.1));

        working
            .into_iter()
            .map(|(server, delay)| self.enrich(server, delay))
            .collect()
    }

    fn enrich(&self, mut server: ServerDescriptor, delay: f64) -> ServerDescriptor {
        let delay_ms = delay.round() as u64;
        let (country_code, flag) = self.geoip.get_country(&server.address);

        server.delay_ms = Some(delay_ms);
        server.remark = format!("{} {} {}ms", flag, country_code, delay_ms);
        server.country_code = country_code;
        server.flag = flag;
        server.raw_uri = generator::generate(&server);
        server
    }

    /// 站点可达性检查（供缓存层的预热与按需路径复用）
    pub async fn evaluate_site(
        &self,
        target_url: &str,
        servers: &[ServerDescriptor],
    ) -> Vec<ServerDescriptor> {
        self.runner
            .evaluate_site_accessibility(target_url, servers)
            .await
    }
}
