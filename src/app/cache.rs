//! 结果缓存与刷新调度
//!
//! 两把锁各司其职：`slots`/`site_cache` 的读写锁只在拷贝/换入时持有；
//! `processing` 互斥锁承担准入控制——全进程同一时刻至多一个会产生探测
//! 的操作（周期刷新、按需站点检查、live 评估）。获取一律用非阻塞
//! `try_lock`，落空即返回"忙"，不排队。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::app::evaluator::Evaluator;
use crate::config::Settings;
use crate::publish::{site_filename, Publisher};
use crate::server::ServerDescriptor;
use crate::store::{KvStore, WORKING_SERVERS_KEY};

/// 缓存头部长度（订阅输出的默认条数）
const TOP_N: usize = 25;

/// 站点查询的三态结果；`Ready` 里的空列表表示"没有可达节点"
pub enum SiteOutcome {
    Ready(Vec<ServerDescriptor>),
    NotReady,
    Busy,
}

/// live 评估的结果
pub enum LiveOutcome {
    Ready(Vec<ServerDescriptor>),
    Empty,
    Busy,
}

#[derive(Default)]
struct CacheSlots {
    /// 完整工作集（延迟升序）；`None` = 尚未填充过
    all: Option<Vec<ServerDescriptor>>,
    /// `all` 的前 TOP_N 项
    top: Option<Vec<ServerDescriptor>>,
}

pub struct CacheService {
    settings: Arc<Settings>,
    evaluator: Evaluator,
    store: KvStore,
    publisher: Option<Publisher>,
    slots: RwLock<CacheSlots>,
    site_cache: RwLock<HashMap<String, (Instant, Vec<ServerDescriptor>)>>,
    processing: Mutex<()>,
}

impl CacheService {
    pub fn new(
        settings: Arc<Settings>,
        evaluator: Evaluator,
        store: KvStore,
        publisher: Option<Publisher>,
    ) -> Self {
        Self {
            settings,
            evaluator,
            store,
            publisher,
            slots: RwLock::new(CacheSlots::default()),
            site_cache: RwLock::new(HashMap::new()),
            processing: Mutex::new(()),
        }
    }

    // ─── 周期刷新 ───

    /// 刷新循环：先尝试从 KV 恢复缓存，之后按固定间隔评估
    pub async fn run_periodic(self: Arc<Self>) {
        self.hydrate().await;

        loop {
            info!("periodic cache refresh started");
            self.refresh_tick().await;
            tokio::time::sleep(Duration::from_secs(self.settings.cache_interval_secs)).await;
        }
    }

    /// 单次刷新；上一轮仍在进行时跳过本 tick
    pub async fn refresh_tick(&self) {
        match self.processing.try_lock() {
            Ok(_guard) => self.run_refresh().await,
            Err(_) => {
                info!("refresh skipped, a probe run is already in flight");
            }
        }
    }

    /// 调用方必须已持有 processing 锁
    async fn run_refresh(&self) {
        let top_servers = self.evaluator.compute_top_servers().await;

        {
            let mut slots = self.slots.write().await;
            slots.top = Some(top_servers.iter().take(TOP_N).cloned().collect());
            slots.all = Some(top_servers.clone());
        }
        info!(count = top_servers.len(), "cache updated");

        self.store
            .save_servers(WORKING_SERVERS_KEY, &top_servers, None)
            .await;

        if let Some(publisher) = &self.publisher {
            if !top_servers.is_empty() {
                let content = joined_raw_uris(&top_servers);
                publisher
                    .update_file_and_push(&self.settings.publish.filename, &content)
                    .await;
            }
        }

        self.precheck_sites(&top_servers).await;
    }

    /// 预热配置的目标站点缓存；可选地发布按站点过滤的订阅文件
    async fn precheck_sites(&self, top_servers: &[ServerDescriptor]) {
        if self.settings.precheck_sites.is_empty() || top_servers.is_empty() {
            return;
        }

        for site_url in &self.settings.precheck_sites {
            info!(url = site_url, "pre-checking site");
            let reachable = self.evaluator.evaluate_site(site_url, top_servers).await;
            info!(url = site_url, count = reachable.len(), "site cache warmed");

            self.site_cache
                .write()
                .await
                .insert(site_url.clone(), (Instant::now(), reachable.clone()));

            if let Some(publisher) = &self.publisher {
                if !reachable.is_empty() {
                    publisher
                        .update_file_and_push(&site_filename(site_url), &joined_raw_uris(&reachable))
                        .await;
                }
            }
        }
    }

    /// 尽力从 KV 恢复上次的工作集
    async fn hydrate(&self) {
        if let Some(servers) = self.store.load_servers(WORKING_SERVERS_KEY).await {
            info!(count = servers.len(), "cache hydrated from persistent store");
            self.restore(servers).await;
        }
    }

    /// 用一份已富化的工作集直接填充缓存（KV 恢复路径）
    pub async fn restore(&self, servers: Vec<ServerDescriptor>) {
        let mut slots = self.slots.write().await;
        slots.top = Some(servers.iter().take(TOP_N).cloned().collect());
        slots.all = Some(servers);
    }

    // ─── 读取 ───

    pub async fn cached_top(&self) -> Option<Vec<ServerDescriptor>> {
        self.slots.read().await.top.clone()
    }

    pub async fn cached_all(&self) -> Option<Vec<ServerDescriptor>> {
        self.slots.read().await.all.clone()
    }

    // ─── 按需路径 ───

    /// 站点订阅查询：新鲜缓存直接返回；过期则在锁内对全量工作集重测
    pub async fn site_specific_servers(&self, url: &str) -> SiteOutcome {
        let ttl = Duration::from_secs(self.settings.site_cache_ttl_secs);
        {
            let cache = self.site_cache.read().await;
            if let Some((inserted, servers)) = cache.get(url) {
                if inserted.elapsed() < ttl {
                    return SiteOutcome::Ready(servers.clone());
                }
            }
        }

        let Some(servers_to_test) = self.cached_all().await.filter(|s| !s.is_empty()) else {
            return SiteOutcome::NotReady;
        };

        let guard = match self.processing.try_lock() {
            Ok(guard) => guard,
            Err(_) => return SiteOutcome::Busy,
        };

        let reachable = self.evaluator.evaluate_site(url, &servers_to_test).await;
        drop(guard);

        self.site_cache
            .write()
            .await
            .insert(url.to_string(), (Instant::now(), reachable.clone()));

        SiteOutcome::Ready(reachable)
    }

    /// live 评估：跑完整流水线但不写缓存、不持久化、不发布
    pub async fn live_top(&self) -> LiveOutcome {
        let guard = match self.processing.try_lock() {
            Ok(guard) => guard,
            Err(_) => return LiveOutcome::Busy,
        };

        let top_servers = self.evaluator.compute_top_servers().await;
        drop(guard);

        if top_servers.is_empty() {
            warn!("live evaluation produced no working servers");
            return LiveOutcome::Empty;
        }
        LiveOutcome::Ready(top_servers.into_iter().take(TOP_N).collect())
    }
}

pub fn joined_raw_uris(servers: &[ServerDescriptor]) -> String {
    servers
        .iter()
        .map(|s| s.raw_uri.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
