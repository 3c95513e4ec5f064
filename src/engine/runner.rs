//! 引擎子进程与并发探测
//!
//! 一个批次 = 一个引擎进程：写临时配置 → 启动 → 等待入站就绪 →
//! 并发探测 → 终止回收。临时文件由守卫在任何退出路径（含 panic）上删除，
//! `kill_on_drop` 保证子进程不会泄漏。

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::engine::config::build_batch_config;
use crate::server::ServerDescriptor;

/// 入站就绪轮询：间隔 100ms，总窗口 3s
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_DEADLINE: Duration = Duration::from_secs(3);
/// 终止宽限，超时后强杀
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct ProbeRunner {
    settings: std::sync::Arc<Settings>,
}

impl ProbeRunner {
    pub fn new(settings: std::sync::Arc<Settings>) -> Self {
        Self { settings }
    }

    /// 对一个批次做延迟探测；失败/超时的索引记为 `f64::INFINITY`
    pub async fn run_latency_batch(
        &self,
        batch: &[ServerDescriptor],
    ) -> Vec<(ServerDescriptor, f64)> {
        if batch.is_empty() {
            return Vec::new();
        }

        let mut engine = match self.spawn_engine(batch).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, path = self.settings.xray_path, "engine launch failed for batch");
                return self.all_failed(batch);
            }
        };

        if let Some(output) = engine.exited_early().await {
            warn!(output = %output, "engine exited before probing, failing the whole batch");
            engine.shutdown().await;
            return self.all_failed(batch);
        }

        let probes = (0..batch.len()).map(|i| {
            let port = self.settings.base_port as u32 + i as u32;
            self.probe_latency(port)
        });
        let delays = join_all(probes).await;

        engine.shutdown().await;

        batch.iter().cloned().zip(delays).collect()
    }

    /// 按批次检查一组节点是否能访问 `target_url`，返回可达子集
    pub async fn evaluate_site_accessibility(
        &self,
        target_url: &str,
        servers: &[ServerDescriptor],
    ) -> Vec<ServerDescriptor> {
        let mut reachable = Vec::new();

        for (n, batch) in servers.chunks(self.settings.batch_size).enumerate() {
            debug!(batch = n + 1, url = target_url, "site accessibility batch");

            let mut engine = match self.spawn_engine(batch).await {
                Ok(engine) => engine,
                Err(e) => {
                    warn!(error = %e, "engine launch failed for site check batch");
                    continue;
                }
            };

            if let Some(output) = engine.exited_early().await {
                warn!(output = %output, "engine exited before site check");
                engine.shutdown().await;
                continue;
            }

            let probes = (0..batch.len()).map(|i| {
                let port = self.settings.base_port as u32 + i as u32;
                self.probe_site(port, target_url)
            });
            let results = join_all(probes).await;

            engine.shutdown().await;

            reachable.extend(
                batch
                    .iter()
                    .zip(results)
                    .filter(|(_, ok)| *ok)
                    .map(|(s, _)| s.clone()),
            );
        }

        reachable
    }

    fn all_failed(&self, batch: &[ServerDescriptor]) -> Vec<(ServerDescriptor, f64)> {
        batch.iter().cloned().map(|s| (s, f64::INFINITY)).collect()
    }

    async fn spawn_engine(&self, batch: &[ServerDescriptor]) -> Result<EngineProcess> {
        let config = build_batch_config(batch, self.settings.base_port);
        let config_file = tempfile::Builder::new()
            .prefix("rayscan-batch-")
            .suffix(".json")
            .tempfile()
            .context("failed to create engine config temp file")?;
        tokio::fs::write(config_file.path(), serde_json::to_vec(&config)?)
            .await
            .context("failed to write engine config")?;

        let mut cmd = Command::new(&self.settings.xray_path);
        cmd.arg("-c")
            .arg(config_file.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if Path::new(&self.settings.xray_assets_path).is_dir() {
            cmd.env("XRAY_LOCATION_ASSET", &self.settings.xray_assets_path);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to start engine '{}'", self.settings.xray_path))?;

        wait_for_port(self.settings.base_port).await;
        Ok(EngineProcess {
            child,
            _config_file: config_file,
        })
    }

    /// 经 `socks5://127.0.0.1:{port}` 对延迟目标发 HEAD，返回实测毫秒
    async fn probe_latency(&self, port: u32) -> f64 {
        let client = match self.socks_client(port, false) {
            Some(c) => c,
            None => return f64::INFINITY,
        };

        let start = Instant::now();
        match client.head(&self.settings.latency_test_url).send().await {
            Ok(resp) if resp.status().is_success() => start.elapsed().as_secs_f64() * 1000.0,
            _ => f64::INFINITY,
        }
    }

    /// 站点可达性：跟随重定向，HTTP 状态 < 400 视为可达
    async fn probe_site(&self, port: u32, target_url: &str) -> bool {
        let client = match self.socks_client(port, true) {
            Some(c) => c,
            None => return false,
        };

        match client.head(target_url).send().await {
            Ok(resp) => resp.status().as_u16() < 400,
            Err(_) => false,
        }
    }

    fn socks_client(&self, port: u32, follow_redirects: bool) -> Option<reqwest::Client> {
        let proxy = reqwest::Proxy::all(format!("socks5://127.0.0.1:{}", port)).ok()?;
        let redirect = if follow_redirects {
            reqwest::redirect::Policy::default()
        } else {
            reqwest::redirect::Policy::none()
        };
        reqwest::Client::builder()
            .proxy(proxy)
            .redirect(redirect)
            .timeout(self.settings.test_timeout())
            .build()
            .ok()
    }
}

/// 一个批次的引擎进程；临时配置文件随守卫一起销毁
struct EngineProcess {
    child: Child,
    _config_file: NamedTempFile,
}

/// 轮询首个入站端口直到可连接或超时，返回是否就绪
async fn wait_for_port(port: u16) -> bool {
    let deadline = Instant::now() + READY_DEADLINE;
    while Instant::now() < deadline {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        sleep(READY_POLL_INTERVAL).await;
    }
    false
}

impl EngineProcess {
    /// 若进程已提前退出，返回采集到的 stdout/stderr
    async fn exited_early(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let mut captured = format!("engine exited with {}", status);
                if let Some(mut out) = self.child.stdout.take() {
                    let mut buf = String::new();
                    let _ = out.read_to_string(&mut buf).await;
                    if !buf.trim().is_empty() {
                        captured.push_str("\nstdout: ");
                        captured.push_str(buf.trim());
                    }
                }
                if let Some(mut err) = self.child.stderr.take() {
                    let mut buf = String::new();
                    let _ = err.read_to_string(&mut buf).await;
                    if !buf.trim().is_empty() {
                        captured.push_str("\nstderr: ");
                        captured.push_str(buf.trim());
                    }
                }
                Some(captured)
            }
            _ => None,
        }
    }

    /// 先 SIGTERM 等待宽限期，仍存活则 SIGKILL；全部路径都会 wait 回收
    async fn shutdown(mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        if timeout(SHUTDOWN_GRACE, self.child.wait()).await.is_err() {
            let _ = self.child.kill().await;
        }
    }
}
