//! 外部代理引擎（xray）的批量驱动
//!
//! `config` 负责把一批描述符翻译为引擎 JSON 配置（每个候选一对
//! inbound/outbound，路由规则 1:1 隔离）；`runner` 负责子进程生命周期
//! 与并发探测。

pub mod config;
pub mod runner;

pub use runner::ProbeRunner;
