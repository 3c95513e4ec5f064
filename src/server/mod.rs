//! 代理节点描述符
//!
//! 每个候选节点解析为一个 `ServerDescriptor`：公共信封（地址、端口、备注）
//! 加上按协议区分的参数变体。序列化形式即持久化与 API 输出的 JSON 格式。

pub mod generator;
pub mod parser;

use serde::{Deserialize, Serialize};

/// 单个代理节点的规范化内存形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub raw_uri: String,
    /// 实测延迟（毫秒），探测完成后由评估器填充
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_flag")]
    pub flag: String,
    #[serde(flatten)]
    pub params: ProtocolParams,
}

fn default_country_code() -> String {
    "UN".to_string()
}

fn default_flag() -> String {
    "🇺🇳".to_string()
}

/// 协议特有参数（标签字段 `protocol` 区分变体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolParams {
    Vless {
        #[serde(rename = "vless_id")]
        id: String,
        #[serde(default = "default_none")]
        encryption: String,
        #[serde(default = "default_none")]
        security: String,
        #[serde(rename = "type", default = "default_tcp")]
        transport: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flow: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pbk: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sid: Option<String>,
    },
    Vmess {
        #[serde(rename = "vmess_id")]
        id: String,
        #[serde(default = "default_auto")]
        security: String,
        #[serde(rename = "type", default = "default_tcp")]
        transport: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default = "default_none")]
        tls: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
        #[serde(default)]
        aid: u16,
    },
    Trojan {
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
        #[serde(default = "default_tls")]
        security: String,
        #[serde(rename = "type", default = "default_tcp")]
        transport: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flow: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    Shadowsocks {
        method: String,
        password: String,
    },
    Hysteria2 {
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sni: Option<String>,
        #[serde(default)]
        insecure: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        obfs: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        obfs_password: Option<String>,
    },
}

fn default_none() -> String {
    "none".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_tcp() -> String {
    "tcp".to_string()
}

fn default_tls() -> String {
    "tls".to_string()
}

impl ServerDescriptor {
    pub fn protocol(&self) -> &'static str {
        match self.params {
            ProtocolParams::Vless { .. } => "vless",
            ProtocolParams::Vmess { .. } => "vmess",
            ProtocolParams::Trojan { .. } => "trojan",
            ProtocolParams::Shadowsocks { .. } => "shadowsocks",
            ProtocolParams::Hysteria2 { .. } => "hysteria2",
        }
    }

    /// 协议感知的身份指纹
    ///
    /// 相同指纹 ⇔ 指向同一远端、同一加密/传输参数。去重按指纹进行，
    /// 不看 `remark` 或 `raw_uri`（同一节点常以不同备注出现在多个订阅里）。
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();

        let mut feed = |part: &str| {
            hasher.update(part.as_bytes());
            hasher.update(&[0x1f]);
        };

        feed(self.protocol());
        feed(&self.address);
        feed(&self.port.to_string());

        match &self.params {
            ProtocolParams::Vless {
                id,
                flow,
                transport,
                security,
                path,
                ..
            } => {
                feed(id);
                feed(flow.as_deref().unwrap_or(""));
                feed(transport);
                feed(security);
                feed(path.as_deref().unwrap_or(""));
            }
            ProtocolParams::Vmess {
                id,
                transport,
                security,
                path,
                tls,
                aid,
                ..
            } => {
                feed(id);
                feed(transport);
                feed(security);
                feed(path.as_deref().unwrap_or(""));
                feed(tls);
                feed(&aid.to_string());
            }
            ProtocolParams::Trojan { password, .. } => {
                feed(password);
            }
            ProtocolParams::Shadowsocks { method, password } => {
                feed(method);
                feed(password);
            }
            ProtocolParams::Hysteria2 {
                password, obfs, ..
            } => {
                feed(password);
                feed(obfs.as_deref().unwrap_or(""));
            }
        }

        let hash = hasher.finalize();
        u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("blake3 output is 32 bytes"))
    }
}

/// 按指纹去重，保留首次出现的节点
pub fn dedup_by_fingerprint(servers: Vec<ServerDescriptor>) -> Vec<ServerDescriptor> {
    let mut seen = std::collections::HashSet::new();
    servers
        .into_iter()
        .filter(|s| seen.insert(s.fingerprint()))
        .collect()
}
