//! 订阅行解析器
//!
//! 支持的 URI 形式：
//! - `vless://uuid@host:port?params#remark`
//! - `vmess://base64(json)`
//! - `trojan://password@host:port?params#remark`
//! - `ss://base64(method:password)@host:port#remark`
//! - `hy2://password@host:port?params#remark`
//!
//! 解析失败不向外传播：`parse_uri` 返回 `None` 并留下 debug 诊断。
//! 其余 scheme（含 `ssr://`）静默跳过。

use std::collections::HashMap;

use base64::Engine;
use thiserror::Error;
use tracing::debug;

use super::{ProtocolParams, ServerDescriptor};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}: missing '@' separator")]
    MissingAt(&'static str),

    #[error("{0}: missing required field '{1}'")]
    MissingField(&'static str, &'static str),

    #[error("invalid host:port in '{0}'")]
    InvalidHostPort(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("invalid base64 payload")]
    InvalidBase64,

    #[error("invalid vmess JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// 解析单个订阅行；失败或不支持的 scheme 返回 `None`
pub fn parse_uri(line: &str) -> Option<ServerDescriptor> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let result = if let Some(rest) = line.strip_prefix("vless://") {
        parse_vless(line, rest)
    } else if let Some(rest) = line.strip_prefix("vmess://") {
        parse_vmess(line, rest)
    } else if let Some(rest) = line.strip_prefix("trojan://") {
        parse_trojan(line, rest)
    } else if let Some(rest) = line.strip_prefix("ss://") {
        parse_ss(line, rest)
    } else if let Some(rest) = line.strip_prefix("hy2://") {
        parse_hy2(line, rest)
    } else {
        let scheme = line.split("://").next().unwrap_or("?");
        debug!(scheme, "unsupported URI scheme, skipping");
        return None;
    };

    match result {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            debug!(error = %e, uri = line, "failed to parse proxy URI");
            None
        }
    }
}

// ─── VLESS ───

fn parse_vless(uri: &str, rest: &str) -> Result<ServerDescriptor, ParseError> {
    let (main, remark) = split_remark(rest);
    let (user, host_part) = main
        .split_once('@')
        .ok_or(ParseError::MissingAt("vless"))?;
    if user.is_empty() {
        return Err(ParseError::MissingField("vless", "user"));
    }

    let (host_port, query) = split_query(host_part);
    let (address, port) = split_host_port(host_port)?;
    let params = parse_query(query);

    Ok(ServerDescriptor {
        address,
        port,
        remark,
        raw_uri: uri.to_string(),
        delay_ms: None,
        country_code: "UN".to_string(),
        flag: "🇺🇳".to_string(),
        params: ProtocolParams::Vless {
            id: user.to_string(),
            encryption: param_or(&params, "encryption", "none"),
            security: param_or(&params, "security", "none"),
            transport: param_or(&params, "type", "tcp"),
            host: param(&params, "host"),
            path: param(&params, "path"),
            sni: param(&params, "sni"),
            flow: param(&params, "flow"),
            fp: param(&params, "fp"),
            pbk: param(&params, "pbk"),
            sid: param(&params, "sid"),
        },
    })
}

// ─── VMess ───

fn parse_vmess(uri: &str, rest: &str) -> Result<ServerDescriptor, ParseError> {
    // 去掉少数订阅附带的 `?...` 后缀，再补齐 Base64 填充
    let encoded = rest.split_once('?').map(|(e, _)| e).unwrap_or(rest);
    let mut encoded: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    while encoded.len() % 4 != 0 {
        encoded.push('=');
    }

    let bytes = decode_base64_permissive(&encoded).ok_or(ParseError::InvalidBase64)?;
    let text = String::from_utf8_lossy(&bytes);
    // 部分源在 JSON 之后携带垃圾字节：截断到最后一个 '}'
    let json_text = match text.rfind('}') {
        Some(idx) => &text[..=idx],
        None => text.as_ref(),
    };
    let v: serde_json::Value = serde_json::from_str(json_text)?;

    let address = v["add"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingField("vmess", "add"))?
        .to_string();
    let port = json_number(&v["port"]).ok_or(ParseError::MissingField("vmess", "port"))?;
    let port = u16::try_from(port).map_err(|_| ParseError::InvalidPort(port.to_string()))?;
    let id = v["id"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingField("vmess", "id"))?
        .to_string();

    Ok(ServerDescriptor {
        address,
        port,
        remark: v["ps"].as_str().unwrap_or("").to_string(),
        raw_uri: uri.to_string(),
        delay_ms: None,
        country_code: "UN".to_string(),
        flag: "🇺🇳".to_string(),
        params: ProtocolParams::Vmess {
            id,
            security: json_string_or(&v["scy"], "auto"),
            transport: json_string_or(&v["net"], "tcp"),
            host: json_string(&v["host"]),
            path: json_string(&v["path"]),
            tls: json_string_or(&v["tls"], "none"),
            sni: json_string(&v["sni"]),
            aid: json_number(&v["aid"]).and_then(|n| u16::try_from(n).ok()).unwrap_or(0),
        },
    })
}

// ─── Trojan ───

fn parse_trojan(uri: &str, rest: &str) -> Result<ServerDescriptor, ParseError> {
    let (main, remark) = split_remark(rest);
    let (password, host_part) = main
        .split_once('@')
        .ok_or(ParseError::MissingAt("trojan"))?;
    if password.is_empty() {
        return Err(ParseError::MissingField("trojan", "password"));
    }
    let password = url_decode(password);

    let (host_port, query) = split_query(host_part);
    let (address, port) = split_host_port(host_port)?;
    let params = parse_query(query);

    Ok(ServerDescriptor {
        address,
        port,
        remark,
        raw_uri: uri.to_string(),
        delay_ms: None,
        country_code: "UN".to_string(),
        flag: "🇺🇳".to_string(),
        params: ProtocolParams::Trojan {
            password,
            // 老客户端用 `peer` 承载 SNI
            sni: param(&params, "sni").or_else(|| param(&params, "peer")),
            security: param_or(&params, "security", "tls"),
            transport: param_or(&params, "type", "tcp"),
            flow: param(&params, "flow"),
            path: param(&params, "path"),
            host: param(&params, "host"),
        },
    })
}

// ─── Shadowsocks ───

fn parse_ss(uri: &str, rest: &str) -> Result<ServerDescriptor, ParseError> {
    let (main, remark) = split_remark(rest);
    let (user_info, host_part) = main.split_once('@').ok_or(ParseError::MissingAt("ss"))?;

    let decoded = decode_base64_permissive(user_info).ok_or(ParseError::InvalidBase64)?;
    let decoded = String::from_utf8_lossy(&decoded).to_string();
    let (method, password) = decoded
        .split_once(':')
        .ok_or(ParseError::MissingField("ss", "method:password"))?;

    let (host_port, _) = split_query(host_part);
    let (address, port) = split_host_port(host_port)?;

    Ok(ServerDescriptor {
        address,
        port,
        remark,
        raw_uri: uri.to_string(),
        delay_ms: None,
        country_code: "UN".to_string(),
        flag: "🇺🇳".to_string(),
        params: ProtocolParams::Shadowsocks {
            method: method.to_string(),
            password: password.to_string(),
        },
    })
}

// ─── Hysteria2 ───

fn parse_hy2(uri: &str, rest: &str) -> Result<ServerDescriptor, ParseError> {
    let (main, remark) = split_remark(rest);
    let (password, host_part) = main.split_once('@').ok_or(ParseError::MissingAt("hy2"))?;
    if password.is_empty() {
        return Err(ParseError::MissingField("hy2", "password"));
    }

    let (host_port, query) = split_query(host_part);
    let (address, port) = split_host_port(host_port)?;
    let params = parse_query(query);

    Ok(ServerDescriptor {
        address,
        port,
        remark,
        raw_uri: uri.to_string(),
        delay_ms: None,
        country_code: "UN".to_string(),
        flag: "🇺🇳".to_string(),
        params: ProtocolParams::Hysteria2 {
            password: password.to_string(),
            sni: param(&params, "sni"),
            insecure: params.get("insecure").map(|v| v == "1").unwrap_or(false),
            obfs: param(&params, "obfs"),
            obfs_password: param(&params, "obfs-password"),
        },
    })
}

// ─── 辅助函数 ───

/// 分离 `#remark` 片段并做百分号解码
fn split_remark(rest: &str) -> (&str, String) {
    match rest.rsplit_once('#') {
        Some((main, fragment)) => (main, url_decode(fragment)),
        None => (rest, String::new()),
    }
}

fn split_query(s: &str) -> (&str, &str) {
    match s.split_once('?') {
        Some((left, right)) => (left, right),
        None => (s, ""),
    }
}

/// 拆分 `host:port`，容忍末尾的 `/` 与 IPv6 方括号
fn split_host_port(s: &str) -> Result<(String, u16), ParseError> {
    let s = s.trim_end_matches('/');
    let (host, port_str) = if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| ParseError::InvalidHostPort(s.to_string()))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| ParseError::InvalidHostPort(s.to_string()))?;
        (host.to_string(), port)
    } else {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidHostPort(s.to_string()))?;
        (host.to_string(), port)
    };

    if host.is_empty() {
        return Err(ParseError::InvalidHostPort(s.to_string()));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| ParseError::InvalidPort(port_str.to_string()))?;
    if port == 0 {
        return Err(ParseError::InvalidPort(port_str.to_string()));
    }
    Ok((host, port))
}

/// 查询串解码；同名键首个取值生效
fn parse_query(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if s.is_empty() {
        return map;
    }
    for pair in s.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            map.entry(url_decode(k)).or_insert_with(|| url_decode(v));
        }
    }
    map
}

fn param(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|v| !v.is_empty()).cloned()
}

fn param_or(params: &HashMap<String, String>, key: &str, default: &str) -> String {
    param(params, key).unwrap_or_else(|| default.to_string())
}

fn json_string(v: &serde_json::Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(String::from)
}

fn json_string_or(v: &serde_json::Value, default: &str) -> String {
    json_string(v).unwrap_or_else(|| default.to_string())
}

/// 数字字段兼容 JSON number 与字符串两种写法
fn json_number(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// 宽容的 Base64 解码：依次尝试标准、URL-safe、无填充变体
pub(crate) fn decode_base64_permissive(input: &str) -> Option<Vec<u8>> {
    let clean: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let stripped = clean.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(stripped))
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(stripped))
        .ok()
}

/// 百分号解码（`+` 视作空格）
pub(crate) fn url_decode(s: &str) -> String {
    if !s.contains('%') && !s.contains('+') {
        return s.to_string();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = [bytes[i + 1], bytes[i + 2]];
                match std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}
