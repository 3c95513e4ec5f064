//! 描述符 → 订阅 URI 的再生成
//!
//! 评估完成后用新备注（旗帜/国家/延迟）重建 `raw_uri`。生成结果与解析器
//! 互逆（指纹层面）：未知字段在解析时已丢弃，不再还原。

use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::{ProtocolParams, ServerDescriptor};

/// 与 URL 片段/查询值兼容的编码集：保留非保留字符
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn generate(server: &ServerDescriptor) -> String {
    match &server.params {
        ProtocolParams::Vless {
            id,
            encryption,
            security,
            transport,
            host,
            path,
            sni,
            flow,
            fp,
            pbk,
            sid,
        } => {
            let mut query = QueryBuilder::new();
            query.push("encryption", encryption);
            query.push("security", security);
            query.push("type", transport);
            query.push_opt("host", host);
            query.push_opt("path", path);
            query.push_opt("sni", sni);
            query.push_opt("flow", flow);
            query.push_opt("fp", fp);
            query.push_opt("pbk", pbk);
            query.push_opt("sid", sid);
            format!(
                "vless://{}@{}:{}?{}#{}",
                id,
                server.address,
                server.port,
                query.finish(),
                encode(&server.remark)
            )
        }
        ProtocolParams::Vmess {
            id,
            security,
            transport,
            host,
            path,
            tls,
            sni,
            aid,
        } => {
            // 固定键集，无空白；serde_json 默认按键名排序输出
            let payload = serde_json::json!({
                "v": "2",
                "ps": server.remark,
                "add": server.address,
                "port": server.port.to_string(),
                "id": id,
                "aid": aid,
                "scy": security,
                "net": transport,
                "type": "none",
                "host": host.clone().unwrap_or_default(),
                "path": path.clone().unwrap_or_default(),
                "tls": tls,
                "sni": sni.clone().unwrap_or_default(),
            });
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(payload.to_string());
            format!("vmess://{}", encoded)
        }
        ProtocolParams::Trojan {
            password,
            sni,
            security,
            transport,
            flow,
            path,
            host,
        } => {
            let mut query = QueryBuilder::new();
            query.push("security", security);
            query.push_opt("sni", sni);
            query.push("type", transport);
            query.push_opt("flow", flow);
            query.push_opt("path", path);
            query.push_opt("host", host);
            format!(
                "trojan://{}@{}:{}?{}#{}",
                encode(password),
                server.address,
                server.port,
                query.finish(),
                encode(&server.remark)
            )
        }
        ProtocolParams::Shadowsocks { method, password } => {
            let user_info = base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(format!("{}:{}", method, password));
            format!(
                "ss://{}@{}:{}#{}",
                user_info,
                server.address,
                server.port,
                encode(&server.remark)
            )
        }
        ProtocolParams::Hysteria2 {
            password,
            sni,
            insecure,
            obfs,
            obfs_password,
        } => {
            let mut query = QueryBuilder::new();
            query.push_opt("sni", sni);
            query.push_opt("obfs", obfs);
            query.push_opt("obfs-password", obfs_password);
            if *insecure {
                query.push("insecure", "1");
            }
            format!(
                "hy2://{}@{}:{}?{}#{}",
                password,
                server.address,
                server.port,
                query.finish(),
                encode(&server.remark)
            )
        }
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// 键按字典序输出的查询串构造器
struct QueryBuilder {
    pairs: std::collections::BTreeMap<String, String>,
}

impl QueryBuilder {
    fn new() -> Self {
        Self {
            pairs: std::collections::BTreeMap::new(),
        }
    }

    fn push(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.pairs.insert(key.to_string(), encode(value));
        }
    }

    fn push_opt(&mut self, key: &str, value: &Option<String>) {
        if let Some(v) = value {
            self.push(key, v);
        }
    }

    fn finish(self) -> String {
        self.pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_uri;
    use super::super::ProtocolParams;
    use super::*;
    use base64::Engine as _;

    fn enriched(mut d: crate::server::ServerDescriptor) -> crate::server::ServerDescriptor {
        d.remark = "🇺🇸 US 78ms".to_string();
        d.delay_ms = Some(78);
        d.country_code = "US".to_string();
        d.flag = "🇺🇸".to_string();
        d
    }

    #[test]
    fn vless_roundtrip_preserves_fingerprint() {
        let original = parse_uri(
            "vless://uuid@example.com:443?security=reality&sni=example.com&fp=chrome&pbk=PK&sid=SID&type=tcp&flow=xtls-rprx-vision#E",
        )
        .unwrap();
        let regenerated = generate(&enriched(original.clone()));
        let reparsed = parse_uri(&regenerated).unwrap();
        assert_eq!(original.fingerprint(), reparsed.fingerprint());
        assert_eq!(reparsed.remark, "🇺🇸 US 78ms");
    }

    #[test]
    fn vmess_roundtrip_preserves_fingerprint() {
        let json = r#"{"v":"2","ps":"VM","add":"example.com","port":"443","id":"uuid","aid":2,"scy":"auto","net":"ws","host":"cdn.example.com","path":"/ws","tls":"tls","sni":"example.com"}"#;
        let original = parse_uri(&format!(
            "vmess://{}",
            base64::engine::general_purpose::STANDARD.encode(json)
        ))
        .unwrap();
        let reparsed = parse_uri(&generate(&enriched(original.clone()))).unwrap();
        assert_eq!(original.fingerprint(), reparsed.fingerprint());
    }

    #[test]
    fn trojan_roundtrip_preserves_fingerprint() {
        let original =
            parse_uri("trojan://p%40ss@example.com:443?sni=example.com&type=ws&path=%2Fws#T")
                .unwrap();
        match &original.params {
            ProtocolParams::Trojan { password, .. } => assert_eq!(password, "p@ss"),
            other => panic!("wrong variant: {:?}", other),
        }
        let reparsed = parse_uri(&generate(&enriched(original.clone()))).unwrap();
        assert_eq!(original.fingerprint(), reparsed.fingerprint());
    }

    #[test]
    fn shadowsocks_roundtrip_preserves_fingerprint() {
        let original =
            parse_uri("ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpwYXNzd29yZA==@example.com:8388#SS")
                .unwrap();
        let reparsed = parse_uri(&generate(&enriched(original.clone()))).unwrap();
        assert_eq!(original.fingerprint(), reparsed.fingerprint());
    }

    #[test]
    fn hysteria2_roundtrip_preserves_fingerprint() {
        let original = parse_uri(
            "hy2://pw@h:46914/?insecure=1&sni=www.google.com&obfs=salamander&obfs-password=%26O%2328YB5qK%215t%23U#T",
        )
        .unwrap();
        let regenerated = generate(&enriched(original.clone()));
        let reparsed = parse_uri(&regenerated).unwrap();
        assert_eq!(original.fingerprint(), reparsed.fingerprint());
        match reparsed.params {
            ProtocolParams::Hysteria2 {
                insecure,
                obfs_password,
                ..
            } => {
                assert!(insecure);
                assert_eq!(obfs_password.as_deref(), Some("&O#28YB5qK!5t#U"));
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn vmess_payload_has_stable_key_set() {
        let d = parse_uri(&format!(
            "vmess://{}",
            base64::engine::general_purpose::STANDARD
                .encode(r#"{"ps":"X","add":"h","port":443,"id":"u"}"#)
        ))
        .unwrap();
        let uri = generate(&d);
        let payload = uri.strip_prefix("vmess://").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        for key in [
            "v", "ps", "add", "port", "id", "aid", "scy", "net", "type", "host", "path", "tls",
            "sni",
        ] {
            assert!(v.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(v["v"], "2");
        assert_eq!(v["type"], "none");
        assert_eq!(v["port"], "443");
        // 无空白输出
        assert!(!String::from_utf8_lossy(&decoded).contains(": "));
    }

    #[test]
    fn query_is_sorted_and_remark_percent_encoded() {
        let d = parse_uri("vless://u@h:1?type=ws&security=tls&path=/x&sni=s#My Node").unwrap();
        let mut e = enriched(d);
        e.remark = "🇩🇪 DE 120ms".to_string();
        let uri = generate(&e);
        let query = uri.split('?').nth(1).unwrap().split('#').next().unwrap();
        let keys: Vec<&str> = query.split('&').map(|p| p.split('=').next().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(uri.ends_with("#%F0%9F%87%A9%F0%9F%87%AA%20DE%20120ms"));
    }
}
