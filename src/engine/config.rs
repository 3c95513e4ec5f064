//! 批次 → 引擎 JSON 配置
//!
//! 第 i 个候选：`in-{i}`（127.0.0.1:base_port+i 的 SOCKS5 无认证入站）
//! 经路由规则仅指向 `out-{i}`（该候选协议的出站）。

use serde_json::{json, Value};

use crate::server::{ProtocolParams, ServerDescriptor};

pub fn build_batch_config(batch: &[ServerDescriptor], base_port: u16) -> Value {
    let mut inbounds = Vec::with_capacity(batch.len());
    let mut outbounds = Vec::with_capacity(batch.len());
    let mut rules = Vec::with_capacity(batch.len());

    for (i, server) in batch.iter().enumerate() {
        let inbound_tag = format!("in-{}", i);
        let outbound_tag = format!("out-{}", i);

        inbounds.push(json!({
            "tag": inbound_tag,
            "port": base_port as u32 + i as u32,
            "listen": "127.0.0.1",
            "protocol": "socks",
            "settings": {"auth": "noauth", "udp": true, "ip": "127.0.0.1"},
        }));

        let mut outbound = build_outbound(server);
        outbound["tag"] = json!(outbound_tag);
        outbounds.push(outbound);

        rules.push(json!({
            "type": "field",
            "inboundTag": [inbound_tag],
            "outboundTag": outbound_tag,
        }));
    }

    json!({
        "log": {"loglevel": "warning"},
        "inbounds": inbounds,
        "outbounds": outbounds,
        "routing": {"rules": rules},
    })
}

fn build_outbound(server: &ServerDescriptor) -> Value {
    match &server.params {
        ProtocolParams::Vless {
            id,
            security,
            transport,
            host,
            path,
            sni,
            flow,
            fp,
            pbk,
            sid,
            ..
        } => {
            let vnext = json!([{
                "address": server.address,
                "port": server.port,
                "users": [{
                    "id": id,
                    "encryption": "none",
                    "flow": flow.clone().unwrap_or_default(),
                }],
            }]);
            let mut stream = stream_settings(transport, sanitize_security(security));
            apply_ws_settings(&mut stream, transport, path, host, &server.address);
            apply_tls_settings(&mut stream, sni, host, &server.address, fp, pbk, sid);
            json!({
                "protocol": "vless",
                "settings": {"vnext": vnext},
                "streamSettings": stream,
            })
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
            let vnext = json!([{
                "address": server.address,
                "port": server.port,
                "users": [{
                    "id": id,
                    "alterId": aid,
                    "security": security,
                }],
            }]);
            // VMess 的流层安全取自 tls 字段
            let mut stream = stream_settings(transport, sanitize_security(tls));
            apply_ws_settings(&mut stream, transport, path, host, &server.address);
            if stream["security"] == "tls" {
                stream["tlsSettings"] = json!({
                    "serverName": server_name(sni, host, &server.address),
                });
            }
            json!({
                "protocol": "vmess",
                "settings": {"vnext": vnext},
                "streamSettings": stream,
            })
        }
        ProtocolParams::Trojan {
            password,
            sni,
            transport,
            path,
            host,
            ..
        } => {
            let mut stream = stream_settings(transport, "tls");
            stream["tlsSettings"] = json!({
                "serverName": server_name(sni, host, &server.address),
            });
            apply_ws_settings(&mut stream, transport, path, host, &server.address);
            json!({
                "protocol": "trojan",
                "settings": {"servers": [{
                    "address": server.address,
                    "port": server.port,
                    "password": password,
                }]},
                "streamSettings": stream,
            })
        }
        ProtocolParams::Shadowsocks { method, password } => json!({
            "protocol": "shadowsocks",
            "settings": {"servers": [{
                "address": server.address,
                "port": server.port,
                "method": method,
                "password": password,
            }]},
        }),
        ProtocolParams::Hysteria2 {
            password,
            sni,
            insecure,
            obfs,
            obfs_password,
        } => {
            let mut server_info = json!({
                "address": server.address,
                "port": server.port,
                "password": password,
            });
            if let Some(obfs) = obfs.as_deref().filter(|o| *o != "none") {
                server_info["obfs"] = json!({
                    "type": obfs,
                    "password": obfs_password.clone().unwrap_or_default(),
                });
            }
            json!({
                "protocol": "hysteria2",
                "settings": {"servers": [server_info]},
                "streamSettings": {
                    "security": "tls",
                    "tlsSettings": {
                        "serverName": server_name(sni, &None, &server.address),
                        "allowInsecure": insecure,
                    },
                },
            })
        }
    }
}

/// `auto` 不是合法的流层安全值，按引擎约定改写为 `none`
fn sanitize_security(security: &str) -> &str {
    if security == "auto" {
        "none"
    } else {
        security
    }
}

fn stream_settings(transport: &str, security: &str) -> Value {
    json!({"network": transport, "security": security})
}

fn server_name(sni: &Option<String>, host: &Option<String>, address: &str) -> String {
    sni.clone()
        .or_else(|| host.clone())
        .unwrap_or_else(|| address.to_string())
}

fn apply_ws_settings(
    stream: &mut Value,
    transport: &str,
    path: &Option<String>,
    host: &Option<String>,
    address: &str,
) {
    if transport != "ws" {
        return;
    }
    let mut ws = json!({"path": path.clone().unwrap_or_else(|| "/".to_string())});
    let ws_host = host.clone().unwrap_or_else(|| address.to_string());
    if !ws_host.is_empty() {
        ws["host"] = json!(ws_host);
    }
    stream["wsSettings"] = ws;
}

fn apply_tls_settings(
    stream: &mut Value,
    sni: &Option<String>,
    host: &Option<String>,
    address: &str,
    fp: &Option<String>,
    pbk: &Option<String>,
    sid: &Option<String>,
) {
    let security = stream["security"].as_str().unwrap_or("none").to_string();
    if security != "tls" && security != "reality" {
        return;
    }
    let mut tls = json!({
        "serverName": server_name(sni, host, address),
        "fingerprint": fp.clone().unwrap_or_else(|| "chrome".to_string()),
    });
    if security == "reality" {
        // 未设置的字段不落成空串，直接省略
        if let Some(pbk) = pbk {
            tls["publicKey"] = json!(pbk);
        }
        if let Some(sid) = sid {
            tls["shortId"] = json!(sid);
        }
    }
    stream[format!("{}Settings", security)] = tls;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::parser::parse_uri;

    fn batch() -> Vec<ServerDescriptor> {
        vec![
            parse_uri("vless://uuid@a.example:443?security=reality&sni=a.example&pbk=PK&sid=SID&fp=firefox&flow=xtls-rprx-vision#A").unwrap(),
            parse_uri("ss://YWVzLTI1Ni1nY206cHc=@b.example:8388#B").unwrap(),
            parse_uri("hy2://pw@c.example:443?sni=c.example&obfs=salamander&obfs-password=op&insecure=1#C").unwrap(),
        ]
    }

    #[test]
    fn inbound_outbound_pairing_is_one_to_one() {
        let config = build_batch_config(&batch(), 20000);

        let inbounds = config["inbounds"].as_array().unwrap();
        let outbounds = config["outbounds"].as_array().unwrap();
        let rules = config["routing"]["rules"].as_array().unwrap();
        assert_eq!(inbounds.len(), 3);
        assert_eq!(outbounds.len(), 3);
        assert_eq!(rules.len(), 3);

        for i in 0..3 {
            assert_eq!(inbounds[i]["tag"], format!("in-{}", i));
            assert_eq!(inbounds[i]["port"], 20000 + i as u64);
            assert_eq!(inbounds[i]["listen"], "127.0.0.1");
            assert_eq!(inbounds[i]["protocol"], "socks");
            assert_eq!(inbounds[i]["settings"]["auth"], "noauth");
            assert_eq!(inbounds[i]["settings"]["udp"], true);
            assert_eq!(outbounds[i]["tag"], format!("out-{}", i));
            assert_eq!(rules[i]["inboundTag"][0], format!("in-{}", i));
            assert_eq!(rules[i]["outboundTag"], format!("out-{}", i));
            assert_eq!(rules[i]["type"], "field");
        }

        assert_eq!(config["log"]["loglevel"], "warning");
    }

    #[test]
    fn vless_reality_outbound() {
        let config = build_batch_config(&batch(), 20000);
        let ob = &config["outbounds"][0];
        assert_eq!(ob["protocol"], "vless");
        let user = &ob["settings"]["vnext"][0]["users"][0];
        assert_eq!(user["id"], "uuid");
        assert_eq!(user["encryption"], "none");
        assert_eq!(user["flow"], "xtls-rprx-vision");
        let stream = &ob["streamSettings"];
        assert_eq!(stream["security"], "reality");
        assert_eq!(stream["realitySettings"]["serverName"], "a.example");
        assert_eq!(stream["realitySettings"]["fingerprint"], "firefox");
        assert_eq!(stream["realitySettings"]["publicKey"], "PK");
        assert_eq!(stream["realitySettings"]["shortId"], "SID");
    }

    #[test]
    fn vless_reality_without_pbk_sid_omits_the_keys() {
        let d = parse_uri("vless://uuid@a.example:443?security=reality&sni=a.example#A").unwrap();
        let config = build_batch_config(&[d], 20000);
        let reality = &config["outbounds"][0]["streamSettings"]["realitySettings"];
        assert_eq!(reality["serverName"], "a.example");
        assert_eq!(reality["fingerprint"], "chrome");
        assert!(reality.get("publicKey").is_none());
        assert!(reality.get("shortId").is_none());
    }

    #[test]
    fn shadowsocks_outbound_has_no_stream_settings() {
        let config = build_batch_config(&batch(), 20000);
        let ob = &config["outbounds"][1];
        assert_eq!(ob["protocol"], "shadowsocks");
        let srv = &ob["settings"]["servers"][0];
        assert_eq!(srv["method"], "aes-256-gcm");
        assert_eq!(srv["password"], "pw");
        assert!(ob.get("streamSettings").is_none());
    }

    #[test]
    fn hysteria2_outbound_with_obfs() {
        let config = build_batch_config(&batch(), 20000);
        let ob = &config["outbounds"][2];
        assert_eq!(ob["protocol"], "hysteria2");
        let srv = &ob["settings"]["servers"][0];
        assert_eq!(srv["obfs"]["type"], "salamander");
        assert_eq!(srv["obfs"]["password"], "op");
        let tls = &ob["streamSettings"]["tlsSettings"];
        assert_eq!(tls["serverName"], "c.example");
        assert_eq!(tls["allowInsecure"], true);
    }

    #[test]
    fn hysteria2_obfs_none_is_omitted() {
        let d = parse_uri("hy2://pw@c.example:443?obfs=none#C").unwrap();
        let config = build_batch_config(&[d], 20000);
        let srv = &config["outbounds"][0]["settings"]["servers"][0];
        assert!(srv.get("obfs").is_none());
    }

    #[test]
    fn vmess_auto_security_rewritten_to_none() {
        use base64::Engine as _;
        let payload = r#"{"ps":"X","add":"h","port":443,"id":"u","scy":"auto","net":"tcp","tls":"auto"}"#;
        let d = parse_uri(&format!(
            "vmess://{}",
            base64::engine::general_purpose::STANDARD.encode(payload)
        ))
        .unwrap();
        let config = build_batch_config(&[d], 20000);
        let ob = &config["outbounds"][0];
        // 用户层 security 保留原值，流层 auto→none
        assert_eq!(ob["settings"]["vnext"][0]["users"][0]["security"], "auto");
        assert_eq!(ob["streamSettings"]["security"], "none");
        assert!(ob["streamSettings"].get("tlsSettings").is_none());
    }

    #[test]
    fn ws_transport_carries_path_and_host() {
        let d = parse_uri("vless://u@h.example:443?type=ws&path=%2Fws&host=cdn.example#W").unwrap();
        let config = build_batch_config(&[d], 20000);
        let stream = &config["outbounds"][0]["streamSettings"];
        assert_eq!(stream["network"], "ws");
        assert_eq!(stream["wsSettings"]["path"], "/ws");
        assert_eq!(stream["wsSettings"]["host"], "cdn.example");
    }

    #[test]
    fn trojan_outbound_always_tls() {
        let d = parse_uri("trojan://pw@t.example:443#T").unwrap();
        let config = build_batch_config(&[d], 20000);
        let stream = &config["outbounds"][0]["streamSettings"];
        assert_eq!(stream["security"], "tls");
        assert_eq!(stream["tlsSettings"]["serverName"], "t.example");
    }

    #[test]
    fn empty_batch_produces_empty_sections() {
        let config = build_batch_config(&[], 20000);
        assert_eq!(config["inbounds"].as_array().unwrap().len(), 0);
        assert_eq!(config["outbounds"].as_array().unwrap().len(), 0);
    }
}
