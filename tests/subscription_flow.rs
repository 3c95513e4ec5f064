//! 订阅内容 → 描述符流水线集成测试
//!
//! 覆盖正文解码、逐行解析、跨协议去重与 URI 再生成的互逆性。

use base64::Engine as _;
use rayscan::fetch::parse_feed_payload;
use rayscan::server::{dedup_by_fingerprint, generator, parser::parse_uri};

fn mixed_feed() -> String {
    let vmess_json = r#"{"v":"2","ps":"VM","add":"vm.example","port":"443","id":"vm-uuid","aid":0,"scy":"auto","net":"ws","host":"vm.example","path":"/ws","tls":"tls","sni":"vm.example"}"#;
    format!(
        "vless://uuid@vl.example:443?security=reality&sni=vl.example&pbk=PK&sid=SID&type=tcp&flow=xtls-rprx-vision#VL\n\
         vmess://{}\n\
         trojan://pw@tr.example:443?sni=tr.example#TR\n\
         ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpwYXNzd29yZA==@ss.example:8388#SS\n\
         hy2://pw@hy.example:46914/?insecure=1&sni=hy.example&obfs=salamander&obfs-password=op#HY\n\
         ssr://ignored\n\
         malformed line\n",
        base64::engine::general_purpose::STANDARD.encode(vmess_json)
    )
}

#[test]
fn mixed_feed_parses_all_supported_protocols() {
    let servers = parse_feed_payload(&mixed_feed());
    let protocols: Vec<&str> = servers.iter().map(|s| s.protocol()).collect();
    assert_eq!(
        protocols,
        vec!["vless", "vmess", "trojan", "shadowsocks", "hysteria2"]
    );
}

#[test]
fn base64_wrapped_feed_equals_plain_feed() {
    let plain = parse_feed_payload(&mixed_feed());
    let encoded = base64::engine::general_purpose::STANDARD.encode(mixed_feed());
    let wrapped = parse_feed_payload(&encoded);

    assert_eq!(plain.len(), wrapped.len());
    for (a, b) in plain.iter().zip(&wrapped) {
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}

#[test]
fn cross_feed_dedup_is_first_seen_wins() {
    // 同一节点在两个"源"里备注不同：保留先出现的
    let feed_a = "trojan://pw@dup.example:443#FromFeedA\n";
    let feed_b = "trojan://pw@dup.example:443#FromFeedB\n\
                  trojan://pw@unique.example:443#OnlyB\n";

    let mut combined = parse_feed_payload(feed_a);
    combined.extend(parse_feed_payload(feed_b));
    let unique = dedup_by_fingerprint(combined);

    assert_eq!(unique.len(), 2);
    assert_eq!(unique[0].remark, "FromFeedA");
    assert_eq!(unique[1].remark, "OnlyB");
}

#[test]
fn every_parsed_server_regenerates_to_equivalent_uri() {
    for server in parse_feed_payload(&mixed_feed()) {
        let mut enriched = server.clone();
        enriched.remark = "🇺🇳 UN 42ms".to_string();
        enriched.delay_ms = Some(42);
        let regenerated = generator::generate(&enriched);
        let reparsed = parse_uri(&regenerated)
            .unwrap_or_else(|| panic!("regenerated URI failed to parse: {}", regenerated));
        assert_eq!(
            server.fingerprint(),
            reparsed.fingerprint(),
            "fingerprint drift for {}",
            server.protocol()
        );
        assert_eq!(reparsed.remark, "🇺🇳 UN 42ms");
    }
}
