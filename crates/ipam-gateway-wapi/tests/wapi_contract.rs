//! Contract Test: WAPI Wire Format
//!
//! Constraints verified:
//! - Records are read, searched and written in the WAPI shape
//! - A stale reference falls back to the correlation attribute search
//! - Allocation looks up the network, then asks for the next free address
//! - HTTP statuses map onto the reconciler's error kinds
//! - Dry-run mode never sends a write
//!
//! If this test fails, the gateway no longer speaks the service's dialect.

use ipam_core::Error;
use ipam_core::attrs::{ExtAttrs, INTERNAL_ID_ATTR};
use ipam_core::resolve::FilterParams;
use ipam_core::traits::{RecordGateway, RecordKind, RecordPayload, TtlSetting};
use ipam_gateway_wapi::WapiGateway;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use wiremock::matchers::{body_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REF: &str = "record:aaaa/ZG5zLmJpbmRfYWFhYQ:a.example.com/default";

fn gateway(server: &MockServer, dry_run: bool) -> WapiGateway {
    WapiGateway::new(&server.uri(), "2.12", "admin", "infoblox", dry_run).unwrap()
}

fn wire_record(reference: &str, address: &str) -> Value {
    json!({
        "_ref": reference,
        "name": "a.example.com",
        "ipv6addr": address,
        "view": "default",
        "ttl": 10,
        "use_ttl": true,
        "comment": "managed",
        "extattrs": {
            "Site": { "value": "HQ" },
            (INTERNAL_ID_ATTR): { "value": "id-1" }
        }
    })
}

fn payload() -> RecordPayload {
    let mut ext_attrs = ExtAttrs::new();
    ext_attrs.insert("Site".to_string(), "HQ".to_string());
    RecordPayload {
        fqdn: "a.example.com".to_string(),
        ipv6_addr: "2000::1".parse().unwrap(),
        dns_view: Some("default".to_string()),
        ttl: TtlSetting::Inherit,
        comment: Some("managed".to_string()),
        ext_attrs,
    }
}

#[tokio::test]
async fn get_by_ref_decodes_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/wapi/v2.12/{}", REF)))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(wire_record(REF, "2000::1")))
        .expect(1)
        .mount(&server)
        .await;

    let record = gateway(&server, false).get_by_ref(REF).await.unwrap();

    assert_eq!(record.reference, REF);
    assert_eq!(record.ipv6_addr, "2000::1".parse::<std::net::Ipv6Addr>().unwrap());
    assert_eq!(record.ttl, TtlSetting::Explicit(10));
    assert_eq!(record.comment.as_deref(), Some("managed"));
    assert_eq!(record.ext_attrs.get(INTERNAL_ID_ATTR).map(String::as_str), Some("id-1"));
}

#[tokio::test]
async fn stale_reference_falls_back_to_correlation_search() {
    let server = MockServer::start().await;
    let moved = "record:aaaa/bW92ZWQ:a.example.com/default";

    Mock::given(method("GET"))
        .and(path(format!("/wapi/v2.12/{}", REF)))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/record:aaaa"))
        .and(query_param(format!("*{}", INTERNAL_ID_ATTR), "id-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([wire_record(moved, "2000::1")])))
        .expect(1)
        .mount(&server)
        .await;

    let record = gateway(&server, false)
        .search_by_alt_id(RecordKind::Aaaa, REF, "id-1", INTERNAL_ID_ATTR)
        .await
        .unwrap();
    assert_eq!(record.reference, moved);
}

#[tokio::test]
async fn missing_everywhere_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/record:aaaa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = gateway(&server, false)
        .search_by_alt_id(RecordKind::Aaaa, "", "id-1", INTERNAL_ID_ATTR)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn filter_search_is_scoped_to_view() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/record:aaaa"))
        .and(query_param("view", "internal"))
        .and(query_param("*Site", "Blr"))
        .and(query_param("name", "dynamic.test1.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([wire_record(REF, "2000::1")])))
        .expect(1)
        .mount(&server)
        .await;

    let mut raw = BTreeMap::new();
    raw.insert("*Site".to_string(), "Blr".to_string());
    raw.insert("name".to_string(), "dynamic.test1.com".to_string());
    let filter = FilterParams::parse(&raw).unwrap();

    let matches = gateway(&server, false)
        .search_by_filter(RecordKind::Aaaa, &filter, "internal")
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn create_posts_wire_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wapi/v2.12/record:aaaa"))
        .and(body_json(json!({
            "name": "a.example.com",
            "ipv6addr": "2000::1",
            "view": "default",
            "use_ttl": false,
            "comment": "managed",
            "extattrs": { "Site": { "value": "HQ" } }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(wire_record(REF, "2000::1")))
        .expect(1)
        .mount(&server)
        .await;

    let record = gateway(&server, false).create(&payload()).await.unwrap();
    assert_eq!(record.reference, REF);
}

#[tokio::test]
async fn update_puts_without_view() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("/wapi/v2.12/{}", REF)))
        .and(body_json(json!({
            "name": "a.example.com",
            "ipv6addr": "2000::1",
            "use_ttl": false,
            "comment": "managed",
            "extattrs": { "Site": { "value": "HQ" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(wire_record(REF, "2000::1")))
        .expect(1)
        .mount(&server)
        .await;

    gateway(&server, false).update(&payload(), REF).await.unwrap();
}

#[tokio::test]
async fn delete_of_absent_record_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/wapi/v2.12/{}", REF)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    gateway(&server, false).delete(REF).await.unwrap();
}

#[tokio::test]
async fn allocation_uses_next_available_function() {
    let server = MockServer::start().await;
    let network_ref = "ipv6network/ZG5z:2000%3A1fde%3A%3A/96/default";

    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/ipv6network"))
        .and(query_param("network", "2000:1fde::/96"))
        .and(query_param("network_view", "default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "_ref": network_ref }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("_function", "next_available_ip"))
        .and(body_json(json!({ "num": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ips": ["2000:1fde::5"] })))
        .expect(1)
        .mount(&server)
        .await;

    let address = gateway(&server, false)
        .allocate_next_address("default", &"2000:1fde::/96".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(address, "2000:1fde::5".parse::<std::net::Ipv6Addr>().unwrap());
}

#[tokio::test]
async fn unknown_network_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/ipv6network"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = gateway(&server, false)
        .allocate_next_address("default", &"2000:1fde::/96".parse().unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn full_network_is_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/ipv6network"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "_ref": "ipv6network/full:2000::/127/default" }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("_function", "next_available_ip"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            "AdmConDataError: None (IBDataConflictError: IB.Data.Conflict:Cannot find 1 available IP address(es) in this network)",
        ))
        .mount(&server)
        .await;

    let err = gateway(&server, false)
        .allocate_next_address("default", &"2000::/127".parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllocationExhausted { .. }));
}

#[tokio::test]
async fn unrelated_allocation_error_is_not_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wapi/v2.12/ipv6network"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "_ref": "ipv6network/net:2000:1fde::/96/default" }])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            "AdmConProtoError: Function next_available_ipv6addr is not valid for this object",
        ))
        .mount(&server)
        .await;

    let err = gateway(&server, false)
        .allocate_next_address("default", &"2000:1fde::/96".parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Gateway { .. }), "{:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;
    let cases = [
        ("auth", 401u16),
        ("busy", 429),
        ("down", 503),
        ("bad", 400),
    ];
    for (name, status) in cases {
        Mock::given(method("GET"))
            .and(path(format!("/wapi/v2.12/record:aaaa/{}", name)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let gateway = gateway(&server, false);
    let auth = gateway.get_by_ref("record:aaaa/auth").await.unwrap_err();
    assert!(matches!(auth, Error::Authentication(_)));
    assert!(!auth.is_retryable());

    assert!(gateway.get_by_ref("record:aaaa/busy").await.unwrap_err().is_retryable());
    assert!(gateway.get_by_ref("record:aaaa/down").await.unwrap_err().is_retryable());

    let bad = gateway.get_by_ref("record:aaaa/bad").await.unwrap_err();
    assert!(matches!(bad, Error::Gateway { .. }));
    assert!(!bad.is_retryable());
}

#[tokio::test]
async fn dry_run_never_writes() {
    let server = MockServer::start().await;
    for verb in ["POST", "PUT", "DELETE"] {
        Mock::given(method(verb))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
    }

    let gateway = gateway(&server, true);
    let created = gateway.create(&payload()).await.unwrap();
    assert_eq!(created.fqdn, "a.example.com");
    assert_eq!(created.ext_attrs, payload().ext_attrs);

    let updated = gateway.update(&payload(), REF).await.unwrap();
    assert_eq!(updated.reference, REF);

    gateway.delete(REF).await.unwrap();
}
