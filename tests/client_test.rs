//! Integration tests for the Consul HTTP client using wiremock
//!
//! These validate endpoint paths, query parameters, payload encodings and
//! the blocking-query index handling against a mock agent.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use regwatch::consul::{AgentApi, CatalogApi, EventApi, HttpClient, KvApi, RemoteAgents};
use regwatch::models::CheckStatus;

async fn client(server: &MockServer) -> HttpClient {
    HttpClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_kv_list_decodes_base64_values() {
    let server = MockServer::start().await;
    let doc = r#"{"name":"web","address":"10.0.0.1","port":80}"#;
    let body = serde_json::json!([
        {"Key": "services/web", "Value": BASE64.encode(doc), "ModifyIndex": 42},
        {"Key": "services/empty", "Value": null}
    ]);

    Mock::given(method("GET"))
        .and(path("/v1/kv/services"))
        .and(query_param("recurse", ""))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let snapshot = client(&server).await.list("/services").await.unwrap();

    assert_eq!(snapshot.len(), 2);
    assert_eq!(&snapshot.entries[0].value[..], doc.as_bytes());
    assert_eq!(snapshot.entries[0].modify_index, Some(42));
    assert!(snapshot.entries[1].value.is_empty());
}

#[tokio::test]
async fn test_kv_list_missing_prefix_is_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/kv/services"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let snapshot = client(&server).await.list("/services").await.unwrap();
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn test_blocking_query_returns_consul_index() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/kv/services"))
        .and(query_param("index", "3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "17")
                .set_body_json(serde_json::json!([])),
        )
        .mount(&server)
        .await;

    let (index, snapshot) = client(&server)
        .await
        .list_blocking("/services", 3, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(index, 17);
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn test_register_sends_consul_convention_fields() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .and(body_string_contains("\"Name\":\"web\""))
        .and(body_string_contains("\"Address\":\"10.0.0.1\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut reg = regwatch::ServiceRegistration::new("web");
    reg.address = "10.0.0.1".to_string();
    reg.port = 80;

    client(&server).await.register(&reg).await.unwrap();
}

#[tokio::test]
async fn test_deregister_targets_service_id_path() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/deregister/web-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    AgentApi::deregister(&client(&server).await, "web-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_agent_error_carries_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/deregister/ghost"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Unknown service"))
        .mount(&server)
        .await;

    let err = AgentApi::deregister(&client(&server).await, "ghost")
        .await
        .unwrap_err();

    let rendered = err.to_string();
    assert!(rendered.contains("500"), "missing status in: {rendered}");
    assert!(rendered.contains("Unknown service"));
}

#[tokio::test]
async fn test_node_name_from_agent_self() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/agent/self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Config": {"NodeName": "node-7"}
        })))
        .mount(&server)
        .await;

    let name = client(&server).await.node_name().await.unwrap();
    assert_eq!(name, "node-7");
}

#[tokio::test]
async fn test_agent_services_listing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/agent/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "web-1": {"ID": "web-1", "Service": "web", "Address": "10.0.0.1", "Port": 80, "Tags": ["t"]}
        })))
        .mount(&server)
        .await;

    let services = client(&server).await.services().await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].id, "web-1");
    assert_eq!(services[0].service, "web");
}

#[tokio::test]
async fn test_check_registration_and_update() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/register"))
        .and(body_string_contains("\"TTL\":\"30s\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/update/regwatch_ttl"))
        .and(body_string_contains("\"Status\":\"passing\""))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let c = client(&server).await;
    c.register_check("regwatch_ttl", Duration::from_secs(30))
        .await
        .unwrap();
    c.update_check("regwatch_ttl", CheckStatus::Passing, "ttl refresh")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_catalog_queries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "web": ["t"], "db": []
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/service/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"Node": "node2", "Address": "10.9.9.9", "ServiceID": "web-1",
             "ServiceName": "web", "ServiceAddress": "", "ServicePort": 80,
             "ServiceTags": ["t"]}
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/catalog/node/node2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Node": {"Node": "node2", "Address": "10.9.9.9"},
            "Services": {}
        })))
        .mount(&server)
        .await;

    let c = client(&server).await;

    let mut names = c.service_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["db".to_string(), "web".to_string()]);

    let instances = c.service_instances("web").await.unwrap();
    assert_eq!(instances[0].effective_address(), "10.9.9.9");

    let node = c.node_info("node2").await.unwrap();
    assert_eq!(node.address, "10.9.9.9");
}

#[tokio::test]
async fn test_event_fire_sends_raw_payload() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/event/fire/services_takeover"))
        .and(body_string_contains("fingerprint-bytes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .await
        .fire("services_takeover", b"fingerprint-bytes")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remote_deregister_builds_remote_base() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/deregister/web-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // route the "remote" call back at the mock server
    let local = HttpClient::new("http://127.0.0.1:1", Duration::from_secs(5)).unwrap();
    let addr = server.address();
    RemoteAgents::deregister(&local, &addr.ip().to_string(), addr.port(), "web-1")
        .await
        .unwrap();
}
