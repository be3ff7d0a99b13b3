use reqwest::header::HOST;
use reqwest::Client;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::start_proxy;

fn single_service_config(upstream: &str, pass_host_header: bool) -> String {
    format!(
        r#"
http:
  routers:
    r1:
      rule: "Host(`example.com`)"
      service: svc
  services:
    svc:
      load_balancer:
        pass_host_header: {pass_host_header}
        servers:
          - url: "{upstream}"
"#
    )
}

#[tokio::test]
async fn matched_host_is_forwarded_with_original_host_header() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&backend)
        .await;

    let proxy = start_proxy(&single_service_config(&backend.uri(), false)).await;

    let response = Client::new()
        .get(proxy.url("/x"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("x-content-type-options")
            .and_then(|value| value.to_str().ok()),
        Some("nosniff")
    );
    assert_eq!(
        response
            .headers()
            .get("x-frame-options")
            .and_then(|value| value.to_str().ok()),
        Some("DENY")
    );
    assert_eq!(response.text().await.unwrap(), "OK");

    let requests = backend.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/x");
    assert_eq!(
        requests[0]
            .headers
            .get("host")
            .and_then(|value| value.to_str().ok()),
        Some("example.com"),
        "client Host header must be forwarded unchanged"
    );
}

#[tokio::test]
async fn pass_host_header_rewrites_to_upstream_host() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let proxy = start_proxy(&single_service_config(&backend.uri(), true)).await;

    let response = Client::new()
        .get(proxy.url("/"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), 200);

    let upstream_host = backend.address().to_string();
    let requests = backend.received_requests().await.unwrap();
    assert_eq!(
        requests[0]
            .headers
            .get("host")
            .and_then(|value| value.to_str().ok()),
        Some(upstream_host.as_str())
    );
}

#[tokio::test]
async fn invalid_rule_is_skipped_and_next_router_matches() {
    let backend = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string("reached"))
        .mount(&backend)
        .await;

    let config = format!(
        r#"
http:
  routers:
    broken:
      rule: "InvalidRule"
      service: svc
    good:
      rule: "Host(`example.com`)"
      service: svc
  services:
    svc:
      load_balancer:
        servers:
          - url: "{}"
"#,
        backend.uri()
    );
    let proxy = start_proxy(&config).await;

    let response = Client::new()
        .get(proxy.url("/"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "reached");
}

#[tokio::test]
async fn unmatched_host_gets_the_stock_404() {
    let proxy = start_proxy(
        r#"
http:
  routers:
    r1:
      rule: "Host(`example.com`)"
      service: svc
  services:
    svc:
      load_balancer:
        servers:
          - url: "http://127.0.0.1:9"
"#,
    )
    .await;

    let response = Client::new()
        .get(proxy.url("/"))
        .header(HOST, "nope.local")
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "404 page not found");
}

#[tokio::test]
async fn router_pointing_at_missing_service_gets_404() {
    let proxy = start_proxy(
        r#"
http:
  routers:
    r1:
      rule: "Host(`example.com`)"
      service: ghost
  services: {}
"#,
    )
    .await;

    let response = Client::new()
        .get(proxy.url("/"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn unreachable_upstream_yields_the_502_contract() {
    // Nothing listens on this port; the dial fails and the forwarder answers
    // with its JSON error body.
    let proxy = start_proxy(
        r#"
http:
  routers:
    r1:
      rule: "Host(`example.com`)"
      service: svc
  services:
    svc:
      load_balancer:
        servers:
          - url: "http://127.0.0.1:1"
"#,
    )
    .await;

    let response = Client::new()
        .get(proxy.url("/"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), 502);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(
        response
            .headers()
            .get("x-frame-options")
            .and_then(|value| value.to_str().ok()),
        Some("DENY")
    );

    let body: serde_json::Value = response.json().await.expect("502 body must be JSON");
    assert_eq!(body["error"], "Service not available");
    assert_eq!(body["code"], 502);
    assert_eq!(body["message"], "Please try again later.");
}
