use std::time::{Duration, Instant};

use reqwest::header::HOST;
use reqwest::Client;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{start_proxy, write_file};

async fn backend(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

fn config_for(upstream: &str) -> String {
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
        servers:
          - url: "{upstream}"
"#
    )
}

#[tokio::test]
async fn rewriting_the_file_moves_traffic_without_drops() {
    let backend_a = backend("a").await;
    let backend_b = backend("b").await;

    let proxy = start_proxy(&config_for(&backend_a.uri())).await;
    let client = Client::new();

    let body = client
        .get(proxy.url("/"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed")
        .text()
        .await
        .unwrap();
    assert_eq!(body, "a");

    write_file(&proxy.dynamic_path, &config_for(&backend_b.uri()));

    // Keep issuing requests through the reload window. Every one of them
    // must succeed; eventually they land on the new upstream.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let response = client
            .get(proxy.url("/"))
            .header(HOST, "example.com")
            .send()
            .await
            .expect("request should succeed during reload");
        assert_eq!(response.status(), 200, "no request may be dropped mid-swap");

        let body = response.text().await.unwrap();
        if body == "b" {
            break;
        }
        assert_eq!(body, "a", "only the old or the new upstream may answer");

        assert!(
            Instant::now() < deadline,
            "reload was not observed within 10s"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn invalid_rewrite_keeps_the_previous_configuration() {
    let backend_a = backend("a").await;

    let proxy = start_proxy(&config_for(&backend_a.uri())).await;
    let client = Client::new();

    write_file(&proxy.dynamic_path, "http: definitely not valid\n");

    // Give the watcher time to debounce and reject the update.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let body = client
        .get(proxy.url("/"))
        .header(HOST, "example.com")
        .send()
        .await
        .expect("request should succeed")
        .text()
        .await
        .unwrap();
    assert_eq!(body, "a", "last known good configuration must keep serving");
}
