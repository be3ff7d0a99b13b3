use reqwest::header::HOST;
use reqwest::Client;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::start_proxy;

async fn backend(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn two_upstreams_rotate_starting_with_the_second() {
    let backend_a = backend("a").await;
    let backend_b = backend("b").await;

    let config = format!(
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
          - url: "{}"
          - url: "{}"
"#,
        backend_a.uri(),
        backend_b.uri()
    );
    let proxy = start_proxy(&config).await;

    let client = Client::new();
    let mut bodies = Vec::new();
    for _ in 0..4 {
        let response = client
            .get(proxy.url("/"))
            .header(HOST, "example.com")
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), 200);
        bodies.push(response.text().await.unwrap());
    }

    assert_eq!(bodies, ["b", "a", "b", "a"]);
}

#[tokio::test]
async fn three_upstreams_share_the_load_evenly() {
    let backends = [backend("1").await, backend("2").await, backend("3").await];

    let config = format!(
        r#"
http:
  routers:
    r1:
      rule: "Host(`example.com`)"
      service: svc
  services:
    svc:
      load_balancer:
        algorithm: round-robin
        servers:
          - url: "{}"
          - url: "{}"
          - url: "{}"
"#,
        backends[0].uri(),
        backends[1].uri(),
        backends[2].uri()
    );
    let proxy = start_proxy(&config).await;

    let client = Client::new();
    for _ in 0..30 {
        let response = client
            .get(proxy.url("/"))
            .header(HOST, "example.com")
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), 200);
    }

    for (index, backend) in backends.iter().enumerate() {
        let count = backend.received_requests().await.unwrap().len();
        assert_eq!(count, 10, "backend {index} received wrong amount of requests");
    }
}
