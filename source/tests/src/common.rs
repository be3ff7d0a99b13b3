use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::Client;
use tempfile::TempDir;

use asena::app_context::AppContext;
use asena_config::cli::Cli;

pub fn get_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn write_file(path: &Path, contents: &str) {
    fs::write(path, contents).expect("Failed to write file");
}

/// A proxy instance serving on a private port, with its config files in a
/// temp directory so tests can rewrite them.
pub struct TestProxy {
    pub port: u16,
    pub dynamic_path: PathBuf,
    _config_dir: TempDir,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

pub async fn start_proxy(dynamic_config: &str) -> TestProxy {
    let dir = TempDir::new().expect("Failed to create temp config dir");
    let static_path = dir.path().join("asena.yaml");
    let dynamic_path = dir.path().join("dynamic.yaml");
    let port = get_free_port();

    write_file(&static_path, "asena: {}\n");
    write_file(&dynamic_path, dynamic_config);

    let cli = Cli {
        config_file: static_path,
        dynamic_file: dynamic_path.clone(),
        http_port: Some(format!(":{port}")),
        https_port: None,
        cert_file: None,
        key_file: None,
    };

    let ctx = AppContext::bootstrap_with(cli)
        .await
        .expect("Failed to bootstrap proxy");
    let services = ctx.build_services();
    let (mut server, tasks) = ctx.ready();

    server.bootstrap();
    server.add_services(services);

    tokio::spawn(tasks.run());
    thread::spawn(move || {
        server.run_forever();
    });

    let proxy = TestProxy {
        port,
        dynamic_path,
        _config_dir: dir,
    };
    wait_for_proxy(&proxy.url("/")).await;
    proxy
}

pub async fn wait_for_proxy(url: &str) {
    let client = Client::new();
    let start = std::time::Instant::now();

    while start.elapsed() < Duration::from_secs(5) {
        if client.get(url).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Proxy did not start at {} within timeout", url);
}
