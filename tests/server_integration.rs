//! HTTP control surface over a real socket.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use combat_monitor::config::{FileWatcherConfig, LoopConfig, MonitorConfig};
use combat_monitor::monitor::{RealTimeMonitor, StartOptions};
use combat_monitor::server::{MonitorServer, ServerError};

struct TestServer {
    base: String,
    monitor: RealTimeMonitor,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = MonitorConfig {
            file_watcher: FileWatcherConfig {
                debounce_ms: 10,
                use_polling: true,
                poll_interval_ms: 20,
            },
            monitor: LoopConfig {
                poll_interval_ms: 10,
                ..LoopConfig::default()
            },
            ..MonitorConfig::default()
        };
        let monitor = RealTimeMonitor::new(config);
        let cancel = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = MonitorServer::new(monitor.clone(), cancel.clone());
        let handle = tokio::spawn(server.serve(listener));
        Self {
            base,
            monitor,
            cancel,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn shutdown(self) {
        self.monitor.stop().await;
        self.cancel.cancel();
        timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_status_and_lifecycle_commands() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(server.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "stopped");

    let response = client.post(server.url("/api/pause")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.log");
    std::fs::write(&path, "x\n").unwrap();
    server
        .monitor
        .start(&path, StartOptions::from_beginning())
        .await
        .unwrap();

    let response = client.post(server.url("/api/pause")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["position"]["byteOffset"].is_u64());

    let response = client.post(server.url("/api/resume")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.post(server.url("/api/stop")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: serde_json::Value = client
        .get(server.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "stopped");

    server.shutdown().await;
}

#[tokio::test]
async fn test_webhook_management() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/webhooks"))
        .json(&serde_json::json!({
            "url": "http://127.0.0.1:9/hook",
            "maxRetries": 1,
            "events": ["session"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: serde_json::Value = response.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let listed: Vec<serde_json::Value> = client
        .get(server.url("/api/webhooks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["max_retries"], 1);

    let response = client
        .post(server.url("/api/webhooks"))
        .json(&serde_json::json!({ "url": "ftp://example.com/hook" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let path = format!("/api/webhooks/{id}");
    let response = client.delete(server.url(&path)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = client.delete(server.url(&path)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn test_event_stream_filters_by_type() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut response = client
        .get(server.url("/api/events?types=monitor"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.log");
    std::fs::write(&path, "noise\n").unwrap();
    server
        .monitor
        .start(&path, StartOptions::from_beginning())
        .await
        .unwrap();

    let mut received = String::new();
    timeout(Duration::from_secs(5), async {
        while !received.contains("event: monitor:started") {
            let chunk = response.chunk().await.unwrap().expect("stream ended");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("timed out waiting for SSE event");

    assert!(!received.contains("event: line"));
    drop(response);
    server.shutdown().await;
}
