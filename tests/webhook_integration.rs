//! Webhook delivery over real HTTP.

use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use combat_monitor::config::{DeliveryConfig, FileWatcherConfig, LoopConfig, MonitorConfig};
use combat_monitor::monitor::{RealTimeMonitor, StartOptions};
use combat_monitor::webhook::{
    PayloadMetadata, WebhookConfig, WebhookNotifier, WebhookOutcome, WebhookPayload,
};

#[derive(Debug)]
struct Received {
    headers: HeaderMap,
    body: serde_json::Value,
}

/// Receiver that records every request and answers with `status`.
async fn spawn_receiver(status: StatusCode) -> (String, mpsc::UnboundedReceiver<Received>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/hook",
            post(
                move |State(tx): State<mpsc::UnboundedSender<Received>>,
                      headers: HeaderMap,
                      body: String| async move {
                    let body = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
                    let _ = tx.send(Received { headers, body });
                    status
                },
            ),
        )
        .with_state(tx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{address}/hook"), rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for webhook request")
        .expect("receiver closed")
}

fn payload(event_type: &str) -> WebhookPayload {
    WebhookPayload::new(
        event_type,
        serde_json::json!({ "type": "death", "target": "goblin" }),
        PayloadMetadata {
            filename: "chat.log".to_string(),
            line_number: Some(7),
            session_id: None,
        },
    )
}

#[tokio::test]
async fn test_delivery_wire_format_and_headers() {
    let (url, mut rx) = spawn_receiver(StatusCode::OK).await;
    let notifier = WebhookNotifier::new(&DeliveryConfig::default());
    let mut outcomes = notifier.subscribe();
    notifier
        .add_webhook(WebhookConfig::new(url).with_header("X-Token", "secret"))
        .await
        .unwrap();

    assert_eq!(notifier.notify(payload("event:death")).await, 1);

    let request = recv(&mut rx).await;
    assert_eq!(request.headers["content-type"], "application/json");
    assert_eq!(request.headers["x-token"], "secret");
    assert!(request.headers["user-agent"]
        .to_str()
        .unwrap()
        .starts_with("combat-monitor/"));

    assert_eq!(request.body["eventType"], "event:death");
    assert!(request.body["timestamp"].is_string());
    assert_eq!(request.body["data"]["target"], "goblin");
    assert_eq!(request.body["metadata"]["filename"], "chat.log");
    assert_eq!(request.body["metadata"]["lineNumber"], 7);
    assert!(request.body["metadata"].get("sessionId").is_none());

    let outcome = timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Delivered { attempts: 1, .. }));
    assert_eq!(notifier.delivered(), 1);
}

#[tokio::test]
async fn test_failing_endpoint_lands_in_dead_letters() {
    let (url, mut rx) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let notifier = WebhookNotifier::new(&DeliveryConfig::default());
    let mut outcomes = notifier.subscribe();
    let mut webhook = WebhookConfig::new(url);
    webhook.max_retries = 2;
    webhook.retry_delay_ms = 10;
    notifier.add_webhook(webhook).await.unwrap();

    notifier.notify(payload("event:death")).await;

    // Every attempt carries the same body.
    let first = recv(&mut rx).await.body;
    for _ in 0..2 {
        assert_eq!(recv(&mut rx).await.body, first);
    }

    let outcome = timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .unwrap()
        .unwrap();
    let WebhookOutcome::Failed { attempts, error, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(attempts, 3);
    assert!(error.contains("500"), "unexpected error: {error}");

    let dead = notifier.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].payload.event_type, "event:death");
    assert_eq!(notifier.failed(), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_without_blocking_notify() {
    // Nothing listens on the discard port.
    let notifier = WebhookNotifier::new(&DeliveryConfig::default());
    let mut webhook = WebhookConfig::new("http://127.0.0.1:9/hook");
    webhook.max_retries = 0;
    notifier.add_webhook(webhook).await.unwrap();

    let before = std::time::Instant::now();
    assert_eq!(notifier.notify(payload("event:death")).await, 1);
    assert!(before.elapsed() < Duration::from_secs(1));

    notifier.shutdown(Duration::from_secs(5)).await;
    assert_eq!(notifier.failed(), 1);
    assert_eq!(notifier.dead_letters().await.len(), 1);
}

#[tokio::test]
async fn test_monitor_relays_filtered_combat_events() {
    let (url, mut rx) = spawn_receiver(StatusCode::OK).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.log");
    std::fs::write(&path, "").unwrap();

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
        webhooks: vec![WebhookConfig::new(url).with_events(["event:death"])],
        ..MonitorConfig::default()
    };
    let monitor = RealTimeMonitor::from_config(config).await.unwrap();
    monitor.start(&path, StartOptions::default()).await.unwrap();

    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    std::io::Write::write_all(
        &mut file,
        b"[10:00:01] You hit the goblin for 25 points of slash damage!\n\
          [10:00:02] The goblin dies!\n",
    )
    .unwrap();

    let request = recv(&mut rx).await;
    assert_eq!(request.body["eventType"], "event:death");
    assert_eq!(request.body["data"]["target"], "goblin");
    assert_eq!(request.body["metadata"]["lineNumber"], 2);
    assert_eq!(
        request.body["metadata"]["filename"],
        path.display().to_string()
    );

    // The damage line was filtered out.
    monitor.stop().await;
    monitor.webhooks().shutdown(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(monitor.status().await.stats.webhooks_delivered, 1);
}
