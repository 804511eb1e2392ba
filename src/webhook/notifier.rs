//! Concurrent webhook delivery with retry and dead-lettering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::transport::{ReqwestTransport, WebhookTransport};
use super::types::{DeadLetterEntry, WebhookConfig, WebhookOutcome, WebhookPayload};
use super::WebhookError;
use crate::config::DeliveryConfig;

const OUTCOME_CHANNEL_CAPACITY: usize = 256;

struct Registration {
    config: Arc<WebhookConfig>,
    /// Cancels pending retries when the webhook is removed or replaced.
    cancel: CancellationToken,
}

struct Inner {
    transport: Arc<dyn WebhookTransport>,
    registry: RwLock<Vec<Registration>>,
    dead_letters: Mutex<VecDeque<DeadLetterEntry>>,
    max_dead_letters: usize,
    permits: Semaphore,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    outcomes: broadcast::Sender<WebhookOutcome>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Fire-and-forget webhook fan-out.
///
/// Cloning yields another handle to the same registry and delivery pool.
#[derive(Clone)]
pub struct WebhookNotifier {
    inner: Arc<Inner>,
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new(&DeliveryConfig::default())
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("delivered", &self.delivered())
            .field("failed", &self.failed())
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    /// Notifier posting over HTTP.
    #[must_use]
    pub fn new(config: &DeliveryConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Notifier using a custom transport.
    #[must_use]
    pub fn with_transport(config: &DeliveryConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry: RwLock::new(Vec::new()),
                dead_letters: Mutex::new(VecDeque::new()),
                max_dead_letters: config.max_dead_letters,
                permits: Semaphore::new(config.max_concurrent_deliveries.max(1)),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                outcomes,
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Register a webhook, replacing any existing one with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL.
    pub async fn add_webhook(&self, config: WebhookConfig) -> Result<String, WebhookError> {
        validate_url(&config.url)?;

        let id = config.id.clone();
        let registration = Registration {
            config: Arc::new(config),
            cancel: self.inner.shutdown.child_token(),
        };

        let mut registry = self.inner.registry.write().await;
        if let Some(existing) = registry.iter_mut().find(|r| r.config.id == id) {
            existing.cancel.cancel();
            *existing = registration;
            tracing::info!(webhook_id = %id, "Webhook replaced");
        } else {
            tracing::info!(webhook_id = %id, url = %registration.config.url, "Webhook registered");
            registry.push(registration);
        }
        Ok(id)
    }

    /// Unregister a webhook and cancel its pending retries.
    ///
    /// Returns `false` if no webhook had this id.
    pub async fn remove_webhook(&self, id: &str) -> bool {
        let mut registry = self.inner.registry.write().await;
        let Some(index) = registry.iter().position(|r| r.config.id == id) else {
            return false;
        };
        let removed = registry.remove(index);
        removed.cancel.cancel();
        tracing::info!(webhook_id = %id, "Webhook removed");
        true
    }

    /// Snapshot of the registry.
    pub async fn webhooks(&self) -> Vec<WebhookConfig> {
        self.inner
            .registry
            .read()
            .await
            .iter()
            .map(|r| (*r.config).clone())
            .collect()
    }

    /// Schedule delivery of `payload` to every matching webhook.
    ///
    /// Returns immediately with the number of deliveries scheduled.
    pub async fn notify(&self, payload: WebhookPayload) -> usize {
        let targets: Vec<(Arc<WebhookConfig>, CancellationToken)> = self
            .inner
            .registry
            .read()
            .await
            .iter()
            .filter(|r| r.config.subscribes_to(&payload.event_type))
            .map(|r| (Arc::clone(&r.config), r.cancel.clone()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let body = match serde_json::to_vec(&payload) {
            Ok(body) => Arc::new(body),
            Err(e) => {
                tracing::warn!(event_type = %payload.event_type, error = %e, "Failed to serialize webhook payload");
                return 0;
            }
        };
        let payload = Arc::new(payload);

        let scheduled = targets.len();
        for (webhook, cancel) in targets {
            let inner = Arc::clone(&self.inner);
            let payload = Arc::clone(&payload);
            let body = Arc::clone(&body);
            self.inner
                .tracker
                .spawn(deliver(inner, webhook, cancel, payload, body));
        }
        scheduled
    }

    /// Permanent failures, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Subscribe to per-delivery outcomes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WebhookOutcome> {
        self.inner.outcomes.subscribe()
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Deliveries still running or waiting to retry.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Wait up to `grace` for in-flight deliveries, then cancel the rest.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.tracker.close();
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = self.inner.tracker.len(),
                "Cancelling undelivered webhooks"
            );
            self.inner.shutdown.cancel();
            self.inner.tracker.wait().await;
        }
        self.inner.tracker.reopen();
    }
}

fn validate_url(raw: &str) -> Result<(), WebhookError> {
    let url = url::Url::parse(raw).map_err(|e| WebhookError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(WebhookError::UnsupportedScheme(other.to_string())),
    }
}

/// Run every attempt for one webhook, sequentially.
async fn deliver(
    inner: Arc<Inner>,
    webhook: Arc<WebhookConfig>,
    cancel: CancellationToken,
    payload: Arc<WebhookPayload>,
    body: Arc<Vec<u8>>,
) {
    let total = webhook.total_attempts();
    let mut last_error = String::new();

    for attempt in 1..=total {
        if attempt > 1 {
            let delay = webhook.retry_delay(attempt - 1);
            tracing::warn!(
                webhook_id = %webhook.id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %last_error,
                "Retrying webhook delivery"
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(webhook_id = %webhook.id, "Webhook delivery cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let result = {
            let Ok(_permit) = inner.permits.acquire().await else {
                return;
            };
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(webhook_id = %webhook.id, "Webhook delivery cancelled");
                    return;
                }
                result = inner.transport.post(&webhook, &body) => result,
            }
        };

        match result {
            Ok(()) => {
                inner.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(webhook_id = %webhook.id, attempt, event_type = %payload.event_type, "Webhook delivered");
                let _ = inner.outcomes.send(WebhookOutcome::Delivered {
                    webhook_id: webhook.id.clone(),
                    event_type: payload.event_type.clone(),
                    attempts: attempt,
                });
                return;
            }
            Err(e) => last_error = e.to_string(),
        }
    }

    inner.failed.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(
        webhook_id = %webhook.id,
        attempts = total,
        event_type = %payload.event_type,
        error = %last_error,
        "Webhook delivery exhausted retries"
    );

    {
        let mut dead_letters = inner.dead_letters.lock().await;
        while inner.max_dead_letters > 0 && dead_letters.len() >= inner.max_dead_letters {
            dead_letters.pop_front();
        }
        if inner.max_dead_letters > 0 {
            dead_letters.push_back(DeadLetterEntry {
                webhook: (*webhook).clone(),
                payload: (*payload).clone(),
                error: last_error.clone(),
                failed_at: Utc::now(),
                attempts: total,
            });
        }
    }

    let _ = inner.outcomes.send(WebhookOutcome::Failed {
        webhook_id: webhook.id.clone(),
        event_type: payload.event_type.clone(),
        attempts: total,
        error: last_error,
    });
}
