//! HTTP handlers for the monitor API.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::api::{CommandResponse, EventsQuery, WebhookCreated};
use super::ServerError;
use crate::monitor::{MonitorStatus, RealTimeMonitor};
use crate::watcher::TailPosition;
use crate::webhook::{DeadLetterEntry, WebhookConfig};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: RealTimeMonitor,
}

impl AppState {
    #[must_use]
    pub fn new(monitor: RealTimeMonitor) -> Self {
        Self { monitor }
    }
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.monitor.status().await)
}

/// GET /api/position
pub async fn get_position(State(state): State<AppState>) -> Json<TailPosition> {
    Json(state.monitor.get_position().await)
}

/// GET /api/events - SSE stream of monitor notifications, filtered by `types`.
pub async fn get_events_sse(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let filters = query.filters();
    let rx = state.monitor.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let selected = match result {
            Ok(event) if event.matches_any(&filters) => Some(event),
            // Lagged subscribers skip what they missed.
            _ => None,
        };
        async move {
            let event = selected?;
            let data = serde_json::to_string(&event).ok()?;
            Some(Ok(Event::default().event(event.event_type()).data(data)))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/pause
pub async fn post_pause(
    State(state): State<AppState>,
) -> Result<Json<CommandResponse>, ServerError> {
    let position = state.monitor.pause().await?;
    Ok(Json(CommandResponse::success("Monitor paused", position)))
}

/// POST /api/resume
pub async fn post_resume(
    State(state): State<AppState>,
) -> Result<Json<CommandResponse>, ServerError> {
    let position = state.monitor.resume().await?;
    Ok(Json(CommandResponse::success("Monitor resumed", position)))
}

/// POST /api/stop
pub async fn post_stop(State(state): State<AppState>) -> Json<CommandResponse> {
    let position = state.monitor.stop().await;
    Json(CommandResponse::success("Monitor stopped", position))
}

/// GET /api/webhooks
pub async fn get_webhooks(State(state): State<AppState>) -> Json<Vec<WebhookConfig>> {
    Json(state.monitor.webhooks().webhooks().await)
}

/// POST /api/webhooks
pub async fn post_webhook(
    State(state): State<AppState>,
    Json(webhook): Json<WebhookConfig>,
) -> Result<(StatusCode, Json<WebhookCreated>), ServerError> {
    let id = state.monitor.webhooks().add_webhook(webhook).await?;
    Ok((StatusCode::CREATED, Json(WebhookCreated { id })))
}

/// DELETE /api/webhooks/:id
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    if state.monitor.webhooks().remove_webhook(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::WebhookNotFound(id))
    }
}

/// GET /api/dead-letters
pub async fn get_dead_letters(State(state): State<AppState>) -> Json<Vec<DeadLetterEntry>> {
    Json(state.monitor.webhooks().dead_letters().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::{MonitorError, MonitorState};

    fn state() -> AppState {
        AppState::new(RealTimeMonitor::new(MonitorConfig::default()))
    }

    #[tokio::test]
    async fn test_get_status_when_stopped() {
        let Json(status) = get_status(State(state())).await;
        assert_eq!(status.state, MonitorState::Stopped);
        assert!(status.filename.is_none());
        assert_eq!(status.stats.lines_processed, 0);
    }

    #[tokio::test]
    async fn test_pause_when_stopped_is_conflict() {
        let err = post_pause(State(state())).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Monitor(MonitorError::InvalidState {
                operation: "pause",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_succeeds() {
        let Json(response) = post_stop(State(state())).await;
        assert!(response.success);
        assert_eq!(response.position, Some(TailPosition::default()));
    }

    #[tokio::test]
    async fn test_webhook_crud() {
        let state = state();
        let (status, Json(created)) = post_webhook(
            State(state.clone()),
            Json(WebhookConfig::new("http://127.0.0.1:9/hook")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(webhooks) = get_webhooks(State(state.clone())).await;
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].id, created.id);

        let status = delete_webhook(State(state.clone()), Path(created.id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(matches!(
            delete_webhook(State(state.clone()), Path(created.id)).await,
            Err(ServerError::WebhookNotFound(_))
        ));

        let Json(dead) = get_dead_letters(State(state)).await;
        assert!(dead.is_empty());
    }

    #[tokio::test]
    async fn test_post_invalid_webhook_is_rejected() {
        let result = post_webhook(State(state()), Json(WebhookConfig::new("nope"))).await;
        assert!(matches!(result, Err(ServerError::Webhook(_))));
    }
}
