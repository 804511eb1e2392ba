//! HTTP control surface and Server-Sent-Events stream.

mod api;
mod app;
mod error;
mod handlers;

pub use api::{CommandResponse, EventsQuery, WebhookCreated};
pub use app::MonitorServer;
pub use error::ServerError;
pub use handlers::AppState;
