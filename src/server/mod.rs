//! HTTP surface of the ingest node.

pub mod handlers;
pub mod ws;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::error::{ApiError, ErrorBody};
use crate::events::EventLogService;
use crate::ingest::IngestPipeline;
use crate::lifecycle::LifecycleCoordinator;
use crate::notify::NotificationHub;
use crate::queue::JobQueue;
use crate::storage::{BlobStore, MetadataStore};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub blob: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub hub: Arc<NotificationHub>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub ingest: Arc<IngestPipeline>,
    pub events: Arc<EventLogService>,
    pub config: Arc<Config>,
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let max_body = state.config.http.max_body_bytes as usize;

    Router::new()
        .route("/api/photos", post(handlers::upload_photos))
        .route("/api/photos", get(handlers::list_photos))
        .route("/api/photos/poll", get(handlers::poll_status))
        .route("/api/photos/{id}", get(handlers::get_photo))
        .route("/api/photos/{id}", delete(handlers::delete_photo))
        .route("/api/photos/{id}/permanent", delete(handlers::delete_photo_permanently))
        .route("/api/photos/{id}/status", patch(handlers::update_status))
        .route("/api/photos/{id}/events", get(handlers::photo_events))
        .route("/api/events", get(handlers::list_events))
        .route("/api/ws", get(ws::subscribe))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn(stamp_error_path))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.http.bind_addr.clone();
    let app = build_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

impl IntoResponse for ApiError {
    /// Error responses carry the body in an extension; the path-stamping
    /// middleware turns it into the final envelope.
    fn into_response(self) -> Response {
        let status = self.code.status();
        let mut response = status.into_response();
        response.extensions_mut().insert(ErrorBody::new(&self, ""));
        response
    }
}

/// Fill in the request path on error envelopes. Errors produced outside
/// our handlers (body-limit rejections and such) pass through untouched.
async fn stamp_error_path(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    if let Some(mut body) = response.extensions_mut().remove::<ErrorBody>() {
        body.path = path;
        let status = response.status();
        return (status, Json(body)).into_response();
    }
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let error = ApiError::validation("request body exceeds the upload limit");
        return (StatusCode::BAD_REQUEST, Json(ErrorBody::new(&error, path))).into_response();
    }
    response
}
