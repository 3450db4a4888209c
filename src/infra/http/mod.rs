//! HTTP surfaces: the public webhook listener and the internal admin listener.

mod admin;
mod error;
mod middleware;
pub mod signature;
mod webhook;

pub use error::ApiError;
pub use middleware::{RequestContext, log_responses, set_request_context};

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::audit::WebhookAuditService;
use crate::application::cache_admin::CacheAdminService;
use crate::application::content::ContentQueryService;
use crate::application::error::ErrorReport;
use crate::application::webhook::WebhookService;
use crate::infra::db::PostgresRepositories;

/// Liveness probe for the backing store.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

#[async_trait]
impl HealthProbe for PostgresRepositories {
    async fn check(&self) -> Result<(), String> {
        self.health_check().await.map_err(|err| err.to_string())
    }
}

#[derive(Clone)]
pub struct WebhookState {
    pub service: WebhookService,
    pub secret: Option<Arc<str>>,
    pub health: Arc<dyn HealthProbe>,
}

#[derive(Clone)]
pub struct AdminState {
    pub cache: CacheAdminService,
    pub content: ContentQueryService,
    pub audit: WebhookAuditService,
    pub health: Arc<dyn HealthProbe>,
}

async fn health_response(probe: &dyn HealthProbe) -> Response {
    match probe.check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(message) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_message(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                message,
            )
            .attach(&mut response);
            response
        }
    }
}

async fn webhook_health(State(state): State<WebhookState>) -> Response {
    health_response(state.health.as_ref()).await
}

async fn admin_health(State(state): State<AdminState>) -> Response {
    health_response(state.health.as_ref()).await
}

pub fn build_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(webhook::receive_webhook))
        .route("/health", get(webhook_health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/clear", post(admin::clear_cache))
        .route("/cache/invalidate-path", post(admin::invalidate_path))
        .route("/cache/invalidate", post(admin::invalidate_document))
        .route("/webhook-calls", get(admin::recent_calls))
        .route("/posts", get(admin::list_posts))
        .route("/posts/{source_document_id}", get(admin::post_detail))
        .route("/health", get(admin_health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
