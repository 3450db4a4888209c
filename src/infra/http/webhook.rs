use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::debug;

use crate::application::audit::RATE_LIMIT_WINDOW;
use crate::application::webhook::{ChangeNotification, WebhookReceipt, record_outcome};

use super::WebhookState;
use super::error::ApiError;
use super::signature::{self, SIGNATURE_HEADER};

const SOURCE: &str = "infra::http::webhook";

#[derive(Debug, Serialize)]
struct WebhookAccepted {
    success: bool,
    #[serde(flatten)]
    receipt: WebhookReceipt,
}

/// `POST /webhook`: verify, rate-limit, decode, then process one notification.
pub(super) async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.secret.as_deref() else {
        record_outcome("misconfigured");
        return ApiError::misconfigured(SOURCE, "webhook.secret is not set").into_response();
    };

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(err) = signature::verify(secret, &body, provided) {
        record_outcome("unauthorized");
        return ApiError::unauthorized(SOURCE, err.to_string()).into_response();
    }

    if !state.service.accepts_more().await {
        record_outcome("rate_limited");
        return ApiError::rate_limited(SOURCE, RATE_LIMIT_WINDOW.as_secs());
    }

    let notification = match serde_json::from_slice::<ChangeNotification>(&body) {
        Ok(notification) => notification,
        Err(err) => {
            record_outcome("invalid");
            return ApiError::bad_request(SOURCE, err.to_string()).into_response();
        }
    };
    let decoded = match notification.decode() {
        Ok(decoded) => decoded,
        Err(err) => {
            record_outcome("invalid");
            return ApiError::bad_request(SOURCE, err.to_string()).into_response();
        }
    };

    debug!(
        target = "cms_sync::webhook",
        operation = %decoded.operation(),
        bytes = body.len(),
        "webhook accepted"
    );

    match state.service.process(decoded).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(WebhookAccepted {
                success: true,
                receipt,
            }),
        )
            .into_response(),
        Err(err) => ApiError::processing(SOURCE, &err).into_response(),
    }
}
