use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{AppError, ErrorReport};

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// JSON error response for the webhook and admin surfaces.
///
/// The public body carries a fixed message; the detail only reaches the
/// response log through the attached [`ErrorReport`].
#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    status: StatusCode,
    message: &'static str,
    hint: Option<String>,
    detail: String,
}

impl ApiError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            message,
            hint: None,
            detail: detail.into(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn unauthorized(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(source, StatusCode::UNAUTHORIZED, "Invalid signature", detail)
    }

    pub fn bad_request(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(source, StatusCode::BAD_REQUEST, "Invalid payload", detail)
    }

    pub fn misconfigured(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webhook secret not configured",
            detail,
        )
    }

    pub fn processing(source: &'static str, err: &AppError) -> Self {
        let status = err.status_code();
        let message = if status.is_client_error() {
            "Invalid payload"
        } else {
            "Internal processing error"
        };
        Self::new(source, status, message, err.to_string())
    }

    pub fn rate_limited(source: &'static str, retry_after_secs: u64) -> Response {
        let body = ApiErrorBody {
            error: "Rate limit exceeded",
            hint: Some(format!("Retry after {retry_after_secs} seconds")),
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            source,
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after_secs}"),
        )
        .attach(&mut response);
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            hint: self.hint,
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(self.source, self.status, self.detail).attach(&mut response);
        response
    }
}
