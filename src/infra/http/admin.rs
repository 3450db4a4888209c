use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::domain::types::ContentType;

use super::AdminState;
use super::error::ApiError;

const SOURCE: &str = "infra::http::admin";
const DEFAULT_CALLS_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum ClearScope {
    All,
    Pages,
    Images,
    Type,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ClearRequest {
    scope: ClearScope,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct InvalidatePathRequest {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InvalidateDocumentRequest {
    content_type: String,
    document_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CallsQuery {
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PostsQuery {
    content_type: Option<String>,
}

fn parse_content_type(value: Option<&str>) -> Result<ContentType, ApiError> {
    let value = value.ok_or_else(|| {
        ApiError::bad_request(SOURCE, "contentType is required for this scope")
    })?;
    ContentType::parse(value).ok_or_else(|| {
        ApiError::bad_request(SOURCE, format!("unknown content type `{value}`"))
            .with_hint("expected one of collection, photo, log, devCollection, author")
    })
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(SOURCE, rejection.body_text()))
}

/// `POST /cache/clear`
pub(super) async fn clear_cache(
    State(state): State<AdminState>,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let purge = match request.scope {
        ClearScope::All => state.cache.clear_all().await,
        ClearScope::Pages => state.cache.clear_pages().await,
        ClearScope::Images => state.cache.clear_images().await,
        ClearScope::Type => {
            let content_type = parse_content_type(request.content_type.as_deref())?;
            state.cache.clear_by_type(content_type).await
        }
    };
    Ok((StatusCode::OK, Json(purge)).into_response())
}

/// `POST /cache/invalidate-path`
pub(super) async fn invalidate_path(
    State(state): State<AdminState>,
    payload: Result<Json<InvalidatePathRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let purge = state
        .cache
        .invalidate_path(&request.path)
        .await
        .map_err(|err| ApiError::processing(SOURCE, &err))?;
    Ok((StatusCode::OK, Json(purge)).into_response())
}

/// `POST /cache/invalidate`
pub(super) async fn invalidate_document(
    State(state): State<AdminState>,
    payload: Result<Json<InvalidateDocumentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let content_type = parse_content_type(Some(&request.content_type))?;
    let purge = state
        .cache
        .invalidate_document(content_type, &request.document_id)
        .await
        .map_err(|err| ApiError::processing(SOURCE, &err))?;
    Ok((StatusCode::OK, Json(purge)).into_response())
}

/// `GET /webhook-calls`
pub(super) async fn recent_calls(
    State(state): State<AdminState>,
    Query(query): Query<CallsQuery>,
) -> Result<Response, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_CALLS_LIMIT);
    let calls = state.audit.list_recent(limit).await.map_err(|err| {
        ApiError::new(
            SOURCE,
            StatusCode::SERVICE_UNAVAILABLE,
            "Audit log unavailable",
            err.to_string(),
        )
    })?;
    Ok((StatusCode::OK, Json(calls)).into_response())
}

/// `GET /posts?contentType=log`
pub(super) async fn list_posts(
    State(state): State<AdminState>,
    Query(query): Query<PostsQuery>,
) -> Result<Response, ApiError> {
    let content_type = parse_content_type(query.content_type.as_deref())?;
    let posts = state
        .content
        .list_posts(content_type)
        .await
        .map_err(|err| ApiError::processing(SOURCE, &err))?;
    Ok((StatusCode::OK, Json(posts)).into_response())
}

/// `GET /posts/{source_document_id}`
pub(super) async fn post_detail(
    State(state): State<AdminState>,
    Path(source_document_id): Path<String>,
) -> Result<Response, ApiError> {
    let detail = state
        .content
        .post_detail(&source_document_id)
        .await
        .map_err(|err| ApiError::processing(SOURCE, &err))?;
    match detail {
        Some(detail) => Ok((StatusCode::OK, Json(detail)).into_response()),
        None => Err(ApiError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Post not found",
            format!("no post keyed by `{source_document_id}`"),
        )),
    }
}
