use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{RepoError, WebhookCallsRepo},
    domain::entities::WebhookCallRecord,
    domain::types::CallOperation,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct WebhookCallRow {
    id: Uuid,
    operation: String,
    content_type: String,
    document_id: String,
    success: bool,
    error: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<WebhookCallRow> for WebhookCallRecord {
    type Error = RepoError;

    fn try_from(row: WebhookCallRow) -> Result<Self, Self::Error> {
        let operation =
            CallOperation::parse(&row.operation).ok_or_else(|| RepoError::Integrity {
                message: format!("unknown webhook operation `{}`", row.operation),
            })?;
        Ok(Self {
            id: row.id,
            operation,
            content_type: row.content_type,
            document_id: row.document_id,
            success: row.success,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl WebhookCallsRepo for PostgresRepositories {
    async fn append_call(&self, record: WebhookCallRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO webhook_calls \
                (id, operation, content_type, document_id, success, error, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(record.operation.as_str())
        .bind(&record.content_type)
        .bind(&record.document_id)
        .bind(record.success)
        .bind(record.error.as_deref())
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn count_calls_since(&self, since: OffsetDateTime) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_calls WHERE created_at >= $1 AND operation <> $2",
        )
        .bind(since)
        .bind(CallOperation::Manual.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookCallRecord>, RepoError> {
        let limit = limit.clamp(1, 200);
        let rows = sqlx::query_as::<_, WebhookCallRow>(
            "SELECT id, operation, content_type, document_id, success, error, created_at \
             FROM webhook_calls ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(WebhookCallRecord::try_from).collect()
    }
}
