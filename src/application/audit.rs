use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::{RepoError, WebhookCallsRepo};
use crate::domain::entities::WebhookCallRecord;
use crate::domain::types::CallOperation;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Records every processed notification and answers rate-limit queries.
#[derive(Clone)]
pub struct WebhookAuditService {
    repo: Arc<dyn WebhookCallsRepo>,
}

impl WebhookAuditService {
    pub fn new(repo: Arc<dyn WebhookCallsRepo>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        operation: CallOperation,
        content_type: &str,
        document_id: &str,
        error: Option<&str>,
    ) -> Result<(), RepoError> {
        let record = WebhookCallRecord {
            id: Uuid::new_v4(),
            operation,
            content_type: content_type.to_string(),
            document_id: document_id.to_string(),
            success: error.is_none(),
            error: error.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        };

        self.repo.append_call(record).await
    }

    /// Like [`Self::record`], but a failed write is only logged.
    pub async fn record_best_effort(
        &self,
        operation: CallOperation,
        content_type: &str,
        document_id: &str,
        error: Option<&str>,
    ) {
        if let Err(err) = self
            .record(operation, content_type, document_id, error)
            .await
        {
            warn!(
                target = "cms_sync::audit",
                operation = operation.as_str(),
                content_type,
                document_id,
                error = %err,
                "failed to record webhook call"
            );
        }
    }

    /// Whether another webhook may be accepted under `max_per_hour`.
    ///
    /// Fails open: a count that cannot be read never blocks a delivery.
    pub async fn within_limit(&self, max_per_hour: u32) -> bool {
        let since = OffsetDateTime::now_utc() - RATE_LIMIT_WINDOW;
        match self.repo.count_calls_since(since).await {
            Ok(count) => count < u64::from(max_per_hour),
            Err(err) => {
                warn!(error = %err, "rate limit count unavailable; allowing request");
                true
            }
        }
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookCallRecord>, RepoError> {
        self.repo.list_recent(limit).await
    }
}
