//! Operator-triggered cache operations.

use serde::Serialize;
use tracing::info;

use crate::application::audit::WebhookAuditService;
use crate::application::error::AppError;
use crate::cache::{
    AffectedResources, CdnMatch, InvalidationScheduler, InvalidationTask, PurgeReport,
};
use crate::domain::types::{CallOperation, ContentType};

const ALL_TARGET: &str = "*";

/// Result of a manual cache operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPurge {
    pub scope: String,
    pub target: String,
    pub report: PurgeReport,
}

#[derive(Clone)]
pub struct CacheAdminService {
    scheduler: InvalidationScheduler,
    audit: WebhookAuditService,
}

impl CacheAdminService {
    pub fn new(scheduler: InvalidationScheduler, audit: WebhookAuditService) -> Self {
        Self { scheduler, audit }
    }

    pub async fn clear_all(&self) -> ManualPurge {
        let report = self.scheduler.purger().clear_all().await;
        self.finish("all", ALL_TARGET, report).await
    }

    /// Every rendered page: language home pages, the sitemap and each section,
    /// matched by prefix at the edge.
    pub async fn clear_pages(&self) -> ManualPurge {
        let mapper = self.scheduler.mapper();
        let mut resources = mapper.site_roots();
        for content_type in ContentType::ALL {
            resources.extend(mapper.section(content_type));
        }
        let report = self
            .scheduler
            .purger()
            .clear_resources(&resources, CdnMatch::Prefix)
            .await;
        self.finish("pages", ALL_TARGET, report).await
    }

    pub async fn clear_images(&self) -> ManualPurge {
        let report = self.scheduler.purger().clear_images().await;
        self.finish("images", ALL_TARGET, report).await
    }

    pub async fn clear_by_type(&self, content_type: ContentType) -> ManualPurge {
        let resources = self.scheduler.mapper().section(content_type);
        let report = self
            .scheduler
            .purger()
            .clear_resources(&resources, CdnMatch::Prefix)
            .await;
        self.finish("type", content_type.as_str(), report).await
    }

    pub async fn invalidate_path(&self, path: &str) -> Result<ManualPurge, AppError> {
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(AppError::validation("path must start with `/`"));
        }

        let mut resources = AffectedResources::default();
        resources.paths.insert(path.to_string());
        let report = self
            .scheduler
            .purger()
            .clear_resources(&resources, CdnMatch::Exact)
            .await;
        Ok(self.finish("path", path, report).await)
    }

    /// Resolve and purge one document now, bypassing the batch window.
    pub async fn invalidate_document(
        &self,
        content_type: ContentType,
        document_id: &str,
    ) -> Result<ManualPurge, AppError> {
        let document_id = document_id.trim();
        if document_id.is_empty() {
            return Err(AppError::validation("documentId must not be empty"));
        }

        let task = InvalidationTask::for_document(content_type, document_id);
        let report = self.scheduler.invalidate_immediately(&task).await;
        Ok(self
            .finish(content_type.as_str(), document_id, report)
            .await)
    }

    async fn finish(&self, scope: &str, target: &str, report: PurgeReport) -> ManualPurge {
        let failure = report.failure_summary();
        info!(
            target = "cms_sync::admin",
            scope,
            cache_target = target,
            failed = failure.is_some(),
            "manual cache operation finished"
        );
        self.audit
            .record_best_effort(CallOperation::Manual, scope, target, failure.as_deref())
            .await;
        ManualPurge {
            scope: scope.to_string(),
            target: target.to_string(),
            report,
        }
    }
}
