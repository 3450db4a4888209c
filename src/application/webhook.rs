//! Orchestrates one inbound change notification: resolve, sync, audit, invalidate.

use std::num::NonZeroU32;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::application::audit::WebhookAuditService;
use crate::application::error::AppError;
use crate::application::sync::{ContentSyncService, SyncOutcome, SyncRequest};
use crate::application::translation::{
    ResolutionResult, TranslationGroupInfo, TranslationGroupResolver,
};
use crate::cache::{InvalidationScheduler, InvalidationTask, RelatedData};
use crate::domain::document::{ContentDocument, published_id};
use crate::domain::error::DomainError;
use crate::domain::types::{CallOperation, WebhookOperation};

const METRIC_WEBHOOK_TOTAL: &str = "cms_sync_webhook_total";

/// Count a webhook delivery under `outcome`.
pub fn record_outcome(outcome: &'static str) {
    counter!(METRIC_WEBHOOK_TOTAL, "outcome" => outcome).increment(1);
}

/// Raw notification body as delivered by the CMS.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub operation: WebhookOperation,
    #[serde(default)]
    pub before_state: Option<Value>,
    #[serde(default)]
    pub after_state: Option<Value>,
}

/// A notification after ingress validation.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedNotification {
    Supported {
        operation: WebhookOperation,
        before: Option<ContentDocument>,
        after: Option<ContentDocument>,
    },
    /// `_type` is not one this service handles.
    Unsupported {
        operation: WebhookOperation,
        type_name: String,
        document_id: String,
    },
}

impl DecodedNotification {
    pub fn operation(&self) -> WebhookOperation {
        match self {
            DecodedNotification::Supported { operation, .. }
            | DecodedNotification::Unsupported { operation, .. } => *operation,
        }
    }
}

impl ChangeNotification {
    /// Validate the envelope and decode both snapshots.
    ///
    /// The document identity comes from the after-state, falling back to the
    /// before-state.
    pub fn decode(self) -> Result<DecodedNotification, DomainError> {
        let before = self.before_state.filter(|value| !value.is_null());
        let after = self.after_state.filter(|value| !value.is_null());

        let reference = after.as_ref().or(before.as_ref()).ok_or_else(|| {
            DomainError::validation("notification carries neither beforeState nor afterState")
        })?;
        let document_id = reference
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::validation("document is missing `_id`"))?;
        let type_name = reference
            .get("_type")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::validation("document is missing `_type`"))?;

        let Some(primary) = ContentDocument::decode(reference)? else {
            return Ok(DecodedNotification::Unsupported {
                operation: self.operation,
                type_name: type_name.to_string(),
                document_id: published_id(document_id).to_string(),
            });
        };

        let decode_other = |value: Option<&Value>| -> Result<Option<ContentDocument>, DomainError> {
            match value {
                Some(value) => Ok(ContentDocument::decode(value)?
                    .filter(|doc| doc.content_type() == primary.content_type())),
                None => Ok(None),
            }
        };

        let (before, after) = if after.is_some() {
            (decode_other(before.as_ref())?, Some(primary))
        } else {
            (Some(primary), None)
        };

        Ok(DecodedNotification::Supported {
            operation: self.operation,
            before,
            after,
        })
    }
}

/// What the webhook endpoint reports back for a processed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    pub operation: WebhookOperation,
    pub document_type: String,
    pub document_id: String,
    #[serde(skip)]
    pub outcome: Option<SyncOutcome>,
    #[serde(skip)]
    pub degraded: bool,
}

#[derive(Clone)]
pub struct WebhookService {
    resolver: Option<TranslationGroupResolver>,
    sync: ContentSyncService,
    audit: WebhookAuditService,
    scheduler: InvalidationScheduler,
    max_requests_per_hour: NonZeroU32,
}

impl WebhookService {
    pub fn new(
        resolver: Option<TranslationGroupResolver>,
        sync: ContentSyncService,
        audit: WebhookAuditService,
        scheduler: InvalidationScheduler,
        max_requests_per_hour: NonZeroU32,
    ) -> Self {
        Self {
            resolver,
            sync,
            audit,
            scheduler,
            max_requests_per_hour,
        }
    }

    pub fn scheduler(&self) -> &InvalidationScheduler {
        &self.scheduler
    }

    /// Whether another delivery fits in the trailing-hour budget.
    pub async fn accepts_more(&self) -> bool {
        self.audit
            .within_limit(self.max_requests_per_hour.get())
            .await
    }

    /// Apply one decoded notification.
    ///
    /// The audit row is written before returning in every case; a sync
    /// failure is recorded with its error text and returned so the caller can
    /// answer 500 and let the CMS redeliver.
    pub async fn process(
        &self,
        notification: DecodedNotification,
    ) -> Result<WebhookReceipt, AppError> {
        let (operation, before, after) = match notification {
            DecodedNotification::Unsupported {
                operation,
                type_name,
                document_id,
            } => {
                info!(
                    target = "cms_sync::webhook",
                    operation = %operation,
                    document_type = %type_name,
                    document_id = %document_id,
                    "ignoring notification for unsupported type"
                );
                self.audit
                    .record_best_effort(operation.into(), &type_name, &document_id, None)
                    .await;
                record_outcome("unsupported");
                return Ok(WebhookReceipt {
                    operation,
                    document_type: type_name,
                    document_id,
                    outcome: None,
                    degraded: false,
                });
            }
            DecodedNotification::Supported {
                operation,
                before,
                after,
            } => (operation, before, after),
        };

        let Some(document) = after.as_ref().or(before.as_ref()) else {
            return Err(AppError::unexpected("decoded notification has no snapshot"));
        };
        let content_type = document.content_type();
        let document_id = document.id().to_string();
        let call_operation = CallOperation::from(operation);

        let resolution = self.resolve(document).await;
        let result = self
            .sync
            .dispatch(SyncRequest {
                operation,
                document,
                resolution: &resolution,
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = err.to_string();
                error!(
                    target = "cms_sync::webhook",
                    operation = %operation,
                    content_type = %content_type,
                    document_id = %document_id,
                    error = %message,
                    "content sync failed"
                );
                self.audit
                    .record_best_effort(
                        call_operation,
                        content_type.as_str(),
                        &document_id,
                        Some(&message),
                    )
                    .await;
                record_outcome("failed");
                return Err(err.into());
            }
        };

        self.audit
            .record_best_effort(call_operation, content_type.as_str(), &document_id, None)
            .await;

        let related = related_data(resolution.group(), &document_id);
        let degraded = resolution.is_degraded();
        if let Some(task) = InvalidationTask::new(operation, before, after) {
            self.scheduler.queue(task.with_related(related));
        }
        record_outcome("processed");

        Ok(WebhookReceipt {
            operation,
            document_type: content_type.as_str().to_string(),
            document_id,
            outcome: Some(outcome),
            degraded,
        })
    }

    async fn resolve(&self, document: &ContentDocument) -> ResolutionResult {
        let language = document.language().map(str::to_string);
        if !document.content_type().is_translated() {
            return ResolutionResult::Resolved(TranslationGroupInfo::standalone(
                document.id(),
                language,
            ));
        }
        match &self.resolver {
            Some(resolver) => resolver.resolve(document.id()).await,
            None => ResolutionResult::Degraded {
                group: TranslationGroupInfo::standalone(document.id(), language),
                reason: "cms gateway not configured".to_string(),
            },
        }
    }
}

fn related_data(group: &TranslationGroupInfo, document_id: &str) -> RelatedData {
    RelatedData {
        group_id: (group.group_id != document_id).then(|| group.group_id.clone()),
        sibling_ids: group
            .sibling_ids
            .iter()
            .filter(|id| id.as_str() != document_id)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn notification(body: Value) -> ChangeNotification {
        serde_json::from_value(body).expect("valid envelope")
    }

    #[test]
    fn identity_prefers_after_state() {
        let decoded = notification(json!({
            "operation": "update",
            "beforeState": {"_id": "drafts.doc-en", "_type": "log", "title": "Old"},
            "afterState": {"_id": "drafts.doc-en", "_type": "log", "title": "New"}
        }))
        .decode()
        .expect("decodes");

        let DecodedNotification::Supported { before, after, .. } = decoded else {
            panic!("expected a supported notification");
        };
        assert_eq!(after.as_ref().map(ContentDocument::id), Some("doc-en"));
        assert!(before.is_some());
    }

    #[test]
    fn delete_uses_before_state() {
        let decoded = notification(json!({
            "operation": "delete",
            "beforeState": {"_id": "photo-1", "_type": "photo"},
            "afterState": null
        }))
        .decode()
        .expect("decodes");

        assert_eq!(decoded.operation(), WebhookOperation::Delete);
        let DecodedNotification::Supported { before, after, .. } = decoded else {
            panic!("expected a supported notification");
        };
        assert!(after.is_none());
        assert_eq!(before.as_ref().map(ContentDocument::id), Some("photo-1"));
    }

    #[test]
    fn unknown_type_is_unsupported_not_invalid() {
        let decoded = notification(json!({
            "operation": "create",
            "afterState": {"_id": "drafts.x", "_type": "sanity.imageAsset"}
        }))
        .decode()
        .expect("decodes");

        assert_eq!(
            decoded,
            DecodedNotification::Unsupported {
                operation: WebhookOperation::Create,
                type_name: "sanity.imageAsset".to_string(),
                document_id: "x".to_string(),
            }
        );
    }

    #[test]
    fn empty_envelope_is_rejected() {
        let err = notification(json!({"operation": "create"}))
            .decode()
            .expect_err("no snapshots");
        assert!(matches!(err, DomainError::Validation { .. }));

        let err = notification(json!({"operation": "create", "afterState": {"_type": "log"}}))
            .decode()
            .expect_err("missing id");
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn related_data_excludes_the_document_itself() {
        let group = TranslationGroupInfo {
            group_id: "tm-1".to_string(),
            language: Some("en".to_string()),
            sibling_ids: vec!["doc-en".to_string(), "doc-zh".to_string()],
        };
        let related = related_data(&group, "doc-en");
        assert_eq!(related.group_id.as_deref(), Some("tm-1"));
        assert_eq!(related.sibling_ids.into_iter().collect::<Vec<_>>(), vec!["doc-zh"]);

        let standalone = TranslationGroupInfo::standalone("photo-1", None);
        let related = related_data(&standalone, "photo-1");
        assert!(related.group_id.is_none());
        assert!(related.sibling_ids.is_empty());
    }
}
