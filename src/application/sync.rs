//! Applies change notifications to the relational store.
//!
//! Multilingual content keeps exactly one canonical post per translation
//! group. Every write runs inside one transaction which locates the post by
//! group id, sibling ids, or the id of a variant it already owns; absorbs any
//! duplicates found along the way; rekeys the survivor to the authoritative
//! group id; and only then touches the language variant. A unique-constraint
//! race with a concurrent writer rolls the transaction back and is retried.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::repos::{
    CanonicalLookup, ContentRepo, ContentTx, LogFields, NewPostParams, PhotoFields, RepoError,
};
use crate::application::translation::{ResolutionResult, TranslationGroupInfo};
use crate::domain::document::{ContentDocument, LogDocument, PhotoDocument};
use crate::domain::entities::PostRecord;
use crate::domain::types::{ContentType, Persistence, WebhookOperation};

pub const MAX_SYNC_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("concurrent writes for `{document_id}` still conflicted after {attempts} attempts")]
    Contention { document_id: String, attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created { post_id: Uuid },
    Updated { post_id: Uuid },
    /// Replayed create for a variant that already exists.
    Unchanged { post_id: Uuid },
    Deleted { post_id: Uuid },
    /// Delete for a document that was never stored.
    Missing,
    /// Content type is not persisted.
    Skipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created { .. } => "created",
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Unchanged { .. } => "unchanged",
            SyncOutcome::Deleted { .. } => "deleted",
            SyncOutcome::Missing => "missing",
            SyncOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub operation: WebhookOperation,
    pub document: &'a ContentDocument,
    pub resolution: &'a ResolutionResult,
}

impl SyncRequest<'_> {
    fn group(&self) -> &TranslationGroupInfo {
        self.resolution.group()
    }
}

#[derive(Clone)]
pub struct ContentSyncService {
    repo: Arc<dyn ContentRepo>,
    default_language: String,
}

impl ContentSyncService {
    pub fn new(repo: Arc<dyn ContentRepo>, default_language: impl Into<String>) -> Self {
        Self {
            repo,
            default_language: default_language.into(),
        }
    }

    pub async fn dispatch(&self, request: SyncRequest<'_>) -> Result<SyncOutcome, SyncError> {
        let content_type = request.document.content_type();
        if content_type.persistence() == Persistence::CacheOnly {
            debug!(
                content_type = %content_type,
                document_id = request.document.id(),
                "content type is cache-only; skipping persistence"
            );
            return Ok(SyncOutcome::Skipped);
        }

        let mut attempt = 1;
        loop {
            match self.apply(request).await {
                Err(SyncError::Repo(RepoError::Duplicate { constraint })) => {
                    if attempt >= MAX_SYNC_ATTEMPTS {
                        return Err(SyncError::Contention {
                            document_id: request.document.id().to_string(),
                            attempts: attempt,
                        });
                    }
                    warn!(
                        target = "cms_sync::sync",
                        document_id = request.document.id(),
                        group_id = %request.group().group_id,
                        constraint = %constraint,
                        attempt,
                        "sync conflicted with a concurrent write; retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn apply(&self, request: SyncRequest<'_>) -> Result<SyncOutcome, SyncError> {
        let mut tx = self.repo.begin().await?;

        let outcome = match (request.operation, request.document) {
            (WebhookOperation::Delete, _) => delete(tx.as_mut(), request).await?,
            (_, ContentDocument::Log(log)) => self.upsert_log(tx.as_mut(), request, log).await?,
            (_, ContentDocument::Photo(photo)) => upsert_photo(tx.as_mut(), request, photo).await?,
            (_, other) => {
                debug!(content_type = %other.content_type(), "no persistence handler");
                SyncOutcome::Skipped
            }
        };

        tx.commit().await?;
        info!(
            target = "cms_sync::sync",
            operation = %request.operation,
            content_type = %request.document.content_type(),
            document_id = request.document.id(),
            group_id = %request.group().group_id,
            degraded = request.resolution.is_degraded(),
            outcome = outcome.as_str(),
            "content synchronized"
        );
        Ok(outcome)
    }

    async fn upsert_log(
        &self,
        tx: &mut dyn ContentTx,
        request: SyncRequest<'_>,
        document: &LogDocument,
    ) -> Result<SyncOutcome, SyncError> {
        let group = request.group();
        let language = document
            .language
            .clone()
            .or_else(|| group.language.clone())
            .unwrap_or_else(|| self.default_language.clone());
        let fields = LogFields {
            document_id: document.id.clone(),
            language,
            title: document.title.clone().unwrap_or_default(),
            slug: request.document.slug().map(str::to_string),
            excerpt: document.excerpt.clone(),
        };
        let author_id = request.document.author_reference();

        let Some(post) = locate(tx, request).await? else {
            let post = tx
                .insert_post(NewPostParams {
                    source_document_id: group.group_id.clone(),
                    content_type: ContentType::Log,
                    author_id: author_id.map(str::to_string),
                })
                .await?;
            tx.insert_log(post.id, &fields).await?;
            return Ok(SyncOutcome::Created { post_id: post.id });
        };

        let existing = tx.find_log(post.id, &fields.language).await?;
        if request.operation == WebhookOperation::Create && existing.is_some() && !post.is_deleted {
            return Ok(SyncOutcome::Unchanged { post_id: post.id });
        }

        match existing {
            Some(log) => {
                tx.update_log(log.id, &fields).await?;
            }
            None => {
                tx.insert_log(post.id, &fields).await?;
            }
        }
        if post.is_deleted {
            info!(
                target = "cms_sync::sync",
                post_id = %post.id,
                document_id = %fields.document_id,
                "reviving soft-deleted post"
            );
        }
        tx.touch_post(post.id, author_id).await?;
        Ok(SyncOutcome::Updated { post_id: post.id })
    }
}

async fn upsert_photo(
    tx: &mut dyn ContentTx,
    request: SyncRequest<'_>,
    document: &PhotoDocument,
) -> Result<SyncOutcome, SyncError> {
    let fields = PhotoFields {
        document_id: document.id.clone(),
        title: document.title.clone(),
        asset_ref: document
            .image
            .as_ref()
            .and_then(|image| image.asset.as_ref())
            .map(|asset| asset.id.clone()),
    };

    let Some(post) = locate(tx, request).await? else {
        let post = tx
            .insert_post(NewPostParams {
                source_document_id: document.id.clone(),
                content_type: ContentType::Photo,
                author_id: None,
            })
            .await?;
        tx.insert_photo(post.id, &fields).await?;
        return Ok(SyncOutcome::Created { post_id: post.id });
    };

    let existing = tx.find_photo(post.id).await?;
    if request.operation == WebhookOperation::Create && existing.is_some() && !post.is_deleted {
        return Ok(SyncOutcome::Unchanged { post_id: post.id });
    }

    match existing {
        Some(photo) => {
            tx.update_photo(photo.id, &fields).await?;
        }
        None => {
            tx.insert_photo(post.id, &fields).await?;
        }
    }
    tx.touch_post(post.id, None).await?;
    Ok(SyncOutcome::Updated { post_id: post.id })
}

async fn delete(
    tx: &mut dyn ContentTx,
    request: SyncRequest<'_>,
) -> Result<SyncOutcome, SyncError> {
    match locate(tx, request).await? {
        Some(post) if post.is_deleted => Ok(SyncOutcome::Unchanged { post_id: post.id }),
        Some(post) => {
            let post = tx
                .soft_delete_post(post.id, OffsetDateTime::now_utc())
                .await?;
            Ok(SyncOutcome::Deleted { post_id: post.id })
        }
        None => {
            debug!(
                document_id = request.document.id(),
                "delete for unknown document; nothing to do"
            );
            Ok(SyncOutcome::Missing)
        }
    }
}

/// Find the canonical post for the request, consolidating duplicates and
/// rekeying the survivor to the authoritative group id.
async fn locate(
    tx: &mut dyn ContentTx,
    request: SyncRequest<'_>,
) -> Result<Option<PostRecord>, SyncError> {
    let group = request.group();
    let source_ids = candidate_source_ids(group);
    let mut found = tx
        .find_canonical(CanonicalLookup {
            content_type: request.document.content_type(),
            source_ids: &source_ids,
            child_document_id: request.document.id(),
        })
        .await?;

    if found.is_empty() {
        return Ok(None);
    }

    let index = found
        .iter()
        .position(|post| post.source_document_id == group.group_id)
        .unwrap_or(0);
    let mut primary = found.remove(index);

    for duplicate in found {
        warn!(
            target = "cms_sync::sync",
            primary_id = %primary.id,
            duplicate_id = %duplicate.id,
            duplicate_source = %duplicate.source_document_id,
            group_id = %group.group_id,
            "absorbing duplicate canonical post"
        );
        tx.absorb_post(duplicate.id, primary.id).await?;
    }

    if primary.source_document_id != group.group_id && !request.resolution.is_degraded() {
        info!(
            target = "cms_sync::sync",
            post_id = %primary.id,
            from = %primary.source_document_id,
            to = %group.group_id,
            "rekeying canonical post to translation group"
        );
        primary = tx.rekey_post(primary.id, &group.group_id).await?;
    }

    Ok(Some(primary))
}

/// Group id first, then siblings, without repeats.
fn candidate_source_ids(group: &TranslationGroupInfo) -> Vec<String> {
    let mut ids = vec![group.group_id.clone()];
    for id in &group.sibling_ids {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}
