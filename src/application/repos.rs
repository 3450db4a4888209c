//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{LogRecord, PhotoRecord, PostRecord, SocialCounts, WebhookCallRecord};
use crate::domain::types::ContentType;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewPostParams {
    pub source_document_id: String,
    pub content_type: ContentType,
    pub author_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogFields {
    pub document_id: String,
    pub language: String,
    pub title: String,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PhotoFields {
    pub document_id: String,
    pub title: Option<String>,
    pub asset_ref: Option<String>,
}

/// Lookup keys for canonical posts inside a consolidation transaction.
#[derive(Debug, Clone)]
pub struct CanonicalLookup<'a> {
    pub content_type: ContentType,
    /// Candidate `source_document_id`s (group id and sibling ids).
    pub source_ids: &'a [String],
    /// Also match posts that own a child row synced from this document.
    pub child_document_id: &'a str,
}

#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Open a transaction for one consolidation attempt.
    async fn begin(&self) -> Result<Box<dyn ContentTx>, RepoError>;

    async fn find_post(&self, source_document_id: &str) -> Result<Option<PostRecord>, RepoError>;

    async fn list_posts(&self, content_type: ContentType) -> Result<Vec<PostRecord>, RepoError>;

    async fn list_logs(&self, post_id: Uuid) -> Result<Vec<LogRecord>, RepoError>;

    async fn find_photo(&self, post_id: Uuid) -> Result<Option<PhotoRecord>, RepoError>;

    async fn social_counts(&self, post_id: Uuid) -> Result<SocialCounts, RepoError>;
}

/// Unit of work used by the sync dispatcher.
///
/// Dropping a transaction without calling [`ContentTx::commit`] rolls it back.
#[async_trait]
pub trait ContentTx: Send {
    /// Live (not merged) canonical posts matching the lookup, oldest first.
    ///
    /// Matched rows stay locked until the transaction ends.
    async fn find_canonical(
        &mut self,
        lookup: CanonicalLookup<'_>,
    ) -> Result<Vec<PostRecord>, RepoError>;

    async fn insert_post(&mut self, params: NewPostParams) -> Result<PostRecord, RepoError>;

    async fn rekey_post(
        &mut self,
        post_id: Uuid,
        source_document_id: &str,
    ) -> Result<PostRecord, RepoError>;

    /// Refresh a post after a sync, clearing any soft-delete.
    async fn touch_post(
        &mut self,
        post_id: Uuid,
        author_id: Option<&str>,
    ) -> Result<PostRecord, RepoError>;

    async fn soft_delete_post(
        &mut self,
        post_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<PostRecord, RepoError>;

    /// Move variants and social rows from `duplicate_id` onto `primary_id`,
    /// then soft-delete the duplicate and mark it merged.
    async fn absorb_post(&mut self, duplicate_id: Uuid, primary_id: Uuid)
    -> Result<(), RepoError>;

    async fn find_log(
        &mut self,
        post_id: Uuid,
        language: &str,
    ) -> Result<Option<LogRecord>, RepoError>;

    async fn insert_log(&mut self, post_id: Uuid, fields: &LogFields)
    -> Result<LogRecord, RepoError>;

    async fn update_log(&mut self, log_id: Uuid, fields: &LogFields)
    -> Result<LogRecord, RepoError>;

    async fn find_photo(&mut self, post_id: Uuid) -> Result<Option<PhotoRecord>, RepoError>;

    async fn insert_photo(
        &mut self,
        post_id: Uuid,
        fields: &PhotoFields,
    ) -> Result<PhotoRecord, RepoError>;

    async fn update_photo(
        &mut self,
        photo_id: Uuid,
        fields: &PhotoFields,
    ) -> Result<PhotoRecord, RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;
}

#[async_trait]
pub trait WebhookCallsRepo: Send + Sync {
    async fn append_call(&self, record: WebhookCallRecord) -> Result<(), RepoError>;

    /// Count webhook deliveries (manual entries excluded) recorded at or after `since`.
    async fn count_calls_since(&self, since: OffsetDateTime) -> Result<u64, RepoError>;

    async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookCallRecord>, RepoError>;
}
