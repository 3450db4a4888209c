//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{CallOperation, ContentType};

/// Canonical record for one translation group (or one standalone document).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub source_document_id: String,
    pub content_type: ContentType,
    pub author_id: Option<String>,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Per-language variant of a multilingual post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub document_id: String,
    pub language: String,
    pub title: String,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Single child row of a photo post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub document_id: String,
    pub title: Option<String>,
    pub asset_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One processed inbound notification (or manual cache operation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookCallRecord {
    pub id: Uuid,
    pub operation: CallOperation,
    pub content_type: String,
    pub document_id: String,
    pub success: bool,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Social-interaction rows attached to a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SocialCounts {
    pub comments: u64,
    pub likes: u64,
}
