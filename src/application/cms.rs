//! Read-only view of the upstream CMS used for translation and relationship lookups.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::types::ContentType;

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("cms query timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    #[error("cms request failed: {0}")]
    Transport(String),
    #[error("cms responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("cms response could not be decoded: {0}")]
    Decode(String),
}

/// Translation metadata for a document, as reported by the CMS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationLookup {
    /// Id of the translation metadata document, when the document has one.
    pub group_id: Option<String>,
    pub language: Option<String>,
    /// Every document id listed in the translation metadata.
    pub sibling_ids: Vec<String>,
}

/// Summary of a document returned by relationship queries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelatedDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_type")]
    pub type_name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl RelatedDocument {
    pub fn content_type(&self) -> Option<ContentType> {
        ContentType::parse(&self.type_name)
    }
}

#[async_trait]
pub trait CmsGateway: Send + Sync {
    async fn translation_lookup(&self, document_id: &str) -> Result<TranslationLookup, CmsError>;

    /// The narrow fallback query: only the document's own language field.
    async fn document_language(&self, document_id: &str) -> Result<Option<String>, CmsError>;

    /// Documents that hold a reference to `document_id`.
    async fn referencing_documents(
        &self,
        document_id: &str,
    ) -> Result<Vec<RelatedDocument>, CmsError>;

    /// Documents currently referenced as children of `document_id`.
    async fn children_of(&self, document_id: &str) -> Result<Vec<RelatedDocument>, CmsError>;

    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<RelatedDocument>, CmsError>;
}
