//! Read-only views of synced content for the admin listener.

use std::sync::Arc;

use serde::Serialize;

use crate::application::error::AppError;
use crate::application::repos::ContentRepo;
use crate::domain::entities::{LogRecord, PhotoRecord, PostRecord, SocialCounts};
use crate::domain::types::{ContentType, Persistence};

/// A canonical post with its child rows and social counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    pub post: PostRecord,
    pub logs: Vec<LogRecord>,
    pub photo: Option<PhotoRecord>,
    pub social: SocialCounts,
}

#[derive(Clone)]
pub struct ContentQueryService {
    repo: Arc<dyn ContentRepo>,
}

impl ContentQueryService {
    pub fn new(repo: Arc<dyn ContentRepo>) -> Self {
        Self { repo }
    }

    /// Live canonical posts of `content_type`, oldest first.
    pub async fn list_posts(&self, content_type: ContentType) -> Result<Vec<PostRecord>, AppError> {
        if content_type.persistence() == Persistence::CacheOnly {
            return Err(AppError::validation(format!(
                "`{content_type}` documents are not stored"
            )));
        }
        Ok(self.repo.list_posts(content_type).await?)
    }

    /// Look a post up by its source document id (translation group or document id).
    pub async fn post_detail(
        &self,
        source_document_id: &str,
    ) -> Result<Option<PostDetail>, AppError> {
        let Some(post) = self.repo.find_post(source_document_id).await? else {
            return Ok(None);
        };

        let (logs, photo) = match post.content_type.persistence() {
            Persistence::Multilingual => (self.repo.list_logs(post.id).await?, None),
            Persistence::Singleton => (Vec::new(), self.repo.find_photo(post.id).await?),
            Persistence::CacheOnly => (Vec::new(), None),
        };
        let social = self.repo.social_counts(post.id).await?;

        Ok(Some(PostDetail {
            post,
            logs,
            photo,
            social,
        }))
    }
}
