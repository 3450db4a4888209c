use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CanonicalLookup, ContentRepo, ContentTx, LogFields, NewPostParams, PhotoFields, RepoError,
    },
    domain::entities::{LogRecord, PhotoRecord, PostRecord, SocialCounts},
    domain::types::ContentType,
};

use super::{PostgresRepositories, map_sqlx_error};

const POST_COLUMNS: &str = "p.id, p.source_document_id, p.content_type, p.author_id, \
     p.is_deleted, p.deleted_at, p.created_at, p.updated_at";

const LOG_COLUMNS: &str =
    "id, post_id, document_id, language, title, slug, excerpt, created_at, updated_at";

const PHOTO_COLUMNS: &str = "id, post_id, document_id, title, asset_ref, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    source_document_id: String,
    content_type: String,
    author_id: Option<String>,
    is_deleted: bool,
    deleted_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PostRow> for PostRecord {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let content_type =
            ContentType::parse(&row.content_type).ok_or_else(|| RepoError::Integrity {
                message: format!("unknown content type `{}`", row.content_type),
            })?;
        Ok(Self {
            id: row.id,
            source_document_id: row.source_document_id,
            content_type,
            author_id: row.author_id,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    post_id: Uuid,
    document_id: String,
    language: String,
    title: String,
    slug: Option<String>,
    excerpt: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<LogRow> for LogRecord {
    fn from(row: LogRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            document_id: row.document_id,
            language: row.language,
            title: row.title,
            slug: row.slug,
            excerpt: row.excerpt,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PhotoRow {
    id: Uuid,
    post_id: Uuid,
    document_id: String,
    title: Option<String>,
    asset_ref: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PhotoRow> for PhotoRecord {
    fn from(row: PhotoRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            document_id: row.document_id,
            title: row.title,
            asset_ref: row.asset_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SocialRow {
    comments: i64,
    likes: i64,
}

fn posts_from_rows(rows: Vec<PostRow>) -> Result<Vec<PostRecord>, RepoError> {
    rows.into_iter().map(PostRecord::try_from).collect()
}

#[async_trait]
impl ContentRepo for PostgresRepositories {
    async fn begin(&self) -> Result<Box<dyn ContentTx>, RepoError> {
        let tx = PostgresRepositories::begin(self)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Box::new(PgContentTx { tx }))
    }

    async fn find_post(&self, source_document_id: &str) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.source_document_id = $1");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(source_document_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.map(PostRecord::try_from).transpose()
    }

    async fn list_posts(&self, content_type: ContentType) -> Result<Vec<PostRecord>, RepoError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts p \
             WHERE p.content_type = $1 AND p.merged_into IS NULL \
             ORDER BY p.created_at, p.id"
        );
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(content_type.as_str())
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        posts_from_rows(rows)
    }

    async fn list_logs(&self, post_id: Uuid) -> Result<Vec<LogRecord>, RepoError> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE post_id = $1 ORDER BY language");
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(post_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_photo(&self, post_id: Uuid) -> Result<Option<PhotoRecord>, RepoError> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE post_id = $1");
        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(post_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn social_counts(&self, post_id: Uuid) -> Result<SocialCounts, RepoError> {
        let row = sqlx::query_as::<_, SocialRow>(
            "SELECT \
                (SELECT COUNT(*) FROM comments WHERE post_id = $1) AS comments, \
                (SELECT COUNT(*) FROM likes WHERE post_id = $1) AS likes",
        )
        .bind(post_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(SocialCounts {
            comments: Self::convert_count(row.comments)?,
            likes: Self::convert_count(row.likes)?,
        })
    }
}

/// One consolidation transaction. Rolled back on drop unless committed.
pub struct PgContentTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ContentTx for PgContentTx {
    async fn find_canonical(
        &mut self,
        lookup: CanonicalLookup<'_>,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts p \
             WHERE p.content_type = $1 \
               AND p.merged_into IS NULL \
               AND (p.source_document_id = ANY($2) \
                    OR EXISTS (SELECT 1 FROM logs l WHERE l.post_id = p.id AND l.document_id = $3) \
                    OR EXISTS (SELECT 1 FROM photos ph WHERE ph.post_id = p.id AND ph.document_id = $3)) \
             ORDER BY p.created_at, p.id \
             FOR UPDATE OF p"
        );
        let rows = sqlx::query_as::<_, PostRow>(&sql)
            .bind(lookup.content_type.as_str())
            .bind(lookup.source_ids)
            .bind(lookup.child_document_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        posts_from_rows(rows)
    }

    async fn insert_post(&mut self, params: NewPostParams) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "INSERT INTO posts AS p (id, source_document_id, content_type, author_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&params.source_document_id)
            .bind(params.content_type.as_str())
            .bind(params.author_id.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        row.try_into()
    }

    async fn rekey_post(
        &mut self,
        post_id: Uuid,
        source_document_id: &str,
    ) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "UPDATE posts AS p SET source_document_id = $2, updated_at = now() \
             WHERE p.id = $1 \
             RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id)
            .bind(source_document_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        row.try_into()
    }

    async fn touch_post(
        &mut self,
        post_id: Uuid,
        author_id: Option<&str>,
    ) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "UPDATE posts AS p SET \
                is_deleted = FALSE, \
                deleted_at = NULL, \
                author_id = COALESCE($2, p.author_id), \
                updated_at = now() \
             WHERE p.id = $1 \
             RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id)
            .bind(author_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        row.try_into()
    }

    async fn soft_delete_post(
        &mut self,
        post_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "UPDATE posts AS p SET is_deleted = TRUE, deleted_at = $2, updated_at = $2 \
             WHERE p.id = $1 \
             RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id)
            .bind(at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        row.try_into()
    }

    async fn absorb_post(
        &mut self,
        duplicate_id: Uuid,
        primary_id: Uuid,
    ) -> Result<(), RepoError> {
        // Variants the primary already has for a language stay with the duplicate.
        sqlx::query(
            "UPDATE logs SET post_id = $2, updated_at = now() \
             WHERE post_id = $1 \
               AND language NOT IN (SELECT language FROM logs WHERE post_id = $2)",
        )
        .bind(duplicate_id)
        .bind(primary_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "UPDATE photos SET post_id = $2, updated_at = now() \
             WHERE post_id = $1 \
               AND NOT EXISTS (SELECT 1 FROM photos WHERE post_id = $2)",
        )
        .bind(duplicate_id)
        .bind(primary_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("UPDATE comments SET post_id = $2 WHERE post_id = $1")
            .bind(duplicate_id)
            .bind(primary_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            "UPDATE likes SET post_id = $2 \
             WHERE post_id = $1 \
               AND visitor_id NOT IN (SELECT visitor_id FROM likes WHERE post_id = $2)",
        )
        .bind(duplicate_id)
        .bind(primary_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        let result = sqlx::query(
            "UPDATE posts SET \
                is_deleted = TRUE, \
                deleted_at = COALESCE(deleted_at, now()), \
                merged_into = $2, \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(duplicate_id)
        .bind(primary_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn find_log(
        &mut self,
        post_id: Uuid,
        language: &str,
    ) -> Result<Option<LogRecord>, RepoError> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE post_id = $1 AND language = $2");
        let row = sqlx::query_as::<_, LogRow>(&sql)
            .bind(post_id)
            .bind(language)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn insert_log(
        &mut self,
        post_id: Uuid,
        fields: &LogFields,
    ) -> Result<LogRecord, RepoError> {
        let sql = format!(
            "INSERT INTO logs (id, post_id, document_id, language, title, slug, excerpt) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {LOG_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LogRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(post_id)
            .bind(&fields.document_id)
            .bind(&fields.language)
            .bind(&fields.title)
            .bind(fields.slug.as_deref())
            .bind(fields.excerpt.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_log(
        &mut self,
        log_id: Uuid,
        fields: &LogFields,
    ) -> Result<LogRecord, RepoError> {
        let sql = format!(
            "UPDATE logs SET document_id = $2, title = $3, slug = $4, excerpt = $5, updated_at = now() \
             WHERE id = $1 \
             RETURNING {LOG_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LogRow>(&sql)
            .bind(log_id)
            .bind(&fields.document_id)
            .bind(&fields.title)
            .bind(fields.slug.as_deref())
            .bind(fields.excerpt.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn find_photo(&mut self, post_id: Uuid) -> Result<Option<PhotoRecord>, RepoError> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE post_id = $1");
        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(post_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn insert_photo(
        &mut self,
        post_id: Uuid,
        fields: &PhotoFields,
    ) -> Result<PhotoRecord, RepoError> {
        let sql = format!(
            "INSERT INTO photos (id, post_id, document_id, title, asset_ref) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {PHOTO_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(post_id)
            .bind(&fields.document_id)
            .bind(fields.title.as_deref())
            .bind(fields.asset_ref.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn update_photo(
        &mut self,
        photo_id: Uuid,
        fields: &PhotoFields,
    ) -> Result<PhotoRecord, RepoError> {
        let sql = format!(
            "UPDATE photos SET document_id = $2, title = $3, asset_ref = $4, updated_at = now() \
             WHERE id = $1 \
             RETURNING {PHOTO_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(photo_id)
            .bind(&fields.document_id)
            .bind(fields.title.as_deref())
            .bind(fields.asset_ref.as_deref())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}
