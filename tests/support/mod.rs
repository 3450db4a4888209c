#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower::ServiceExt;
use uuid::Uuid;

use cms_sync::application::audit::WebhookAuditService;
use cms_sync::application::cache_admin::CacheAdminService;
use cms_sync::application::content::ContentQueryService;
use cms_sync::application::cms::{CmsError, CmsGateway, RelatedDocument, TranslationLookup};
use cms_sync::application::repos::{
    CanonicalLookup, ContentRepo, ContentTx, LogFields, NewPostParams, PhotoFields, RepoError,
    WebhookCallsRepo,
};
use cms_sync::application::sync::ContentSyncService;
use cms_sync::application::translation::TranslationGroupResolver;
use cms_sync::application::webhook::WebhookService;
use cms_sync::cache::{
    EdgeCdn, FrameworkCache, ImageVariants, InvalidationScheduler, MultiTierPurger, PurgeError,
    RelationshipMapper,
};
use cms_sync::domain::entities::{
    LogRecord, PhotoRecord, PostRecord, SocialCounts, WebhookCallRecord,
};
use cms_sync::domain::types::{CallOperation, ContentType};
use cms_sync::infra::http::{
    AdminState, HealthProbe, WebhookState, build_admin_router, build_webhook_router, signature,
};

pub const SECRET: &str = "test-secret";
pub const DEBOUNCE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// In-memory content store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredPost {
    record: PostRecord,
    merged_into: Option<Uuid>,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct StoredLike {
    pub post_id: Uuid,
    pub visitor_id: String,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    seq: u64,
    posts: Vec<StoredPost>,
    logs: Vec<LogRecord>,
    photos: Vec<PhotoRecord>,
    comments: Vec<(Uuid, Uuid)>,
    likes: Vec<StoredLike>,
    calls: Vec<WebhookCallRecord>,
}

impl StoreState {
    fn post_mut(&mut self, post_id: Uuid) -> Result<&mut StoredPost, RepoError> {
        self.posts
            .iter_mut()
            .find(|post| post.record.id == post_id)
            .ok_or(RepoError::NotFound)
    }

    fn source_taken(&self, source_document_id: &str, except: Option<Uuid>) -> bool {
        self.posts.iter().any(|post| {
            post.record.source_document_id == source_document_id
                && Some(post.record.id) != except
        })
    }
}

fn duplicate_source() -> RepoError {
    RepoError::Duplicate {
        constraint: "posts_source_document_id_key".to_string(),
    }
}

/// Postgres stand-in. Transactions serialize on one lock and stage their
/// writes, so an uncommitted transaction leaves no trace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    injected_duplicates: Arc<AtomicU32>,
    fail_calls: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` canonical inserts fail as if another writer won the race.
    pub fn inject_duplicate_inserts(&self, n: u32) {
        self.injected_duplicates.store(n, Ordering::SeqCst);
    }

    pub fn fail_call_log(&self, fail: bool) {
        self.fail_calls.store(fail, Ordering::SeqCst);
    }

    /// Live canonical posts (merged duplicates excluded), oldest first.
    pub async fn posts(&self) -> Vec<PostRecord> {
        let state = self.state.lock().await;
        let mut posts: Vec<_> = state
            .posts
            .iter()
            .filter(|post| post.merged_into.is_none())
            .cloned()
            .collect();
        posts.sort_by_key(|post| post.seq);
        posts.into_iter().map(|post| post.record).collect()
    }

    pub async fn all_post_count(&self) -> usize {
        self.state.lock().await.posts.len()
    }

    pub async fn merged_into(&self, post_id: Uuid) -> Option<Uuid> {
        let state = self.state.lock().await;
        state
            .posts
            .iter()
            .find(|post| post.record.id == post_id)
            .and_then(|post| post.merged_into)
    }

    pub async fn logs(&self) -> Vec<LogRecord> {
        self.state.lock().await.logs.clone()
    }

    pub async fn photos(&self) -> Vec<PhotoRecord> {
        self.state.lock().await.photos.clone()
    }

    pub async fn calls(&self) -> Vec<WebhookCallRecord> {
        self.state.lock().await.calls.clone()
    }

    pub async fn add_comment(&self, post_id: Uuid) {
        self.state.lock().await.comments.push((Uuid::new_v4(), post_id));
    }

    pub async fn add_like(&self, post_id: Uuid, visitor_id: &str) {
        self.state.lock().await.likes.push(StoredLike {
            post_id,
            visitor_id: visitor_id.to_string(),
        });
    }

    /// Seed `count` webhook calls at `created_at`.
    pub async fn seed_calls(&self, count: usize, created_at: OffsetDateTime) {
        let mut state = self.state.lock().await;
        for n in 0..count {
            state.calls.push(WebhookCallRecord {
                id: Uuid::new_v4(),
                operation: CallOperation::Update,
                content_type: "log".to_string(),
                document_id: format!("seed-{n}"),
                success: true,
                error: None,
                created_at,
            });
        }
    }
}

#[async_trait]
impl ContentRepo for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ContentTx>, RepoError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            injected_duplicates: Arc::clone(&self.injected_duplicates),
        }))
    }

    async fn find_post(&self, source_document_id: &str) -> Result<Option<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .find(|post| post.record.source_document_id == source_document_id)
            .map(|post| post.record.clone()))
    }

    async fn list_posts(&self, content_type: ContentType) -> Result<Vec<PostRecord>, RepoError> {
        Ok(self
            .posts()
            .await
            .into_iter()
            .filter(|post| post.content_type == content_type)
            .collect())
    }

    async fn list_logs(&self, post_id: Uuid) -> Result<Vec<LogRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut logs: Vec<_> = state
            .logs
            .iter()
            .filter(|log| log.post_id == post_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.language.cmp(&b.language));
        Ok(logs)
    }

    async fn find_photo(&self, post_id: Uuid) -> Result<Option<PhotoRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .photos
            .iter()
            .find(|photo| photo.post_id == post_id)
            .cloned())
    }

    async fn social_counts(&self, post_id: Uuid) -> Result<SocialCounts, RepoError> {
        let state = self.state.lock().await;
        Ok(SocialCounts {
            comments: state.comments.iter().filter(|(_, p)| *p == post_id).count() as u64,
            likes: state.likes.iter().filter(|like| like.post_id == post_id).count() as u64,
        })
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
    injected_duplicates: Arc<AtomicU32>,
}

#[async_trait]
impl ContentTx for MemoryTx {
    async fn find_canonical(
        &mut self,
        lookup: CanonicalLookup<'_>,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let state = &self.staged;
        let mut found: Vec<&StoredPost> = state
            .posts
            .iter()
            .filter(|post| post.merged_into.is_none())
            .filter(|post| post.record.content_type == lookup.content_type)
            .filter(|post| {
                let id = post.record.id;
                lookup.source_ids.contains(&post.record.source_document_id)
                    || state.logs.iter().any(|log| {
                        log.post_id == id && log.document_id == lookup.child_document_id
                    })
                    || state.photos.iter().any(|photo| {
                        photo.post_id == id && photo.document_id == lookup.child_document_id
                    })
            })
            .collect();
        found.sort_by_key(|post| post.seq);
        Ok(found.into_iter().map(|post| post.record.clone()).collect())
    }

    async fn insert_post(&mut self, params: NewPostParams) -> Result<PostRecord, RepoError> {
        let injected = self.injected_duplicates.load(Ordering::SeqCst);
        if injected > 0 {
            self.injected_duplicates.store(injected - 1, Ordering::SeqCst);
            return Err(duplicate_source());
        }
        if self.staged.source_taken(&params.source_document_id, None) {
            return Err(duplicate_source());
        }

        let now = OffsetDateTime::now_utc();
        let record = PostRecord {
            id: Uuid::new_v4(),
            source_document_id: params.source_document_id,
            content_type: params.content_type,
            author_id: params.author_id,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.staged.seq += 1;
        let seq = self.staged.seq;
        self.staged.posts.push(StoredPost {
            record: record.clone(),
            merged_into: None,
            seq,
        });
        Ok(record)
    }

    async fn rekey_post(
        &mut self,
        post_id: Uuid,
        source_document_id: &str,
    ) -> Result<PostRecord, RepoError> {
        if self.staged.source_taken(source_document_id, Some(post_id)) {
            return Err(duplicate_source());
        }
        let post = self.staged.post_mut(post_id)?;
        post.record.source_document_id = source_document_id.to_string();
        post.record.updated_at = OffsetDateTime::now_utc();
        Ok(post.record.clone())
    }

    async fn touch_post(
        &mut self,
        post_id: Uuid,
        author_id: Option<&str>,
    ) -> Result<PostRecord, RepoError> {
        let post = self.staged.post_mut(post_id)?;
        post.record.is_deleted = false;
        post.record.deleted_at = None;
        if let Some(author_id) = author_id {
            post.record.author_id = Some(author_id.to_string());
        }
        post.record.updated_at = OffsetDateTime::now_utc();
        Ok(post.record.clone())
    }

    async fn soft_delete_post(
        &mut self,
        post_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<PostRecord, RepoError> {
        let post = self.staged.post_mut(post_id)?;
        post.record.is_deleted = true;
        post.record.deleted_at = Some(at);
        post.record.updated_at = at;
        Ok(post.record.clone())
    }

    async fn absorb_post(
        &mut self,
        duplicate_id: Uuid,
        primary_id: Uuid,
    ) -> Result<(), RepoError> {
        let state = &mut self.staged;
        let primary_languages: Vec<String> = state
            .logs
            .iter()
            .filter(|log| log.post_id == primary_id)
            .map(|log| log.language.clone())
            .collect();
        for log in state.logs.iter_mut() {
            if log.post_id == duplicate_id && !primary_languages.contains(&log.language) {
                log.post_id = primary_id;
            }
        }

        let primary_has_photo = state.photos.iter().any(|photo| photo.post_id == primary_id);
        if !primary_has_photo {
            for photo in state.photos.iter_mut() {
                if photo.post_id == duplicate_id {
                    photo.post_id = primary_id;
                }
            }
        }

        for (_, post_id) in state.comments.iter_mut() {
            if *post_id == duplicate_id {
                *post_id = primary_id;
            }
        }

        let primary_visitors: Vec<String> = state
            .likes
            .iter()
            .filter(|like| like.post_id == primary_id)
            .map(|like| like.visitor_id.clone())
            .collect();
        for like in state.likes.iter_mut() {
            if like.post_id == duplicate_id && !primary_visitors.contains(&like.visitor_id) {
                like.post_id = primary_id;
            }
        }

        let duplicate = state.post_mut(duplicate_id)?;
        let now = OffsetDateTime::now_utc();
        duplicate.record.is_deleted = true;
        duplicate.record.deleted_at.get_or_insert(now);
        duplicate.record.updated_at = now;
        duplicate.merged_into = Some(primary_id);
        Ok(())
    }

    async fn find_log(
        &mut self,
        post_id: Uuid,
        language: &str,
    ) -> Result<Option<LogRecord>, RepoError> {
        Ok(self
            .staged
            .logs
            .iter()
            .find(|log| log.post_id == post_id && log.language == language)
            .cloned())
    }

    async fn insert_log(
        &mut self,
        post_id: Uuid,
        fields: &LogFields,
    ) -> Result<LogRecord, RepoError> {
        if self
            .staged
            .logs
            .iter()
            .any(|log| log.post_id == post_id && log.language == fields.language)
        {
            return Err(RepoError::Duplicate {
                constraint: "logs_post_language_key".to_string(),
            });
        }
        let now = OffsetDateTime::now_utc();
        let record = LogRecord {
            id: Uuid::new_v4(),
            post_id,
            document_id: fields.document_id.clone(),
            language: fields.language.clone(),
            title: fields.title.clone(),
            slug: fields.slug.clone(),
            excerpt: fields.excerpt.clone(),
            created_at: now,
            updated_at: now,
        };
        self.staged.logs.push(record.clone());
        Ok(record)
    }

    async fn update_log(
        &mut self,
        log_id: Uuid,
        fields: &LogFields,
    ) -> Result<LogRecord, RepoError> {
        let log = self
            .staged
            .logs
            .iter_mut()
            .find(|log| log.id == log_id)
            .ok_or(RepoError::NotFound)?;
        log.document_id = fields.document_id.clone();
        log.title = fields.title.clone();
        log.slug = fields.slug.clone();
        log.excerpt = fields.excerpt.clone();
        log.updated_at = OffsetDateTime::now_utc();
        Ok(log.clone())
    }

    async fn find_photo(&mut self, post_id: Uuid) -> Result<Option<PhotoRecord>, RepoError> {
        Ok(self
            .staged
            .photos
            .iter()
            .find(|photo| photo.post_id == post_id)
            .cloned())
    }

    async fn insert_photo(
        &mut self,
        post_id: Uuid,
        fields: &PhotoFields,
    ) -> Result<PhotoRecord, RepoError> {
        if self.staged.photos.iter().any(|photo| photo.post_id == post_id) {
            return Err(RepoError::Duplicate {
                constraint: "photos_post_id_key".to_string(),
            });
        }
        let now = OffsetDateTime::now_utc();
        let record = PhotoRecord {
            id: Uuid::new_v4(),
            post_id,
            document_id: fields.document_id.clone(),
            title: fields.title.clone(),
            asset_ref: fields.asset_ref.clone(),
            created_at: now,
            updated_at: now,
        };
        self.staged.photos.push(record.clone());
        Ok(record)
    }

    async fn update_photo(
        &mut self,
        photo_id: Uuid,
        fields: &PhotoFields,
    ) -> Result<PhotoRecord, RepoError> {
        let photo = self
            .staged
            .photos
            .iter_mut()
            .find(|photo| photo.id == photo_id)
            .ok_or(RepoError::NotFound)?;
        photo.document_id = fields.document_id.clone();
        photo.title = fields.title.clone();
        photo.asset_ref = fields.asset_ref.clone();
        photo.updated_at = OffsetDateTime::now_utc();
        Ok(photo.clone())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl WebhookCallsRepo for MemoryStore {
    async fn append_call(&self, record: WebhookCallRecord) -> Result<(), RepoError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        self.state.lock().await.calls.push(record);
        Ok(())
    }

    async fn count_calls_since(&self, since: OffsetDateTime) -> Result<u64, RepoError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let state = self.state.lock().await;
        Ok(state
            .calls
            .iter()
            .filter(|call| call.created_at >= since && call.operation != CallOperation::Manual)
            .count() as u64)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<WebhookCallRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut calls = state.calls.clone();
        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        calls.truncate(limit as usize);
        Ok(calls)
    }
}

pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake CMS
// ---------------------------------------------------------------------------

/// Scriptable CMS. Translation and referrer lookups for stalled documents never answer.
#[derive(Default)]
pub struct FakeCms {
    groups: StdMutex<HashMap<String, TranslationLookup>>,
    languages: StdMutex<HashMap<String, String>>,
    referrers: StdMutex<HashMap<String, Vec<RelatedDocument>>>,
    documents: StdMutex<HashMap<String, RelatedDocument>>,
    stalled: StdMutex<Vec<String>>,
}

impl FakeCms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a translation group with `(document_id, language)` members.
    pub fn set_group(&self, group_id: &str, members: &[(&str, &str)]) {
        let sibling_ids: Vec<String> = members.iter().map(|(id, _)| id.to_string()).collect();
        let mut groups = self.groups.lock().expect("groups lock");
        let mut languages = self.languages.lock().expect("languages lock");
        for (id, language) in members {
            groups.insert(
                id.to_string(),
                TranslationLookup {
                    group_id: Some(group_id.to_string()),
                    language: Some(language.to_string()),
                    sibling_ids: sibling_ids.clone(),
                },
            );
            languages.insert(id.to_string(), language.to_string());
        }
    }

    pub fn set_referrers(&self, document_id: &str, referrers: Vec<RelatedDocument>) {
        self.referrers
            .lock()
            .expect("referrers lock")
            .insert(document_id.to_string(), referrers);
    }

    /// Make `document` visible to `fetch_documents`.
    pub fn set_document(&self, document: RelatedDocument) {
        self.documents
            .lock()
            .expect("documents lock")
            .insert(document.id.clone(), document);
    }

    pub fn stall(&self, document_id: &str) {
        self.stalled
            .lock()
            .expect("stalled lock")
            .push(document_id.to_string());
    }

    pub fn unstall(&self, document_id: &str) {
        self.stalled
            .lock()
            .expect("stalled lock")
            .retain(|id| id != document_id);
    }

    fn is_stalled(&self, document_id: &str) -> bool {
        self.stalled
            .lock()
            .expect("stalled lock")
            .iter()
            .any(|id| id == document_id)
    }
}

#[async_trait]
impl CmsGateway for FakeCms {
    async fn translation_lookup(&self, document_id: &str) -> Result<TranslationLookup, CmsError> {
        if self.is_stalled(document_id) {
            std::future::pending::<()>().await;
        }
        let lookup = self
            .groups
            .lock()
            .expect("groups lock")
            .get(document_id)
            .cloned();
        Ok(lookup.unwrap_or_default())
    }

    async fn document_language(&self, document_id: &str) -> Result<Option<String>, CmsError> {
        Ok(self
            .languages
            .lock()
            .expect("languages lock")
            .get(document_id)
            .cloned())
    }

    async fn referencing_documents(
        &self,
        document_id: &str,
    ) -> Result<Vec<RelatedDocument>, CmsError> {
        if self.is_stalled(document_id) {
            std::future::pending::<()>().await;
        }
        Ok(self
            .referrers
            .lock()
            .expect("referrers lock")
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn children_of(&self, _document_id: &str) -> Result<Vec<RelatedDocument>, CmsError> {
        Ok(Vec::new())
    }

    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<RelatedDocument>, CmsError> {
        let documents = self.documents.lock().expect("documents lock");
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(id).cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Recording cache tiers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingFramework {
    pub tags: StdMutex<Vec<Vec<String>>>,
    pub paths: StdMutex<Vec<Vec<String>>>,
    pub cleared_all: AtomicU32,
    fail: AtomicBool,
}

impl RecordingFramework {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn tag_calls(&self) -> Vec<Vec<String>> {
        self.tags.lock().expect("tags lock").clone()
    }

    pub fn path_calls(&self) -> Vec<Vec<String>> {
        self.paths.lock().expect("paths lock").clone()
    }

    fn check(&self) -> Result<(), PurgeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PurgeError::Status {
                status: 502,
                message: "framework unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameworkCache for RecordingFramework {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), PurgeError> {
        self.check()?;
        self.tags.lock().expect("tags lock").push(tags.to_vec());
        Ok(())
    }

    async fn invalidate_paths(&self, paths: &[String]) -> Result<(), PurgeError> {
        self.check()?;
        self.paths.lock().expect("paths lock").push(paths.to_vec());
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), PurgeError> {
        self.check()?;
        self.cleared_all.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCdn {
    pub urls: StdMutex<Vec<Vec<String>>>,
    pub prefixes: StdMutex<Vec<Vec<String>>>,
    pub everything: AtomicU32,
    fail: AtomicBool,
    failing_prefix: StdMutex<Option<String>>,
}

impl RecordingCdn {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn url_calls(&self) -> Vec<Vec<String>> {
        self.urls.lock().expect("urls lock").clone()
    }

    pub fn prefix_calls(&self) -> Vec<Vec<String>> {
        self.prefixes.lock().expect("prefixes lock").clone()
    }

    /// Fail only URL purges that touch `prefix`.
    pub fn fail_matching(&self, prefix: &str) {
        *self.failing_prefix.lock().expect("prefix lock") = Some(prefix.to_string());
    }

    fn check(&self) -> Result<(), PurgeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PurgeError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    fn check_urls(&self, urls: &[String]) -> Result<(), PurgeError> {
        self.check()?;
        let failing = self.failing_prefix.lock().expect("prefix lock").clone();
        match failing {
            Some(prefix) if urls.iter().any(|url| url.starts_with(&prefix)) => Err(
                PurgeError::Status {
                    status: 503,
                    message: "zone unavailable".to_string(),
                },
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EdgeCdn for RecordingCdn {
    async fn purge_urls(&self, urls: &[String]) -> Result<(), PurgeError> {
        self.check_urls(urls)?;
        self.urls.lock().expect("urls lock").push(urls.to_vec());
        Ok(())
    }

    async fn purge_prefixes(&self, prefixes: &[String]) -> Result<(), PurgeError> {
        self.check()?;
        self.prefixes
            .lock()
            .expect("prefixes lock")
            .push(prefixes.to_vec());
        Ok(())
    }

    async fn purge_everything(&self) -> Result<(), PurgeError> {
        self.check()?;
        self.everything.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub store: MemoryStore,
    pub cms: Arc<FakeCms>,
    pub framework: Arc<RecordingFramework>,
    pub cdn: Arc<RecordingCdn>,
    pub scheduler: InvalidationScheduler,
    pub webhook: Router,
    pub admin: Router,
}

pub struct TestAppOptions {
    pub secret: Option<&'static str>,
    pub max_requests_per_hour: u32,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            secret: Some(SECRET),
            max_requests_per_hour: 1000,
        }
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_options(TestAppOptions::default())
    }

    pub fn with_options(options: TestAppOptions) -> Self {
        let store = MemoryStore::new();
        let cms = FakeCms::new();
        let framework = Arc::new(RecordingFramework::default());
        let cdn = Arc::new(RecordingCdn::default());

        let cms_gateway: Arc<dyn CmsGateway> = cms.clone();
        let languages = vec!["en".to_string(), "zh".to_string()];
        let mapper = RelationshipMapper::new(
            Some(cms_gateway.clone()),
            languages,
            Duration::from_secs(5),
        );
        let purger = MultiTierPurger::new(
            Some(framework.clone() as Arc<dyn FrameworkCache>),
            Some(cdn.clone() as Arc<dyn EdgeCdn>),
            Some(url::Url::parse("https://example.com").expect("valid url")),
            ImageVariants::new(
                "https://cdn.sanity.io/images",
                "proj",
                "production",
                vec![320, 640],
            ),
        );
        let scheduler = InvalidationScheduler::new(mapper, purger, DEBOUNCE);

        let content_repo: Arc<dyn ContentRepo> = Arc::new(store.clone());
        let calls_repo: Arc<dyn WebhookCallsRepo> = Arc::new(store.clone());
        let audit = WebhookAuditService::new(calls_repo);
        let resolver = TranslationGroupResolver::new(cms_gateway)
            .with_timeouts(Duration::from_secs(10), Duration::from_secs(5));
        let content = ContentQueryService::new(content_repo.clone());
        let sync = ContentSyncService::new(content_repo, "en");
        let service = WebhookService::new(
            Some(resolver),
            sync,
            audit.clone(),
            scheduler.clone(),
            std::num::NonZeroU32::new(options.max_requests_per_hour).expect("non-zero limit"),
        );
        let health: Arc<dyn HealthProbe> = Arc::new(AlwaysHealthy);

        let webhook = build_webhook_router(WebhookState {
            service,
            secret: options.secret.map(Arc::from),
            health: health.clone(),
        });
        let admin = build_admin_router(AdminState {
            cache: CacheAdminService::new(scheduler.clone(), audit.clone()),
            content,
            audit,
            health,
        });

        Self {
            store,
            cms,
            framework,
            cdn,
            scheduler,
            webhook,
            admin,
        }
    }

    pub async fn deliver(&self, body: &Value) -> (StatusCode, Value) {
        let raw = serde_json::to_vec(body).expect("serialize body");
        let signature = signature::sign(SECRET, &raw).expect("sign body");
        self.deliver_raw(raw, Some(signature)).await
    }

    pub async fn deliver_raw(&self, raw: Vec<u8>, signature: Option<String>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(signature::SIGNATURE_HEADER, signature);
        }
        let request = request.body(Body::from(raw)).expect("build request");
        send(self.webhook.clone(), request).await
    }

    pub async fn admin_get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("build request");
        send(self.admin.clone(), request).await
    }

    pub async fn admin_post(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
            .expect("build request");
        send(self.admin.clone(), request).await
    }
}

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.expect("router responds");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

pub fn log_document(id: &str, language: &str, title: &str) -> Value {
    serde_json::json!({
        "_id": id,
        "_type": "log",
        "language": language,
        "title": title,
        "slug": { "current": title.to_lowercase().replace(' ', "-") },
    })
}

pub fn photo_document(id: &str, asset_ref: &str) -> Value {
    serde_json::json!({
        "_id": id,
        "_type": "photo",
        "title": "Harbour",
        "image": { "asset": { "_ref": asset_ref } },
    })
}

pub fn notification(operation: &str, before: Value, after: Value) -> Value {
    serde_json::json!({
        "operation": operation,
        "beforeState": before,
        "afterState": after,
    })
}

pub fn create(document: Value) -> Value {
    notification("create", Value::Null, document)
}

pub fn update(document: Value) -> Value {
    notification("update", Value::Null, document)
}

pub fn delete(document: Value) -> Value {
    notification("delete", document, Value::Null)
}
