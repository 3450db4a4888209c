//! Relationship mapper.
//!
//! Turns a changed document into the cache tags and rendered paths it
//! affects. Direct resources come from the document's own fields; indirect
//! ones come from CMS relationship queries (parents that reference the
//! document, or children a collection currently holds). Indirect lookups are
//! bounded and best-effort: a failed query leaves only the direct resources.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::application::cms::{CmsError, CmsGateway, RelatedDocument};
use crate::domain::document::ContentDocument;
use crate::domain::types::ContentType;

use super::task::InvalidationTask;

pub const SITEMAP_PATH: &str = "/sitemap.xml";

/// Site section that renders documents of `content_type`.
pub fn section_path(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Log => "/logs",
        ContentType::Photo => "/photos",
        ContentType::Collection => "/collections",
        ContentType::DevCollection => "/dev",
        ContentType::Author => "/about",
    }
}

/// Tag carried by every cached page that lists documents of `content_type`.
pub fn type_tag(content_type: ContentType) -> String {
    format!("type:{content_type}")
}

pub fn document_tag(content_type: ContentType, document_id: &str) -> String {
    format!("{content_type}:{document_id}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffectedResources {
    pub tags: BTreeSet<String>,
    pub paths: BTreeSet<String>,
}

impl AffectedResources {
    pub fn extend(&mut self, other: AffectedResources) {
        self.tags.extend(other.tags);
        self.paths.extend(other.paths);
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.paths.is_empty()
    }
}

#[derive(Clone)]
pub struct RelationshipMapper {
    cms: Option<Arc<dyn CmsGateway>>,
    languages: Vec<String>,
    lookup_timeout: Duration,
}

impl RelationshipMapper {
    pub fn new(
        cms: Option<Arc<dyn CmsGateway>>,
        languages: Vec<String>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            cms,
            languages,
            lookup_timeout,
        }
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub async fn affected_tags(
        &self,
        content_type: ContentType,
        document: &ContentDocument,
    ) -> Vec<String> {
        self.affected(content_type, document)
            .await
            .tags
            .into_iter()
            .collect()
    }

    pub async fn affected_paths(
        &self,
        content_type: ContentType,
        document: &ContentDocument,
    ) -> Vec<String> {
        self.affected(content_type, document)
            .await
            .paths
            .into_iter()
            .collect()
    }

    /// Direct plus indirect resources for one document snapshot.
    pub async fn affected(
        &self,
        content_type: ContentType,
        document: &ContentDocument,
    ) -> AffectedResources {
        let mut resources = self.direct(content_type, document);
        resources.extend(
            self.indirect(content_type, document.id(), &document.child_references())
                .await,
        );
        resources
    }

    /// Resources for a merged task: every snapshot plus the translation siblings.
    pub async fn resolve_task(&self, task: &InvalidationTask) -> AffectedResources {
        let mut resources = AffectedResources::default();
        resources.tags.insert(type_tag(task.content_type));
        resources
            .tags
            .insert(document_tag(task.content_type, &task.document_id));

        let mut has_snapshot = false;
        for snapshot in task.snapshots() {
            has_snapshot = true;
            resources.extend(self.affected(task.content_type, snapshot).await);
        }
        if !has_snapshot {
            resources.extend(
                self.affected_by_id(task.content_type, &task.document_id)
                    .await,
            );
        }

        for sibling in &task.related.sibling_ids {
            resources
                .tags
                .insert(document_tag(task.content_type, sibling));
        }
        if let Some(group_id) = &task.related.group_id {
            resources
                .tags
                .insert(document_tag(task.content_type, group_id));
        }

        resources
    }

    /// Resources for a whole content type, used by manual clears.
    pub fn section(&self, content_type: ContentType) -> AffectedResources {
        let mut resources = AffectedResources::default();
        resources.tags.insert(type_tag(content_type));
        for language in &self.languages {
            resources
                .paths
                .insert(format!("/{language}{}", section_path(content_type)));
        }
        resources
    }

    /// Language home pages and the sitemap, for every site language.
    pub fn site_roots(&self) -> AffectedResources {
        let mut resources = AffectedResources::default();
        resources.paths.extend(self.localized(None, ""));
        resources.paths.insert(SITEMAP_PATH.to_string());
        resources
    }

    /// Resources for a document known only by id, e.g. a manual purge.
    ///
    /// The current document is fetched from the CMS for its slug and language;
    /// when that fails only id-derived resources and relationships are used.
    pub async fn affected_by_id(
        &self,
        content_type: ContentType,
        document_id: &str,
    ) -> AffectedResources {
        let current = match &self.cms {
            Some(cms) => {
                let ids = [document_id.to_string()];
                match self.bounded(cms.fetch_documents(&ids)).await {
                    Ok(found) => found.into_iter().find(|item| item.id == document_id),
                    Err(err) => {
                        warn!(
                            target = "cms_sync::relations",
                            document_id,
                            content_type = %content_type,
                            error = %err,
                            "document lookup failed; using id-derived resources only"
                        );
                        None
                    }
                }
            }
            None => None,
        };
        let slug = current.as_ref().and_then(|item| item.slug.as_deref());
        let language = current.as_ref().and_then(|item| item.language.as_deref());

        let mut resources = self.listing(content_type, document_id, slug, language);
        resources.extend(
            self.indirect(content_type, document_id, &BTreeSet::new())
                .await,
        );
        resources
    }

    fn direct(&self, content_type: ContentType, document: &ContentDocument) -> AffectedResources {
        let mut resources = self.listing(
            content_type,
            document.id(),
            document.slug(),
            document.language(),
        );

        let child_type = match content_type {
            ContentType::Collection => Some(ContentType::Photo),
            ContentType::DevCollection => Some(ContentType::Log),
            _ => None,
        };
        if let Some(child_type) = child_type {
            for child in document.child_references() {
                resources.tags.insert(document_tag(child_type, &child));
            }
        }

        resources
    }

    /// Section, item and listing pages for one document.
    fn listing(
        &self,
        content_type: ContentType,
        document_id: &str,
        slug: Option<&str>,
        language: Option<&str>,
    ) -> AffectedResources {
        let mut resources = self.section(content_type);
        resources
            .tags
            .insert(document_tag(content_type, document_id));
        resources
            .paths
            .extend(self.item_paths(content_type, document_id, slug, language));

        match content_type {
            ContentType::Log | ContentType::Collection => {
                resources.paths.extend(self.localized(language, ""));
                resources.paths.insert(SITEMAP_PATH.to_string());
            }
            ContentType::DevCollection => {
                resources.paths.insert(SITEMAP_PATH.to_string());
            }
            ContentType::Photo | ContentType::Author => {}
        }
        resources
    }

    /// Relationship lookups; `children` are the references held by the snapshot.
    async fn indirect(
        &self,
        content_type: ContentType,
        document_id: &str,
        children: &BTreeSet<String>,
    ) -> AffectedResources {
        let mut resources = AffectedResources::default();
        let Some(cms) = &self.cms else {
            return resources;
        };

        let (relation, lookup) = match content_type {
            ContentType::Collection | ContentType::DevCollection => {
                ("children", cms.children_of(document_id))
            }
            ContentType::Log | ContentType::Photo | ContentType::Author => {
                ("referrers", cms.referencing_documents(document_id))
            }
        };

        match self.bounded(lookup).await {
            Ok(related) => {
                for item in &related {
                    resources.extend(self.related(item));
                }
            }
            Err(err) => warn!(
                target = "cms_sync::relations",
                document_id,
                content_type = %content_type,
                relation,
                error = %err,
                "relationship lookup failed; using direct resources only"
            ),
        }

        // Children dropped from a collection are no longer returned by
        // `children_of`; resolve the snapshot's references for their slugs.
        if content_type == ContentType::DevCollection {
            let children: Vec<String> = children.iter().cloned().collect();
            if !children.is_empty() {
                match self.bounded(cms.fetch_documents(&children)).await {
                    Ok(related) => {
                        for item in &related {
                            resources.extend(self.related(item));
                        }
                    }
                    Err(err) => warn!(
                        target = "cms_sync::relations",
                        document_id,
                        error = %err,
                        "child lookup failed"
                    ),
                }
            }
        }

        resources
    }

    async fn bounded<F>(&self, lookup: F) -> Result<Vec<RelatedDocument>, CmsError>
    where
        F: std::future::Future<Output = Result<Vec<RelatedDocument>, CmsError>>,
    {
        tokio::time::timeout(self.lookup_timeout, lookup)
            .await
            .unwrap_or(Err(CmsError::Timeout {
                elapsed_ms: self.lookup_timeout.as_millis() as u64,
            }))
    }

    fn related(&self, item: &RelatedDocument) -> AffectedResources {
        let mut resources = AffectedResources::default();
        let Some(content_type) = item.content_type() else {
            return resources;
        };
        resources.tags.insert(document_tag(content_type, &item.id));
        resources.paths.extend(self.item_paths(
            content_type,
            &item.id,
            item.slug.as_deref(),
            item.language.as_deref(),
        ));
        resources
    }

    fn item_paths(
        &self,
        content_type: ContentType,
        id: &str,
        slug: Option<&str>,
        language: Option<&str>,
    ) -> Vec<String> {
        let section = section_path(content_type);
        match content_type {
            ContentType::Photo => self.localized(None, &format!("{section}/{id}")),
            ContentType::Author => self.localized(None, section),
            ContentType::Log | ContentType::Collection | ContentType::DevCollection => match slug {
                Some(slug) => self.localized(language, &format!("{section}/{slug}")),
                None => Vec::new(),
            },
        }
    }

    /// `/{language}{suffix}` for the given language, or for every site language.
    fn localized(&self, language: Option<&str>, suffix: &str) -> Vec<String> {
        match language {
            Some(language) => vec![format!("/{language}{suffix}")],
            None => self
                .languages
                .iter()
                .map(|language| format!("/{language}{suffix}"))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::application::cms::TranslationLookup;

    #[derive(Default)]
    struct FixedCms {
        referrers: Vec<RelatedDocument>,
        documents: Vec<RelatedDocument>,
        stall: bool,
    }

    #[async_trait]
    impl CmsGateway for FixedCms {
        async fn translation_lookup(&self, _id: &str) -> Result<TranslationLookup, CmsError> {
            Ok(TranslationLookup::default())
        }

        async fn document_language(&self, _id: &str) -> Result<Option<String>, CmsError> {
            Ok(None)
        }

        async fn referencing_documents(&self, _id: &str) -> Result<Vec<RelatedDocument>, CmsError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(self.referrers.clone())
        }

        async fn children_of(&self, _id: &str) -> Result<Vec<RelatedDocument>, CmsError> {
            Ok(Vec::new())
        }

        async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<RelatedDocument>, CmsError> {
            Ok(self
                .documents
                .iter()
                .filter(|document| ids.contains(&document.id))
                .cloned()
                .collect())
        }
    }

    fn languages() -> Vec<String> {
        vec!["en".into(), "zh".into()]
    }

    fn decode(value: serde_json::Value) -> ContentDocument {
        ContentDocument::decode(&value).unwrap().unwrap()
    }

    #[tokio::test]
    async fn log_direct_resources_use_its_language() {
        let mapper = RelationshipMapper::new(None, languages(), Duration::from_secs(1));
        let log = decode(json!({
            "_id": "doc-en", "_type": "log", "language": "en",
            "slug": { "current": "hello" }
        }));

        let resources = mapper.affected(ContentType::Log, &log).await;

        assert!(resources.tags.contains("log:doc-en"));
        assert!(resources.tags.contains("type:log"));
        assert!(resources.paths.contains("/en/logs/hello"));
        assert!(resources.paths.contains("/en"));
        assert!(resources.paths.contains(SITEMAP_PATH));
        assert!(!resources.paths.contains("/zh/logs/hello"));
    }

    #[tokio::test]
    async fn photo_paths_expand_to_every_language() {
        let mapper = RelationshipMapper::new(None, languages(), Duration::from_secs(1));
        let photo = decode(json!({ "_id": "p-1", "_type": "photo" }));

        let paths = mapper.affected_paths(ContentType::Photo, &photo).await;

        assert_eq!(
            paths,
            vec!["/en/photos", "/en/photos/p-1", "/zh/photos", "/zh/photos/p-1"]
        );
    }

    #[tokio::test]
    async fn parent_collections_are_invalidated_through_referrers() {
        let cms = FixedCms {
            referrers: vec![RelatedDocument {
                id: "col-1".into(),
                type_name: "collection".into(),
                slug: Some("travel".into()),
                language: Some("zh".into()),
            }],
            ..Default::default()
        };
        let mapper = RelationshipMapper::new(Some(Arc::new(cms)), languages(), Duration::from_secs(1));
        let photo = decode(json!({ "_id": "p-1", "_type": "photo" }));

        let resources = mapper.affected(ContentType::Photo, &photo).await;

        assert!(resources.tags.contains("collection:col-1"));
        assert!(resources.paths.contains("/zh/collections/travel"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_degrades_to_direct_resources() {
        let cms = FixedCms {
            stall: true,
            ..Default::default()
        };
        let mapper = RelationshipMapper::new(
            Some(Arc::new(cms)),
            languages(),
            Duration::from_millis(50),
        );
        let photo = decode(json!({ "_id": "p-1", "_type": "photo" }));

        let with_cms = mapper.affected(ContentType::Photo, &photo).await;
        let direct = RelationshipMapper::new(None, languages(), Duration::from_millis(50))
            .affected(ContentType::Photo, &photo)
            .await;

        assert_eq!(with_cms, direct);
    }

    #[tokio::test]
    async fn collection_children_are_tagged_from_snapshot() {
        let mapper = RelationshipMapper::new(None, languages(), Duration::from_secs(1));
        let collection = decode(json!({
            "_id": "col-1", "_type": "collection", "language": "en",
            "slug": { "current": "travel" },
            "photos": [{ "_ref": "p-1" }, { "_ref": "p-2" }]
        }));

        let tags = mapper.affected_tags(ContentType::Collection, &collection).await;

        assert!(tags.contains(&"photo:p-1".to_string()));
        assert!(tags.contains(&"photo:p-2".to_string()));
        assert!(tags.contains(&"collection:col-1".to_string()));
    }

    #[tokio::test]
    async fn id_only_task_is_resolved_through_the_cms() {
        let cms = FixedCms {
            documents: vec![RelatedDocument {
                id: "doc-en".into(),
                type_name: "log".into(),
                slug: Some("hello".into()),
                language: Some("en".into()),
            }],
            referrers: vec![RelatedDocument {
                id: "dev-1".into(),
                type_name: "devCollection".into(),
                slug: Some("rust".into()),
                language: Some("en".into()),
            }],
            ..Default::default()
        };
        let mapper = RelationshipMapper::new(Some(Arc::new(cms)), languages(), Duration::from_secs(1));
        let task = InvalidationTask::for_document(ContentType::Log, "doc-en");

        let resources = mapper.resolve_task(&task).await;

        assert!(resources.tags.contains("log:doc-en"));
        assert!(resources.tags.contains("devCollection:dev-1"));
        assert!(resources.paths.contains("/en/logs/hello"));
        assert!(resources.paths.contains("/en"));
        assert!(resources.paths.contains("/en/dev/rust"));
        assert!(!resources.paths.contains("/zh/logs/hello"));
    }

    #[tokio::test]
    async fn id_only_photo_has_paths_without_a_cms() {
        let mapper = RelationshipMapper::new(None, languages(), Duration::from_secs(1));

        let resources = mapper.affected_by_id(ContentType::Photo, "p-1").await;

        assert!(resources.paths.contains("/en/photos/p-1"));
        assert!(resources.paths.contains("/zh/photos/p-1"));
        assert!(resources.tags.contains("photo:p-1"));
    }
}
