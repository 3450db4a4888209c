//! Typed CMS document snapshots.
//!
//! Webhook payloads carry loosely shaped JSON. Documents are decoded into the
//! closed [`ContentDocument`] union at the ingress boundary so that handlers
//! downstream only ever see the fields their content type defines. Unknown
//! fields are ignored; unknown `_type`s decode to `None`.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::DomainError;
use super::types::ContentType;

const DRAFT_PREFIX: &str = "drafts.";

/// A reference to another CMS document or asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "_ref")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slug {
    pub current: String,
}

/// An image field; the asset reference is absent until an image is uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageField {
    #[serde(default)]
    pub asset: Option<Reference>,
}

/// A block of rich text content. Only image blocks matter for invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "camelCase")]
pub enum ContentBlock {
    Image {
        #[serde(default)]
        asset: Option<Reference>,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Blocks that do not decode as a known shape (including untyped ones) are `Other`.
    fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or(ContentBlock::Other)
    }
}

/// A missing or `null` array decodes as empty.
fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Portable text tolerates `null` and blocks of any shape.
fn lenient_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let blocks: Vec<Value> = nullable_vec(deserializer)?;
    Ok(blocks.into_iter().map(ContentBlock::from_value).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<Slug>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub main_image: Option<ImageField>,
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub author: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<ImageField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<Slug>,
    #[serde(default)]
    pub cover_image: Option<ImageField>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub photos: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevCollectionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<Slug>,
    #[serde(default)]
    pub cover_image: Option<ImageField>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub logs: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<Slug>,
    #[serde(default)]
    pub avatar: Option<ImageField>,
}

/// Closed union over every document shape this service handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "camelCase")]
pub enum ContentDocument {
    Collection(CollectionDocument),
    Photo(PhotoDocument),
    Log(LogDocument),
    DevCollection(DevCollectionDocument),
    Author(AuthorDocument),
}

/// Strip the draft prefix so drafts and published documents share an identity.
pub fn published_id(id: &str) -> &str {
    id.strip_prefix(DRAFT_PREFIX).unwrap_or(id)
}

impl ContentDocument {
    /// Decode a raw snapshot.
    ///
    /// Returns `Ok(None)` when `_type` names a type this service does not handle,
    /// and a validation error when a known type is missing required fields.
    pub fn decode(value: &Value) -> Result<Option<Self>, DomainError> {
        let type_name = value
            .get("_type")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::validation("document is missing `_type`"))?;

        if ContentType::parse(type_name).is_none() {
            return Ok(None);
        }

        let mut document: ContentDocument = serde_json::from_value(value.clone())
            .map_err(|err| DomainError::validation(format!("invalid `{type_name}`: {err}")))?;
        document.normalize_id();
        Ok(Some(document))
    }

    fn normalize_id(&mut self) {
        let id = match self {
            ContentDocument::Collection(doc) => &mut doc.id,
            ContentDocument::Photo(doc) => &mut doc.id,
            ContentDocument::Log(doc) => &mut doc.id,
            ContentDocument::DevCollection(doc) => &mut doc.id,
            ContentDocument::Author(doc) => &mut doc.id,
        };
        if let Some(stripped) = id.strip_prefix(DRAFT_PREFIX) {
            *id = stripped.to_string();
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContentDocument::Collection(doc) => &doc.id,
            ContentDocument::Photo(doc) => &doc.id,
            ContentDocument::Log(doc) => &doc.id,
            ContentDocument::DevCollection(doc) => &doc.id,
            ContentDocument::Author(doc) => &doc.id,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            ContentDocument::Collection(_) => ContentType::Collection,
            ContentDocument::Photo(_) => ContentType::Photo,
            ContentDocument::Log(_) => ContentType::Log,
            ContentDocument::DevCollection(_) => ContentType::DevCollection,
            ContentDocument::Author(_) => ContentType::Author,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            ContentDocument::Collection(doc) => doc.language.as_deref(),
            ContentDocument::Log(doc) => doc.language.as_deref(),
            ContentDocument::DevCollection(doc) => doc.language.as_deref(),
            ContentDocument::Photo(_) | ContentDocument::Author(_) => None,
        }
    }

    pub fn slug(&self) -> Option<&str> {
        let slug = match self {
            ContentDocument::Collection(doc) => doc.slug.as_ref(),
            ContentDocument::Log(doc) => doc.slug.as_ref(),
            ContentDocument::DevCollection(doc) => doc.slug.as_ref(),
            ContentDocument::Author(doc) => doc.slug.as_ref(),
            ContentDocument::Photo(_) => None,
        };
        slug.map(|slug| slug.current.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Walk the document, reporting image fields and document references.
    pub fn accept<V: DocumentVisitor>(&self, visitor: &mut V) {
        match self {
            ContentDocument::Log(doc) => {
                if let Some(image) = &doc.main_image {
                    visitor.visit_image(image);
                }
                for block in &doc.content {
                    if let ContentBlock::Image { asset: Some(asset) } = block {
                        visitor.visit_asset(asset);
                    }
                }
                if let Some(author) = &doc.author {
                    visitor.visit_reference(ReferenceRole::Author, author);
                }
            }
            ContentDocument::Photo(doc) => {
                if let Some(image) = &doc.image {
                    visitor.visit_image(image);
                }
            }
            ContentDocument::Collection(doc) => {
                if let Some(image) = &doc.cover_image {
                    visitor.visit_image(image);
                }
                for photo in &doc.photos {
                    visitor.visit_reference(ReferenceRole::Child, photo);
                }
            }
            ContentDocument::DevCollection(doc) => {
                if let Some(image) = &doc.cover_image {
                    visitor.visit_image(image);
                }
                for log in &doc.logs {
                    visitor.visit_reference(ReferenceRole::Child, log);
                }
            }
            ContentDocument::Author(doc) => {
                if let Some(image) = &doc.avatar {
                    visitor.visit_image(image);
                }
            }
        }
    }

    /// Image asset ids referenced anywhere in the document.
    pub fn asset_references(&self) -> BTreeSet<String> {
        let mut collector = AssetCollector::default();
        self.accept(&mut collector);
        collector.assets
    }

    /// Ids of child documents embedded by reference (collection members).
    pub fn child_references(&self) -> BTreeSet<String> {
        let mut collector = ReferenceCollector::new(ReferenceRole::Child);
        self.accept(&mut collector);
        collector.ids
    }

    pub fn author_reference(&self) -> Option<&str> {
        match self {
            ContentDocument::Log(doc) => doc.author.as_ref().map(|author| author.id.as_str()),
            _ => None,
        }
    }
}

/// Role a document reference plays inside its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    Child,
    Author,
}

pub trait DocumentVisitor {
    fn visit_asset(&mut self, _asset: &Reference) {}

    fn visit_image(&mut self, image: &ImageField) {
        if let Some(asset) = &image.asset {
            self.visit_asset(asset);
        }
    }

    fn visit_reference(&mut self, _role: ReferenceRole, _reference: &Reference) {}
}

#[derive(Debug, Default)]
struct AssetCollector {
    assets: BTreeSet<String>,
}

impl DocumentVisitor for AssetCollector {
    fn visit_asset(&mut self, asset: &Reference) {
        self.assets.insert(asset.id.clone());
    }
}

#[derive(Debug)]
struct ReferenceCollector {
    role: ReferenceRole,
    ids: BTreeSet<String>,
}

impl ReferenceCollector {
    fn new(role: ReferenceRole) -> Self {
        Self {
            role,
            ids: BTreeSet::new(),
        }
    }
}

impl DocumentVisitor for ReferenceCollector {
    fn visit_reference(&mut self, role: ReferenceRole, reference: &Reference) {
        if role == self.role {
            self.ids.insert(published_id(&reference.id).to_string());
        }
    }
}
