//! Shared domain enumerations for content types and change operations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content types published by the upstream CMS that this service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Collection,
    Photo,
    Log,
    DevCollection,
    Author,
}

/// How a content type is represented in the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// One canonical post per translation group plus one variant per language.
    Multilingual,
    /// One canonical post per document plus a single child row.
    Singleton,
    /// Nothing is stored; changes only invalidate caches.
    CacheOnly,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Collection,
        ContentType::Photo,
        ContentType::Log,
        ContentType::DevCollection,
        ContentType::Author,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Collection => "collection",
            ContentType::Photo => "photo",
            ContentType::Log => "log",
            ContentType::DevCollection => "devCollection",
            ContentType::Author => "author",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn persistence(self) -> Persistence {
        match self {
            ContentType::Log => Persistence::Multilingual,
            ContentType::Photo => Persistence::Singleton,
            ContentType::Collection | ContentType::DevCollection | ContentType::Author => {
                Persistence::CacheOnly
            }
        }
    }

    /// Whether documents of this type are translated into sibling documents upstream.
    pub fn is_translated(self) -> bool {
        matches!(
            self,
            ContentType::Log | ContentType::Collection | ContentType::DevCollection
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation carried by an inbound change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOperation {
    Create,
    Update,
    Delete,
}

impl WebhookOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookOperation::Create => "create",
            WebhookOperation::Update => "update",
            WebhookOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for WebhookOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation recorded in the webhook call log.
///
/// Manual entries come from admin-triggered cache operations and are excluded
/// from the webhook rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOperation {
    Create,
    Update,
    Delete,
    Manual,
}

impl CallOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            CallOperation::Create => "create",
            CallOperation::Update => "update",
            CallOperation::Delete => "delete",
            CallOperation::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(CallOperation::Create),
            "update" => Some(CallOperation::Update),
            "delete" => Some(CallOperation::Delete),
            "manual" => Some(CallOperation::Manual),
            _ => None,
        }
    }
}

impl From<WebhookOperation> for CallOperation {
    fn from(operation: WebhookOperation) -> Self {
        match operation {
            WebhookOperation::Create => CallOperation::Create,
            WebhookOperation::Update => CallOperation::Update,
            WebhookOperation::Delete => CallOperation::Delete,
        }
    }
}
