//! Translation group resolution with bounded CMS lookups.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::application::cms::CmsGateway;

pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_LANGUAGE_TIMEOUT: Duration = Duration::from_millis(5_000);

const METRIC_RESOLUTION_DEGRADED: &str = "cms_sync_resolution_degraded_total";

/// Identity of a translation group as seen by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationGroupInfo {
    pub group_id: String,
    pub language: Option<String>,
    /// Member document ids; always contains the resolved document itself.
    pub sibling_ids: Vec<String>,
}

impl TranslationGroupInfo {
    /// A group of one, keyed by the document's own id.
    pub fn standalone(document_id: &str, language: Option<String>) -> Self {
        Self {
            group_id: document_id.to_string(),
            language,
            sibling_ids: vec![document_id.to_string()],
        }
    }
}

/// Outcome of a resolution. Degraded results carry the fallback identity and
/// must not be used to rekey existing records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Resolved(TranslationGroupInfo),
    Degraded {
        group: TranslationGroupInfo,
        reason: String,
    },
}

impl ResolutionResult {
    pub fn group(&self) -> &TranslationGroupInfo {
        match self {
            ResolutionResult::Resolved(group) => group,
            ResolutionResult::Degraded { group, .. } => group,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ResolutionResult::Degraded { .. })
    }
}

#[derive(Clone)]
pub struct TranslationGroupResolver {
    cms: Arc<dyn CmsGateway>,
    group_timeout: Duration,
    language_timeout: Duration,
}

impl TranslationGroupResolver {
    pub fn new(cms: Arc<dyn CmsGateway>) -> Self {
        Self {
            cms,
            group_timeout: DEFAULT_GROUP_TIMEOUT,
            language_timeout: DEFAULT_LANGUAGE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, group_timeout: Duration, language_timeout: Duration) -> Self {
        self.group_timeout = group_timeout;
        self.language_timeout = language_timeout;
        self
    }

    /// Resolve the translation group for `document_id`. Never fails.
    pub async fn resolve(&self, document_id: &str) -> ResolutionResult {
        let reason =
            match tokio::time::timeout(self.group_timeout, self.cms.translation_lookup(document_id))
                .await
            {
                Ok(Ok(lookup)) => {
                    let Some(group_id) = lookup.group_id else {
                        debug!(document_id, "document has no translation metadata");
                        return ResolutionResult::Resolved(TranslationGroupInfo::standalone(
                            document_id,
                            lookup.language,
                        ));
                    };

                    let mut sibling_ids = Vec::with_capacity(lookup.sibling_ids.len() + 1);
                    for id in lookup
                        .sibling_ids
                        .into_iter()
                        .chain(std::iter::once(document_id.to_string()))
                    {
                        if !sibling_ids.contains(&id) {
                            sibling_ids.push(id);
                        }
                    }

                    return ResolutionResult::Resolved(TranslationGroupInfo {
                        group_id,
                        language: lookup.language,
                        sibling_ids,
                    });
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!(
                    "translation lookup timed out after {}ms",
                    self.group_timeout.as_millis()
                ),
            };

        warn!(
            target = "cms_sync::resolver",
            document_id,
            reason = %reason,
            "translation group lookup failed; falling back to document identity"
        );
        counter!(METRIC_RESOLUTION_DEGRADED).increment(1);

        let language = match tokio::time::timeout(
            self.language_timeout,
            self.cms.document_language(document_id),
        )
        .await
        {
            Ok(Ok(language)) => language,
            Ok(Err(err)) => {
                warn!(document_id, error = %err, "language lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    target = "cms_sync::resolver",
                    document_id,
                    timeout_ms = self.language_timeout.as_millis() as u64,
                    "language lookup timed out"
                );
                None
            }
        };

        ResolutionResult::Degraded {
            group: TranslationGroupInfo::standalone(document_id, language),
            reason,
        }
    }
}
