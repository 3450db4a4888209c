//! Multi-tier cache purger.
//!
//! Three independent tiers run concurrently for each task: the framework
//! cache (tags and paths), the edge CDN (page URLs), and the image tier
//! (rendered image variants, purged at the edge CDN). A tier failure is
//! logged and reported, never propagated to the other tiers.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::relations::AffectedResources;
use super::task::InvalidationTask;

const METRIC_PURGE_TIER_MS: &str = "cms_sync_purge_tier_ms";
const METRIC_PURGE_FAILURES: &str = "cms_sync_purge_failures_total";

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("purge request failed: {0}")]
    Transport(String),
    #[error("purge endpoint responded with status {status}: {message}")]
    Status { status: u16, message: String },
}

/// Application-level page cache that supports tag and path invalidation.
#[async_trait]
pub trait FrameworkCache: Send + Sync {
    async fn invalidate_tags(&self, tags: &[String]) -> Result<(), PurgeError>;

    async fn invalidate_paths(&self, paths: &[String]) -> Result<(), PurgeError>;

    async fn invalidate_all(&self) -> Result<(), PurgeError>;
}

/// Edge CDN purge API.
#[async_trait]
pub trait EdgeCdn: Send + Sync {
    async fn purge_urls(&self, urls: &[String]) -> Result<(), PurgeError>;

    async fn purge_prefixes(&self, prefixes: &[String]) -> Result<(), PurgeError>;

    async fn purge_everything(&self) -> Result<(), PurgeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Framework,
    Cdn,
    Images,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Framework => "framework",
            Tier::Cdn => "cdn",
            Tier::Images => "images",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierOutcome {
    Purged { items: usize },
    Skipped { reason: &'static str },
    Failed { error: String },
}

impl TierOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TierOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub framework: TierOutcome,
    pub cdn: TierOutcome,
    pub images: TierOutcome,
}

impl PurgeReport {
    pub fn has_failures(&self) -> bool {
        self.framework.is_failed() || self.cdn.is_failed() || self.images.is_failed()
    }

    /// First failure message, prefixed with its tier.
    pub fn failure_summary(&self) -> Option<String> {
        [
            (Tier::Framework, &self.framework),
            (Tier::Cdn, &self.cdn),
            (Tier::Images, &self.images),
        ]
        .into_iter()
        .find_map(|(tier, outcome)| match outcome {
            TierOutcome::Failed { error } => Some(format!("{tier}: {error}")),
            _ => None,
        })
    }
}

/// Expands image asset references into the URLs the image CDN serves.
#[derive(Debug, Clone)]
pub struct ImageVariants {
    base_url: String,
    project_id: String,
    dataset: String,
    widths: Vec<u32>,
}

impl ImageVariants {
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        widths: Vec<u32>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            dataset: dataset.into(),
            widths,
        }
    }

    /// Common prefix of every image URL for this dataset.
    pub fn prefix(&self) -> String {
        format!("{}/{}/{}/", self.base_url, self.project_id, self.dataset)
    }

    /// Original plus one URL per configured width.
    ///
    /// Asset references look like `image-<hash>-<w>x<h>-<ext>`; anything else
    /// expands to nothing.
    pub fn urls_for(&self, asset_ref: &str) -> Vec<String> {
        let Some(file) = asset_file_name(asset_ref) else {
            debug!(asset_ref, "not an image asset reference");
            return Vec::new();
        };
        let original = format!("{}{file}", self.prefix());
        let mut urls = Vec::with_capacity(self.widths.len() + 1);
        for width in &self.widths {
            urls.push(format!("{original}?w={width}&auto=format"));
        }
        urls.insert(0, original);
        urls
    }
}

fn asset_file_name(asset_ref: &str) -> Option<String> {
    let rest = asset_ref.strip_prefix("image-")?;
    let (rest, extension) = rest.rsplit_once('-')?;
    let (hash, dimensions) = rest.rsplit_once('-')?;
    let (width, height) = dimensions.split_once('x')?;
    let valid = !hash.is_empty()
        && !extension.is_empty()
        && width.parse::<u32>().is_ok()
        && height.parse::<u32>().is_ok();
    valid.then(|| format!("{hash}-{dimensions}.{extension}"))
}

/// How page resources are matched at the edge CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdnMatch {
    Exact,
    Prefix,
}

#[derive(Clone)]
pub struct MultiTierPurger {
    framework: Option<Arc<dyn FrameworkCache>>,
    cdn: Option<Arc<dyn EdgeCdn>>,
    site_url: Option<Url>,
    images: ImageVariants,
}

impl MultiTierPurger {
    pub fn new(
        framework: Option<Arc<dyn FrameworkCache>>,
        cdn: Option<Arc<dyn EdgeCdn>>,
        site_url: Option<Url>,
        images: ImageVariants,
    ) -> Self {
        Self {
            framework,
            cdn,
            site_url,
            images,
        }
    }

    /// Purge every tier for one resolved task.
    pub async fn execute(
        &self,
        resources: &AffectedResources,
        task: &InvalidationTask,
    ) -> PurgeReport {
        let (framework, cdn, images) = tokio::join!(
            timed(Tier::Framework, self.purge_framework(resources)),
            timed(Tier::Cdn, self.purge_pages(resources, CdnMatch::Exact)),
            timed(Tier::Images, self.purge_images(task)),
        );
        PurgeReport {
            framework,
            cdn,
            images,
        }
    }

    /// Purge framework and CDN tiers for resources not tied to a document.
    pub async fn clear_resources(
        &self,
        resources: &AffectedResources,
        matching: CdnMatch,
    ) -> PurgeReport {
        let (framework, cdn) = tokio::join!(
            timed(Tier::Framework, self.purge_framework(resources)),
            timed(Tier::Cdn, self.purge_pages(resources, matching)),
        );
        PurgeReport {
            framework,
            cdn,
            images: TierOutcome::Skipped {
                reason: "not requested",
            },
        }
    }

    pub async fn clear_all(&self) -> PurgeReport {
        let (framework, cdn) = tokio::join!(
            timed(Tier::Framework, async {
                match &self.framework {
                    Some(framework) => framework
                        .invalidate_all()
                        .await
                        .map(|()| TierOutcome::Purged { items: 1 }),
                    None => Ok(framework_not_configured()),
                }
            }),
            timed(Tier::Cdn, async {
                match &self.cdn {
                    Some(cdn) => cdn
                        .purge_everything()
                        .await
                        .map(|()| TierOutcome::Purged { items: 1 }),
                    None => Ok(cdn_not_configured()),
                }
            }),
        );
        PurgeReport {
            framework,
            cdn,
            images: TierOutcome::Skipped {
                reason: "covered by cdn purge",
            },
        }
    }

    pub async fn clear_images(&self) -> PurgeReport {
        let images = timed(Tier::Images, async {
            match &self.cdn {
                Some(cdn) => {
                    let prefixes = vec![self.images.prefix()];
                    cdn.purge_prefixes(&prefixes)
                        .await
                        .map(|()| TierOutcome::Purged { items: 1 })
                }
                None => Ok(cdn_not_configured()),
            }
        })
        .await;
        PurgeReport {
            framework: TierOutcome::Skipped {
                reason: "not requested",
            },
            cdn: TierOutcome::Skipped {
                reason: "not requested",
            },
            images,
        }
    }

    async fn purge_framework(
        &self,
        resources: &AffectedResources,
    ) -> Result<TierOutcome, PurgeError> {
        let Some(framework) = &self.framework else {
            return Ok(framework_not_configured());
        };
        if resources.is_empty() {
            return Ok(TierOutcome::Skipped {
                reason: "nothing affected",
            });
        }
        let tags: Vec<String> = resources.tags.iter().cloned().collect();
        let paths: Vec<String> = resources.paths.iter().cloned().collect();

        // Paths are still attempted when tag invalidation fails.
        let tag_result = if tags.is_empty() {
            Ok(())
        } else {
            framework.invalidate_tags(&tags).await
        };
        let path_result = if paths.is_empty() {
            Ok(())
        } else {
            framework.invalidate_paths(&paths).await
        };
        tag_result.and(path_result)?;

        Ok(TierOutcome::Purged {
            items: tags.len() + paths.len(),
        })
    }

    async fn purge_pages(
        &self,
        resources: &AffectedResources,
        matching: CdnMatch,
    ) -> Result<TierOutcome, PurgeError> {
        let Some(cdn) = &self.cdn else {
            return Ok(cdn_not_configured());
        };
        let Some(site_url) = &self.site_url else {
            return Ok(TierOutcome::Skipped {
                reason: "site url not configured",
            });
        };

        let urls = absolute_urls(site_url, &resources.paths);
        if urls.is_empty() {
            return Ok(TierOutcome::Skipped {
                reason: "no paths affected",
            });
        }

        match matching {
            CdnMatch::Exact => cdn.purge_urls(&urls).await?,
            CdnMatch::Prefix => cdn.purge_prefixes(&urls).await?,
        }
        Ok(TierOutcome::Purged { items: urls.len() })
    }

    async fn purge_images(&self, task: &InvalidationTask) -> Result<TierOutcome, PurgeError> {
        let assets: BTreeSet<String> = task
            .snapshots()
            .flat_map(|snapshot| snapshot.asset_references())
            .collect();
        if assets.is_empty() {
            return Ok(TierOutcome::Skipped {
                reason: "no image references",
            });
        }
        let Some(cdn) = &self.cdn else {
            return Ok(cdn_not_configured());
        };

        let urls: Vec<String> = assets
            .iter()
            .flat_map(|asset| self.images.urls_for(asset))
            .collect();
        if urls.is_empty() {
            return Ok(TierOutcome::Skipped {
                reason: "no image references",
            });
        }

        cdn.purge_urls(&urls).await?;
        Ok(TierOutcome::Purged { items: urls.len() })
    }
}

fn framework_not_configured() -> TierOutcome {
    debug!(
        target = "cms_sync::purge",
        "framework revalidation endpoint not configured; skipping"
    );
    TierOutcome::Skipped {
        reason: "framework not configured",
    }
}

fn cdn_not_configured() -> TierOutcome {
    debug!(
        target = "cms_sync::purge",
        "edge CDN credentials not configured; skipping"
    );
    TierOutcome::Skipped {
        reason: "cdn not configured",
    }
}

/// Join site-relative paths onto the public site URL, dropping any that fail to parse.
pub fn absolute_urls<'a>(
    site_url: &Url,
    paths: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    paths
        .into_iter()
        .filter_map(|path| match site_url.join(path) {
            Ok(url) => Some(url.to_string()),
            Err(err) => {
                warn!(target = "cms_sync::purge", path = %path, error = %err, "invalid purge path");
                None
            }
        })
        .collect()
}

async fn timed<F>(tier: Tier, purge: F) -> TierOutcome
where
    F: Future<Output = Result<TierOutcome, PurgeError>>,
{
    let started_at = Instant::now();
    let outcome = match purge.await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                target = "cms_sync::purge",
                tier = tier.as_str(),
                error = %err,
                "cache tier purge failed"
            );
            counter!(METRIC_PURGE_FAILURES, "tier" => tier.as_str()).increment(1);
            TierOutcome::Failed {
                error: err.to_string(),
            }
        }
    };
    histogram!(METRIC_PURGE_TIER_MS, "tier" => tier.as_str())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
    outcome
}
