//! Relationship-aware cache invalidation.
//!
//! Content changes become [`InvalidationTask`]s. The [`InvalidationScheduler`]
//! batches them over a short debounce window, merges duplicates per
//! document, asks the [`RelationshipMapper`] which tags and paths each change
//! touches, and hands the result to the [`MultiTierPurger`]:
//!
//! - **Framework**: tag and path revalidation of the rendering layer
//! - **Edge CDN**: purge-by-URL of the affected pages
//! - **Images**: purge of every rendered size of referenced image assets

mod config;
mod lock;
mod planner;
mod purge;
mod relations;
mod scheduler;
mod task;

pub use config::InvalidationConfig;
pub use planner::InvalidationPlan;
pub use purge::{
    CdnMatch, EdgeCdn, FrameworkCache, ImageVariants, MultiTierPurger, PurgeError, PurgeReport,
    Tier, TierOutcome, absolute_urls,
};
pub use relations::{
    AffectedResources, RelationshipMapper, SITEMAP_PATH, document_tag, section_path, type_tag,
};
pub use scheduler::InvalidationScheduler;
pub use task::{Epoch, InvalidationTask, QueuedTask, RelatedData, TaskQueue};
