//! Webhook-driven content synchronization and relationship-aware cache invalidation
//! for a headless CMS.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
