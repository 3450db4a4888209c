//! Application services: sync, audit, translation resolution, content queries and orchestration.

pub mod audit;
pub mod cache_admin;
pub mod cms;
pub mod content;
pub mod error;
pub mod repos;
pub mod sync;
pub mod translation;
pub mod webhook;
