//! Infrastructure adapters and runtime bootstrap.

pub mod cdn;
pub mod cms;
pub mod db;
pub mod error;
pub mod http;
pub mod revalidate;
pub mod telemetry;
