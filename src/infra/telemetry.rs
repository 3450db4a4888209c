use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cms_sync_webhook_total",
            Unit::Count,
            "Total number of webhook deliveries, labelled by outcome."
        );
        describe_counter!(
            "cms_sync_resolution_degraded_total",
            Unit::Count,
            "Translation group lookups that fell back to standalone resolution."
        );
        describe_gauge!(
            "cms_sync_invalidation_queue_len",
            Unit::Count,
            "Current number of invalidation tasks waiting for the next batch."
        );
        describe_histogram!(
            "cms_sync_invalidation_batch_ms",
            Unit::Milliseconds,
            "Invalidation batch processing latency in milliseconds."
        );
        describe_histogram!(
            "cms_sync_purge_tier_ms",
            Unit::Milliseconds,
            "Per-tier purge latency in milliseconds."
        );
        describe_counter!(
            "cms_sync_purge_failures_total",
            Unit::Count,
            "Total number of failed purge calls, labelled by tier."
        );
    });
}
