use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
            "piatto_partition_hit_total",
            Unit::Count,
            "Total number of partition reads served from cache."
        );
        describe_counter!(
            "piatto_partition_miss_total",
            Unit::Count,
            "Total number of partition reads that found nothing cached."
        );
        describe_counter!(
            "piatto_partition_evict_total",
            Unit::Count,
            "Total number of partitions evicted at capacity."
        );
        describe_counter!(
            "piatto_refetch_total",
            Unit::Count,
            "Total number of authoritative refetches that landed."
        );
        describe_counter!(
            "piatto_optimistic_apply_total",
            Unit::Count,
            "Total number of optimistic projections applied."
        );
        describe_counter!(
            "piatto_reconcile_total",
            Unit::Count,
            "Total number of mutations reconciled against the remote."
        );
        describe_counter!(
            "piatto_rollback_total",
            Unit::Count,
            "Total number of mutations rolled back to their snapshots."
        );
        describe_counter!(
            "piatto_partial_cascade_total",
            Unit::Count,
            "Total number of cascades with failed sub-requests."
        );
        describe_counter!(
            "piatto_signal_published_total",
            Unit::Count,
            "Total number of change signals published."
        );
        describe_counter!(
            "piatto_signal_dropped_total",
            Unit::Count,
            "Total number of duplicate or reordered change signals dropped."
        );
        describe_histogram!(
            "piatto_mutation_settle_ms",
            Unit::Milliseconds,
            "Time from optimistic projection to settlement in milliseconds."
        );
    });
}
