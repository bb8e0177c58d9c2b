//! Tracing initialization and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Install the global tracing subscriber.
///
/// The filter honours `RUST_LOG` and falls back to `default_directive`
/// when the variable is unset. Calling this twice returns an error from
/// the underlying registry; tests should use their own subscriber.
pub fn init_tracing(default_directive: &str, format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    }
}

static DESCRIBE: Once = Once::new();

/// Register metric descriptions with the installed recorder.
///
/// Idempotent; safe to call from every entry point.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "tessera_cache_hit_total",
            Unit::Count,
            "Cache reads that found a live record"
        );
        describe_counter!(
            "tessera_cache_miss_total",
            Unit::Count,
            "Cache reads that found nothing"
        );
        describe_counter!(
            "tessera_cache_evict_total",
            Unit::Count,
            "Records removed by lifespan expiry"
        );
        describe_counter!(
            "tessera_chain_error_total",
            Unit::Count,
            "Controller chains that ended in a synthetic error response"
        );
    });
}
