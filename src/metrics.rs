//! Process-wide Prometheus counters shared by every engine instance.

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::alert::AlertCode;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static BATCHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("cdc_batches_total", "Batches processed successfully")
        .expect("valid metric definition");
    register(Box::new(c.clone()));
    c
});

pub static ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("cdc_alerts_total", "Alerts raised, by code"),
        &["code"],
    )
    .expect("valid metric definition");
    register(Box::new(c.clone()));
    c
});

pub static FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("cdc_failures_total", "Batches rejected, by failure kind"),
        &["kind"],
    )
    .expect("valid metric definition");
    register(Box::new(c.clone()));
    c
});

pub static NOTIFY_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "cdc_notify_failures_total",
        "Alerts a listener failed to accept",
    )
    .expect("valid metric definition");
    register(Box::new(c.clone()));
    c
});

/// Add a collector to [`REGISTRY`]. A collector that cannot be registered
/// keeps counting but is missing from [`gather_text`].
fn register(collector: Box<dyn Collector>) -> bool {
    match REGISTRY.register(collector) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Unable to register metric");
            false
        }
    }
}

pub(crate) fn record_batch(code: AlertCode) {
    BATCHES_TOTAL.inc();
    if code != AlertCode::None {
        ALERTS_TOTAL.with_label_values(&[code.name()]).inc();
    }
}

pub(crate) fn record_failure(kind: &str) {
    FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub(crate) fn record_notify_failure() {
    NOTIFY_FAILURES_TOTAL.inc();
}

/// Render all counters in the Prometheus text format.
pub fn gather_text() -> String {
    let _ = &*BATCHES_TOTAL;
    let _ = &*ALERTS_TOTAL;
    let _ = &*FAILURES_TOTAL;
    let _ = &*NOTIFY_FAILURES_TOTAL;

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!(error = %e, "Unable to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
