use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref EVENTS_APPLIED: IntCounterVec = IntCounterVec::new(
        Opts::new("bind_events_applied", "Events run through a binding's decode pipeline"),
        &["binding"]
    )
    .expect("metric can not be created");

    pub static ref DECODE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("bind_decode_failures", "Events whose pipeline stopped on a decode failure"),
        &["binding"]
    )
    .expect("metric can not be created");

    pub static ref DELETED_KEYS: IntCounterVec = IntCounterVec::new(
        Opts::new("bind_deleted_keys", "Entries removed from result collections"),
        &["binding"]
    )
    .expect("metric can not be created");

    pub static ref LOOP_TERMINATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("bind_loop_terminations", "Watch loops stopped, by reason"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref FIELD_CHANGES: IntCounter =
        IntCounter::new("bind_field_changes", "Differing leaves reported by field diffs")
            .expect("metric can not be created");

    pub static ref ACTIVE_BINDINGS: IntGauge =
        IntGauge::new("bind_active_bindings", "Watch loops currently running")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers the crate's collectors with [`REGISTRY`]; idempotent.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(EVENTS_APPLIED.clone()),
            Box::new(DECODE_FAILURES.clone()),
            Box::new(DELETED_KEYS.clone()),
            Box::new(LOOP_TERMINATIONS.clone()),
            Box::new(FIELD_CHANGES.clone()),
            Box::new(ACTIVE_BINDINGS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                error!("collector can not be registered: {}", e);
            }
        }
    });
}

/// Export metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;

    register_custom_metrics();
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}
