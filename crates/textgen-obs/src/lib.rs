//! Observability utilities: generation metrics and tracing setup

use once_cell::sync::Lazy;
use opentelemetry_otlp::WithExportConfig;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("textgen_requests_total", "Requests by route", &["route"]).expect("requests counter")
});
static GENERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("textgen_generations_total", "Finished generations by outcome", &["outcome"])
        .expect("generations counter")
});
static TOKENS_GENERATED: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("textgen_tokens_generated_total", "New tokens produced").expect("tokens counter")
});
static GENERATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    prometheus::register_histogram!("textgen_generation_seconds", "Wall time per generation").expect("generation histogram")
});
static SLOT_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    prometheus::register_histogram!("textgen_slot_wait_seconds", "Time spent waiting for the generation slot")
        .expect("slot wait histogram")
});
static STOP_STRING_HITS: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("textgen_stop_string_hits_total", "Generations halted by a stop string")
        .expect("stop string counter")
});
static CANCELLATIONS: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("textgen_cancellations_total", "Generations halted by the stop flag")
        .expect("cancellation counter")
});

pub fn init() {
    // Touch statics so every series shows up in /metrics before first use.
    let _ = &*REQUESTS;
    let _ = &*GENERATIONS;
    let _ = &*TOKENS_GENERATED;
    let _ = &*GENERATION_SECONDS;
    let _ = &*SLOT_WAIT_SECONDS;
    let _ = &*STOP_STRING_HITS;
    let _ = &*CANCELLATIONS;
}

pub fn record_request(route: &str) { REQUESTS.with_label_values(&[route]).inc(); }

pub fn record_generation(seconds: f64, new_tokens: usize, failed: bool) {
    let outcome = if failed { "failed" } else { "ok" };
    GENERATIONS.with_label_values(&[outcome]).inc();
    TOKENS_GENERATED.inc_by(new_tokens as u64);
    GENERATION_SECONDS.observe(seconds);
}

pub fn observe_slot_wait(seconds: f64) { SLOT_WAIT_SECONDS.observe(seconds); }

pub fn record_stop_string_hit() { STOP_STRING_HITS.inc(); }

pub fn record_cancellation() { CANCELLATIONS.inc(); }

/// Text exposition of every registered metric.
pub fn gather_text() -> Vec<u8> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(target: "obs", "failed to encode metrics: {}", e);
    }
    buffer
}

pub fn content_type() -> String { prometheus::TextEncoder::new().format_type().to_string() }

/// Installs the global subscriber: `RUST_LOG` filter, fmt output, and an
/// OTLP exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init();
            return;
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Flushes pending spans before exit.
pub fn shutdown_tracing() { opentelemetry::global::shutdown_tracer_provider(); }
