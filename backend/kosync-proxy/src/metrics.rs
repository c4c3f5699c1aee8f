use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "kosync_proxy_http_requests_total",
            "Total HTTP requests handled by kosync-proxy",
        ),
        &["method", "status"],
    )
    .expect("failed to create kosync_proxy_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register kosync_proxy_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "kosync_proxy_http_request_duration_seconds",
            "End-to-end latency of proxied requests, upstream round trip included",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0]),
        &["method"],
    )
    .expect("failed to create kosync_proxy_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register kosync_proxy_http_request_duration_seconds");
    histogram
});

static SYNC_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "kosync_proxy_sync_events_total",
            "Forwarded progress calls by direction and tracking result",
        ),
        &["direction", "result"],
    )
    .expect("failed to create kosync_proxy_sync_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register kosync_proxy_sync_events_total");
    counter
});

static SESSIONS_FLUSHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "kosync_proxy_sessions_flushed_total",
            "Reading sessions closed, by trigger and outcome",
        ),
        &["trigger", "outcome"],
    )
    .expect("failed to create kosync_proxy_sessions_flushed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register kosync_proxy_sessions_flushed_total");
    counter
});

static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "kosync_proxy_active_sessions",
        "Reading sessions currently held in memory",
    )
    .expect("failed to create kosync_proxy_active_sessions");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register kosync_proxy_active_sessions");
    gauge
});

pub fn observe_http_request(method: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method])
        .observe(elapsed.as_secs_f64());
}

pub fn record_sync_event(direction: &str, result: &str) {
    SYNC_EVENTS_TOTAL
        .with_label_values(&[direction, result])
        .inc();
}

pub fn record_session_flush(trigger: &str, outcome: &str) {
    SESSIONS_FLUSHED_TOTAL
        .with_label_values(&[trigger, outcome])
        .inc();
}

pub fn set_active_sessions(count: usize) {
    ACTIVE_SESSIONS.set(count as i64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
