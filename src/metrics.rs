//! Prometheus metrics for the recall engine
//!
//! Exposes:
//! - `recall_indexing_jobs_total` (counter by final status)
//! - `recall_indexing_jobs_inflight` (gauge)
//! - `recall_embeddings_total` (counter by result)
//! - `recall_queries_total` (counter by kind and status)
//! - `recall_query_duration_seconds` (histogram by kind)
//! - process metrics via the `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recall_indexing_jobs_total",
        "Indexing jobs by final status",
        &["status"]
    )
    .expect("failed to register jobs counter")
});

static JOBS_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "recall_indexing_jobs_inflight",
        "Indexing jobs currently running"
    )
    .expect("failed to register inflight gauge")
});

static EMBEDDINGS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recall_embeddings_total",
        "Chunk embeddings by result",
        &["result"]
    )
    .expect("failed to register embeddings counter")
});

static QUERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recall_queries_total",
        "Queries by kind and status",
        &["kind", "status"]
    )
    .expect("failed to register query counter")
});

static QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // Exponential buckets from 10ms up to ~40s.
    let buckets =
        prometheus::exponential_buckets(0.01, 2.0, 12).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "recall_query_duration_seconds",
        "Query handling duration in seconds",
        &["kind"],
        buckets
    )
    .expect("failed to register query duration histogram")
});

fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&JOBS_TOTAL);
    Lazy::force(&JOBS_INFLIGHT);
    Lazy::force(&EMBEDDINGS_TOTAL);
    Lazy::force(&QUERIES_TOTAL);
    Lazy::force(&QUERY_DURATION);
}

pub fn record_job_started() {
    init_collectors();
    JOBS_INFLIGHT.inc();
}

pub fn record_job_finished(status: &str) {
    init_collectors();
    JOBS_INFLIGHT.dec();
    JOBS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_embeddings(completed: u64, failed: u64) {
    init_collectors();
    EMBEDDINGS_TOTAL
        .with_label_values(&["ok"])
        .inc_by(completed);
    EMBEDDINGS_TOTAL.with_label_values(&["error"]).inc_by(failed);
}

pub fn record_query(kind: &'static str, duration: Duration, success: bool) {
    init_collectors();
    QUERY_DURATION
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
    QUERIES_TOTAL
        .with_label_values(&[kind, if success { "ok" } else { "error" }])
        .inc();
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::from("encode error"))
            .unwrap());
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, encoder.format_type())
        .body(Full::from(buffer))
        .unwrap())
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap()),
    }
}

/// Serve `/metrics` on the given address until the process exits.
pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    init_collectors();
    let listener = TcpListener::bind(addr).await?;
    info!("metrics endpoint listening on http://{addr}/metrics");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                warn!("metrics connection error: {err}");
            }
        });
    }
}
