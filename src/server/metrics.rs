use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all catalog sync metrics
const PREFIX: &str = "catalog_sync";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of admin HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "Admin HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Upstream Fetch Metrics
    pub static ref UPSTREAM_FETCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upstream_fetches_total"), "Upstream requests by outcome"),
        &["outcome"]
    ).expect("Failed to create upstream_fetches_total metric");

    pub static ref UPSTREAM_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upstream_retries_total"), "Upstream request retries by error class"),
        &["error"]
    ).expect("Failed to create upstream_retries_total metric");

    // Sync Metrics
    pub static ref SYNC_ITEMS_PERSISTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_items_persisted_total"), "Rows inserted by sync tasks"),
        &["task"]
    ).expect("Failed to create items_persisted_total metric");

    pub static ref SYNC_PARTITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_partitions_total"), "Sync partitions by outcome"),
        &["task", "outcome"]
    ).expect("Failed to create partitions_total metric");

    // Catalog Metrics
    pub static ref CATALOG_ITEMS_TOTAL: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_items_total"), "Total items in catalog"),
        &["type"]
    ).expect("Failed to create catalog_items_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions by status"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_QUEUE_DEPTH: IntGauge = IntGauge::new(
        format!("{PREFIX}_background_job_queue_depth"),
        "Jobs waiting for a free worker slot"
    ).expect("Failed to create background_job_queue_depth metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_FETCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPSTREAM_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_ITEMS_PERSISTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_PARTITIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Set catalog size gauges
pub fn set_catalog_counts(bands: usize, albums: usize, tracks: usize, upcoming: usize) {
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["band"])
        .set(bands as f64);
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["album"])
        .set(albums as f64);
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["track"])
        .set(tracks as f64);
    CATALOG_ITEMS_TOTAL
        .with_label_values(&["upcoming_release"])
        .set(upcoming as f64);
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record one upstream request; `None` means it succeeded.
pub fn record_fetch(error_kind: Option<&str>) {
    UPSTREAM_FETCHES_TOTAL
        .with_label_values(&[error_kind.unwrap_or("ok")])
        .inc();
}

pub fn record_retry(error_kind: &str) {
    UPSTREAM_RETRIES_TOTAL.with_label_values(&[error_kind]).inc();
}

pub fn record_items_persisted(task: &str, count: usize) {
    SYNC_ITEMS_PERSISTED_TOTAL
        .with_label_values(&[task])
        .inc_by(count as f64);
}

/// Outcome is `done` or `skipped`
pub fn record_partition(task: &str, outcome: &str) {
    SYNC_PARTITIONS_TOTAL
        .with_label_values(&[task, outcome])
        .inc();
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_queue_depth(depth: usize) {
    BACKGROUND_JOB_QUEUE_DEPTH.set(depth as i64);
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_exists(name: &str) -> bool {
        REGISTRY
            .gather()
            .iter()
            .any(|m| m.get_name() == format!("{PREFIX}_{name}"))
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_fetch_and_retry() {
        init_metrics();

        record_fetch(None);
        record_fetch(Some("rate_limited"));
        record_retry("rate_limited");

        assert!(metric_exists("upstream_fetches_total"));
        assert!(metric_exists("upstream_retries_total"));
        assert!(
            UPSTREAM_RETRIES_TOTAL
                .with_label_values(&["rate_limited"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_background_job_metrics() {
        init_metrics();

        set_background_job_running("band_catalog_sync", true);
        record_background_job_execution("band_catalog_sync", "success", Duration::from_secs(3));
        set_background_job_running("band_catalog_sync", false);

        assert!(metric_exists("background_job_executions_total"));
        assert_eq!(
            BACKGROUND_JOB_RUNNING
                .with_label_values(&["band_catalog_sync"])
                .get(),
            0.0
        );
    }

    #[test]
    fn test_catalog_counts() {
        init_metrics();

        set_catalog_counts(10, 20, 200, 3);
        assert!(metric_exists("catalog_items_total"));
        assert_eq!(CATALOG_ITEMS_TOTAL.with_label_values(&["track"]).get(), 200.0);
    }
}
