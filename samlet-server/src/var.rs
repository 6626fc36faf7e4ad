use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec,
};

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Number of HTTP requests received",
        &["method", "path"]
    )
    .unwrap();
    pub static ref HTTP_REQUESTS_DURATION_SECONDS: HistogramVec =
        register_histogram_vec!(
            "http_requests_duration_seconds",
            "HTTP request latency in seconds",
            &["method", "path"]
        )
        .unwrap();
}
