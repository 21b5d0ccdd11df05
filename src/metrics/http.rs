use axum::http::{Method, StatusCode};
use metrics::{Histogram, Label};

use super::{fq_name, labels, names, MetricsRegistry};
use crate::error::Result;

const REQUESTS_TOTAL_HELP: &str =
    "How many HTTP requests processed, partitioned by status code, HTTP method and path.";
const REQUEST_DURATION_HELP: &str = "The HTTP request latencies in microseconds.";
const REQUEST_SIZE_HELP: &str = "The HTTP request sizes in bytes.";
const RESPONSE_SIZE_HELP: &str = "The HTTP response sizes in bytes.";

/// One completed request, as seen by the interceptor
#[derive(Debug, Clone)]
pub struct RequestSample {
    pub status: StatusCode,
    pub method: Method,
    pub path: String,
    pub elapsed_micros: f64,
    pub request_size: u64,
    pub response_size: u64,
}

/// The four HTTP collectors of one subsystem
pub struct HttpMetrics {
    registry: MetricsRegistry,
    requests_total: String,
    request_duration: Histogram,
    request_size: Histogram,
    response_size: Histogram,
}

impl HttpMetrics {
    /// Register `<subsystem>_requests_total` and the three summaries.
    ///
    /// Fails if any of the names is already taken in `registry`.
    pub fn register(registry: &MetricsRegistry, subsystem: &str) -> Result<Self> {
        let requests_total = fq_name(subsystem, names::REQUESTS_TOTAL);
        registry.register_counter(&requests_total, REQUESTS_TOTAL_HELP)?;

        let request_duration = registry.register_summary(
            &fq_name(subsystem, names::REQUEST_DURATION_MICROSECONDS),
            REQUEST_DURATION_HELP,
        )?;
        let request_size = registry.register_summary(
            &fq_name(subsystem, names::REQUEST_SIZE_BYTES),
            REQUEST_SIZE_HELP,
        )?;
        let response_size = registry.register_summary(
            &fq_name(subsystem, names::RESPONSE_SIZE_BYTES),
            RESPONSE_SIZE_HELP,
        )?;

        tracing::info!(subsystem, "HTTP request metrics registered");

        Ok(Self {
            registry: registry.clone(),
            requests_total,
            request_duration,
            request_size,
            response_size,
        })
    }

    /// Record all four observations for a single request
    pub fn observe(&self, sample: &RequestSample) {
        self.request_duration.record(sample.elapsed_micros);
        self.request_size.record(sample.request_size as f64);
        self.response_size.record(sample.response_size as f64);

        self.registry
            .counter(
                &self.requests_total,
                vec![
                    Label::new(labels::CODE, sample.status.as_u16().to_string()),
                    Label::new(labels::METHOD, sample.method.as_str().to_string()),
                    Label::new(labels::PATH, sample.path.clone()),
                ],
            )
            .increment(1);
    }

    pub fn requests_total_name(&self) -> &str {
        &self.requests_total
    }
}
