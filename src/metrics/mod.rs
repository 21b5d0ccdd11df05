//! Metrics Registry
//!
//! Wraps a Prometheus recorder so every middleware instance is handed its
//! registry explicitly:
//! - Collector names are claimed once; a second claim is an error
//! - Summaries are exported through `metrics-exporter-prometheus`
//! - The registry can double as the global `metrics` recorder so application
//!   code using `counter!`/`histogram!` shows up on the same scrape endpoint

pub mod http;

use dashmap::DashSet;
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

pub use self::http::{HttpMetrics, RequestSample};

/// Metric names (before the subsystem prefix is applied)
pub mod names {
    pub const REQUESTS_TOTAL: &str = "requests_total";
    pub const REQUEST_DURATION_MICROSECONDS: &str = "request_duration_microseconds";
    pub const REQUEST_SIZE_BYTES: &str = "request_size_bytes";
    pub const RESPONSE_SIZE_BYTES: &str = "response_size_bytes";
}

/// Label keys
pub mod labels {
    pub const CODE: &str = "code";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
}

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Join a subsystem and a metric name the way Prometheus clients do.
pub fn fq_name(subsystem: &str, name: &str) -> String {
    if subsystem.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", subsystem, name)
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

struct Inner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    registered: DashSet<String>,
}

/// Handle to an in-memory Prometheus registry. Clones share state.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
}

impl MetricsRegistry {
    /// Fresh registry with the exporter's default summary quantiles
    pub fn new() -> Self {
        Self::from_builder(PrometheusBuilder::new())
    }

    /// Fresh registry exporting the given summary quantiles
    pub fn with_quantiles(quantiles: &[f64]) -> Result<Self> {
        let builder = PrometheusBuilder::new().set_quantiles(quantiles)?;
        Ok(Self::from_builder(builder))
    }

    fn from_builder(builder: PrometheusBuilder) -> Self {
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        Self {
            inner: Arc::new(Inner {
                recorder,
                handle,
                registered: DashSet::new(),
            }),
        }
    }

    /// Claim a counter family. Labelled series are created on first use via
    /// [`MetricsRegistry::counter`].
    pub fn register_counter(&self, name: &str, help: &str) -> Result<()> {
        self.claim(name)?;
        self.inner
            .recorder
            .describe_counter(KeyName::from(name.to_string()), None, help.to_string().into());
        Ok(())
    }

    /// Claim an unlabelled summary and return its handle.
    pub fn register_summary(&self, name: &str, help: &str) -> Result<Histogram> {
        self.claim(name)?;
        self.inner
            .recorder
            .describe_histogram(KeyName::from(name.to_string()), None, help.to_string().into());
        Ok(self
            .inner
            .recorder
            .register_histogram(&Key::from_name(name.to_string()), &METADATA))
    }

    /// Counter series for a registered family and a set of label values.
    pub fn counter(&self, name: &str, labels: Vec<Label>) -> Counter {
        let key = Key::from_parts(name.to_string(), labels);
        self.inner.recorder.register_counter(&key, &METADATA)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registered.contains(name)
    }

    /// Render every collector in the registry in the text exposition format
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    /// Install this registry as the process-wide `metrics` recorder.
    ///
    /// Series created through the global recorder (`metrics::counter!` and
    /// friends) are not claimed and cannot be rejected: a macro call reusing
    /// a name registered here only logs a warning, and both end up in the
    /// same family on the scrape output.
    pub fn install_global(&self) -> Result<()> {
        metrics::set_global_recorder(self.clone()).map_err(|_| Error::RecorderAlreadyInstalled)?;
        tracing::info!("Metrics registry installed as global recorder");
        Ok(())
    }

    /// True when `key` comes through the recorder interface with a name
    /// claimed by `register_*`.
    fn shadows_claimed(&self, key: &Key) -> bool {
        let shadowed = self.inner.registered.contains(key.name());
        if shadowed {
            tracing::warn!(metric = key.name(), "Recorder series reuses a registered metric name");
        }
        shadowed
    }

    fn claim(&self, name: &str) -> Result<()> {
        if !is_valid_metric_name(name) {
            return Err(Error::InvalidMetricName(name.to_string()));
        }
        if !self.inner.registered.insert(name.to_string()) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        tracing::debug!(metric = name, "Registered metric");
        Ok(())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder for MetricsRegistry {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.inner.recorder.describe_counter(key, unit, description)
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.inner.recorder.describe_gauge(key, unit, description)
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.inner.recorder.describe_histogram(key, unit, description)
    }

    fn register_counter(&self, key: &Key, metadata: &Metadata<'_>) -> Counter {
        self.shadows_claimed(key);
        self.inner.recorder.register_counter(key, metadata)
    }

    fn register_gauge(&self, key: &Key, metadata: &Metadata<'_>) -> Gauge {
        self.shadows_claimed(key);
        self.inner.recorder.register_gauge(key, metadata)
    }

    fn register_histogram(&self, key: &Key, metadata: &Metadata<'_>) -> Histogram {
        self.shadows_claimed(key);
        self.inner.recorder.register_histogram(key, metadata)
    }
}

/// Sum every series of `name` in an exposition dump.
#[cfg(test)]
pub(crate) fn sample_total(exposition: &str, name: &str) -> f64 {
    exposition
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(name)
                .map_or(false, |rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
        .sum()
}

// ============================================================================
// Timer Helper
// ============================================================================

/// Timer for measuring request latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in microseconds
    pub fn elapsed_micros(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000_000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
