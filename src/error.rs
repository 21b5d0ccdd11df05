use metrics_exporter_prometheus::BuildError;

/// Errors raised while wiring request metrics into a router.
///
/// All of these surface at construction time; the request path itself never
/// fails.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Metric already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid metric name: {0:?}")]
    InvalidMetricName(String),

    #[error("Invalid metrics path: {0:?}")]
    InvalidMetricsPath(String),

    #[error("Basic auth account with empty username")]
    EmptyUsername,

    #[error("A global metrics recorder is already installed")]
    RecorderAlreadyInstalled,

    #[error("Exporter configuration error: {0}")]
    Exporter(#[from] BuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
