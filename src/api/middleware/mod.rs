//! API Middleware
//!
//! Contains middleware for:
//! - HTTP request metrics recording

pub mod metrics;

pub use self::metrics::{track_request, RequestMetrics, DEFAULT_METRICS_PATH};
