//! Prometheus request metrics for axum routers.
//!
//! ```no_run
//! use axum::{routing::get, Router};
//! use request_metrics::{MetricsRegistry, RequestMetrics};
//!
//! # fn build() -> request_metrics::Result<Router> {
//! let registry = MetricsRegistry::new();
//! let metrics = RequestMetrics::new(&registry, "api")?;
//! let app = metrics.attach(Router::new().route("/", get(|| async { "ok" })))?;
//! # Ok(app)
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

pub use api::middleware::{RequestMetrics, DEFAULT_METRICS_PATH};
pub use auth::BasicAuthAccounts;
pub use error::{Error, Result};
pub use crate::metrics::MetricsRegistry;
