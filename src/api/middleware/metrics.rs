//! HTTP Metrics Middleware
//!
//! Records Prometheus metrics for every request that passes through the
//! router:
//! - Request count by status code, method and raw path
//! - Request latency summary (microseconds)
//! - Approximate request size and response size summaries
//!
//! Requests to the scrape path are passed through untouched. Latency is taken
//! when the handler chain returns; the observations are recorded once the
//! response body has been written out (or dropped), so the response size is
//! the number of body bytes actually produced.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::State,
    http::{header, HeaderMap, Request, Version},
    middleware::Next,
    response::Response,
};
use http_body::{Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::metrics::{HttpMetrics, MetricsRegistry, RequestSample, Timer};

pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Request metrics for one subsystem, ready to be attached to a router.
///
/// `metrics_path` may be changed freely until the value is consumed by
/// [`RequestMetrics::attach`] or [`RequestMetrics::attach_with_auth`].
pub struct RequestMetrics {
    pub metrics_path: String,
    pub(crate) registry: MetricsRegistry,
    pub(crate) http: Arc<HttpMetrics>,
}

impl RequestMetrics {
    /// Register the request collectors for `subsystem` in `registry`.
    ///
    /// Fails if the subsystem's metric names are already registered there;
    /// callers are expected to abort startup on error.
    pub fn new(registry: &MetricsRegistry, subsystem: &str) -> Result<Self> {
        let http = HttpMetrics::register(registry, subsystem)?;
        Ok(Self {
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            registry: registry.clone(),
            http: Arc::new(http),
        })
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub(crate) fn interceptor(&self) -> Interceptor {
        Interceptor {
            metrics: self.http.clone(),
            metrics_path: Arc::from(self.metrics_path.as_str()),
        }
    }
}

/// Per-router state of [`track_request`]
#[derive(Clone)]
pub struct Interceptor {
    metrics: Arc<HttpMetrics>,
    metrics_path: Arc<str>,
}

/// Middleware to record HTTP metrics for each request
pub async fn track_request(
    State(interceptor): State<Interceptor>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == *interceptor.metrics_path {
        return next.run(request).await;
    }

    let timer = Timer::new();
    let method = request.method().clone();
    let request_size = approximate_request_size(&request);

    let response = next.run(request).await;

    let sample = RequestSample {
        status: response.status(),
        method,
        path,
        elapsed_micros: timer.elapsed_micros(),
        request_size,
        response_size: 0,
    };

    let (parts, body) = response.into_parts();
    let body = CountingBody {
        inner: body,
        written: 0,
        pending: Some(PendingSample {
            metrics: interceptor.metrics.clone(),
            sample,
        }),
    };
    Response::from_parts(parts, Body::new(body))
}

struct PendingSample {
    metrics: Arc<HttpMetrics>,
    sample: RequestSample,
}

/// Response body that counts data bytes and records the request's sample
/// exactly once, at end of stream or on drop.
struct CountingBody {
    inner: Body,
    written: u64,
    pending: Option<PendingSample>,
}

impl CountingBody {
    fn finish(&mut self) {
        let Some(PendingSample { metrics, mut sample }) = self.pending.take() else {
            return;
        };
        sample.response_size = self.written;
        tracing::trace!(
            status = sample.status.as_u16(),
            method = %sample.method,
            path = %sample.path,
            elapsed_us = sample.elapsed_micros,
            response_size = sample.response_size,
            "Recorded request"
        );
        metrics.observe(&sample);
    }
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, axum::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.written += data.len() as u64;
                }
            }
            Poll::Ready(None) => this.finish(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CountingBody {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Approximate wire size of a request head plus its declared body length.
///
/// Counts the request target, method, protocol, each distinct header name
/// once with all of its values, and the host. `Host` is counted as the host
/// field only, not again as a header.
pub fn approximate_request_size<B>(request: &Request<B>) -> u64 {
    let headers = request.headers();

    let mut size = request.uri().to_string().len();
    size += request.method().as_str().len();
    size += protocol(request.version()).len();

    for name in headers.keys() {
        if name == header::HOST {
            continue;
        }
        size += name.as_str().len();
        size += headers.get_all(name).iter().map(|v| v.len()).sum::<usize>();
    }

    size += host(request).len();

    size as u64 + declared_content_length(headers).unwrap_or(0)
}

/// `None` when the length is unknown
pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn protocol(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "",
    }
}

fn host<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or("")
}
