use axum::{
    middleware as axum_middleware,
    routing::{get, MethodRouter},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::api::middleware::metrics::{track_request, RequestMetrics};
use crate::auth::basic::{basic_auth_middleware, BasicAuthAccounts};
use crate::error::{Error, Result};

impl RequestMetrics {
    /// Instrument every route of `router` and mount the scrape endpoint at
    /// `metrics_path`.
    ///
    /// Routes added to the returned router afterwards are not instrumented,
    /// so attach last. Fails if `metrics_path` is not a plain static route.
    ///
    /// # Panics
    ///
    /// Panics if `router` already has a route at `metrics_path`.
    pub fn attach<S>(self, router: Router<S>) -> Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        validate_metrics_path(&self.metrics_path)?;
        let exporter = get(handlers::metrics::scrape).with_state(self.registry.clone());
        Ok(self.mount(router, exporter))
    }

    /// Same as [`RequestMetrics::attach`], with the scrape endpoint behind
    /// HTTP Basic Authentication.
    pub fn attach_with_auth<S>(
        self,
        router: Router<S>,
        accounts: BasicAuthAccounts,
    ) -> Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        validate_metrics_path(&self.metrics_path)?;
        let exporter = get(handlers::metrics::scrape)
            .with_state(self.registry.clone())
            .route_layer(axum_middleware::from_fn_with_state(
                Arc::new(accounts),
                basic_auth_middleware,
            ));
        Ok(self.mount(router, exporter))
    }

    fn mount<S>(self, router: Router<S>, exporter: MethodRouter<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        tracing::info!(path = %self.metrics_path, "Metrics endpoint attached");

        let interceptor = self.interceptor();
        router
            .route(&self.metrics_path, exporter)
            .layer(axum_middleware::from_fn_with_state(interceptor, track_request))
    }
}

/// Accepts absolute paths without captures or wildcards, e.g. `/metrics`.
pub fn validate_metrics_path(path: &str) -> Result<()> {
    let valid = path.starts_with('/')
        && path
            .split('/')
            .skip(1)
            .all(|segment| !segment.starts_with(':') && !segment.starts_with('*'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidMetricsPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{sample_total, MetricsRegistry};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
        routing::post,
    };
    use axum_extra::headers::{Authorization, HeaderMapExt};
    use tower::ServiceExt;

    const SUBSYSTEM: &str = "test";

    fn app() -> Router {
        Router::new()
            .route("/hello", get(|| async { "hello" }))
            .route("/echo", post(|body: String| async move { body }))
            .route(
                "/stream",
                get(|| async {
                    let chunks = vec![Ok::<_, std::io::Error>("hello "), Ok("world")];
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            )
    }

    /// Run a request and read its body, so the request is fully recorded.
    async fn send(router: &Router, request: Request<Body>) -> Response {
        let response = router.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        Response::from_parts(parts, Body::from(bytes))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn scrape_request(uri: &str, credentials: Option<(&str, &str)>) -> Request<Body> {
        let mut request = get_request(uri);
        if let Some((user, password)) = credentials {
            request
                .headers_mut()
                .typed_insert(Authorization::basic(user, password));
        }
        request
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn instrumented() -> (MetricsRegistry, Router) {
        let registry = MetricsRegistry::new();
        let metrics = RequestMetrics::new(&registry, SUBSYSTEM).unwrap();
        let router = metrics.attach(app()).unwrap();
        (registry, router)
    }

    #[tokio::test]
    async fn test_counter_total_matches_requests() {
        let (registry, router) = instrumented();

        for _ in 0..5 {
            let response = send(&router, get_request("/hello")).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = send(&router, get_request("/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        send(&router, get_request("/nope")).await;

        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 7.0);
        assert_eq!(sample_total(&out, "test_request_duration_microseconds_count"), 7.0);
        assert_eq!(sample_total(&out, "test_request_size_bytes_count"), 7.0);
        assert_eq!(sample_total(&out, "test_response_size_bytes_count"), 7.0);
        assert!(out.contains("code=\"404\""));
        assert!(out.contains("path=\"/nope\""));
    }

    #[tokio::test]
    async fn test_scrape_path_not_instrumented() {
        let (registry, router) = instrumented();

        send(&router, get_request("/hello")).await;
        for _ in 0..3 {
            let response = send(&router, get_request("/metrics")).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()[header::CONTENT_TYPE],
                handlers::metrics::EXPOSITION_CONTENT_TYPE
            );
        }

        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 1.0);
        assert_eq!(sample_total(&out, "test_request_size_bytes_count"), 1.0);
        assert!(!out.contains("path=\"/metrics\""));
    }

    #[tokio::test]
    async fn test_sizes_recorded() {
        let (registry, router) = instrumented();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(header::HOST, "localhost")
            .header(header::CONTENT_LENGTH, "4")
            .body(Body::from("abcd"))
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(body_string(response).await, "abcd");

        let expected_request = "/echo".len()
            + "POST".len()
            + "HTTP/1.1".len()
            + "content-length".len()
            + "4".len()
            + "localhost".len()
            + 4;

        let out = registry.render();
        assert_eq!(
            sample_total(&out, "test_request_size_bytes_sum"),
            expected_request as f64
        );
        assert_eq!(sample_total(&out, "test_response_size_bytes_sum"), 4.0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_all_counted() {
        let (registry, router) = instrumented();

        let requests = (0..100).map(|i| {
            let router = router.clone();
            let uri = if i % 2 == 0 { "/hello" } else { "/missing" };
            tokio::spawn(async move { router.oneshot(get_request(uri)).await.unwrap() })
        });
        for result in futures::future::join_all(requests).await {
            result.unwrap();
        }

        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 100.0);
        assert_eq!(sample_total(&out, "test_request_duration_microseconds_count"), 100.0);
        assert_eq!(sample_total(&out, "test_request_size_bytes_count"), 100.0);
        assert_eq!(sample_total(&out, "test_response_size_bytes_count"), 100.0);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let registry = MetricsRegistry::new();
        let mut metrics = RequestMetrics::new(&registry, SUBSYSTEM).unwrap();
        metrics.metrics_path = "/internal/prometheus".to_string();
        let router = metrics.attach(app()).unwrap();

        let response = send(&router, get_request("/internal/prometheus")).await;
        assert_eq!(response.status(), StatusCode::OK);

        // The default path is an ordinary (unknown) route now
        let response = send(&router, get_request("/metrics")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 1.0);
        assert!(out.contains("path=\"/metrics\""));
        assert!(!out.contains("path=\"/internal/prometheus\""));
    }

    #[tokio::test]
    async fn test_scrape_with_basic_auth() {
        let registry = MetricsRegistry::new();
        let metrics = RequestMetrics::new(&registry, SUBSYSTEM).unwrap();
        let accounts = BasicAuthAccounts::new([("prom", "scrape")]).unwrap();
        let router = metrics.attach_with_auth(app(), accounts).unwrap();

        send(&router, get_request("/hello")).await;
        let before = registry.render();

        let response = send(&router, scrape_request("/metrics", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            crate::auth::basic::REALM_CHALLENGE
        );

        let response = send(&router, scrape_request("/metrics", Some(("prom", "wrong")))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let after = registry.render();
        for name in [
            "test_requests_total",
            "test_request_duration_microseconds_count",
            "test_request_size_bytes_count",
            "test_response_size_bytes_count",
        ] {
            assert_eq!(sample_total(&before, name), sample_total(&after, name));
        }

        let response = send(&router, scrape_request("/metrics", Some(("prom", "scrape")))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("# TYPE test_requests_total counter"));
        assert!(body.contains("# TYPE test_request_duration_microseconds summary"));
        assert!(body.contains("# TYPE test_request_size_bytes summary"));
        assert!(body.contains("# TYPE test_response_size_bytes summary"));
        assert_eq!(sample_total(&body, "test_requests_total"), 1.0);
    }

    #[tokio::test]
    async fn test_auth_does_not_gate_other_routes() {
        let registry = MetricsRegistry::new();
        let metrics = RequestMetrics::new(&registry, SUBSYSTEM).unwrap();
        let accounts = BasicAuthAccounts::new([("prom", "scrape")]).unwrap();
        let router = metrics.attach_with_auth(app(), accounts).unwrap();

        let response = send(&router, get_request("/hello")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_scrape_includes_other_collectors() {
        let (registry, router) = instrumented();
        registry.register_counter("jobs_total", "Jobs processed.").unwrap();
        registry.counter("jobs_total", Vec::new()).increment(2);

        let body = body_string(send(&router, get_request("/metrics")).await).await;
        assert_eq!(sample_total(&body, "jobs_total"), 2.0);
    }

    #[tokio::test]
    async fn test_two_subsystems_share_registry() {
        let registry = MetricsRegistry::new();
        let public = RequestMetrics::new(&registry, "public").unwrap();
        let admin = RequestMetrics::new(&registry, "admin").unwrap();
        assert!(RequestMetrics::new(&registry, "admin").is_err());

        let public_router = public.attach(app()).unwrap();
        let mut admin = admin;
        admin.metrics_path = "/admin/metrics".to_string();
        let admin_router = admin.attach(app()).unwrap();

        send(&public_router, get_request("/hello")).await;
        send(&admin_router, get_request("/hello")).await;
        send(&admin_router, get_request("/hello")).await;

        let out = registry.render();
        assert_eq!(sample_total(&out, "public_requests_total"), 1.0);
        assert_eq!(sample_total(&out, "admin_requests_total"), 2.0);
    }

    #[tokio::test]
    async fn test_streamed_response_size() {
        let (registry, router) = instrumented();

        let response = router
            .clone()
            .oneshot(get_request("/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Nothing is recorded until the body has been written out
        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 0.0);

        assert_eq!(body_string(response).await, "hello world");

        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 1.0);
        assert_eq!(sample_total(&out, "test_response_size_bytes_count"), 1.0);
        assert_eq!(sample_total(&out, "test_response_size_bytes_sum"), 11.0);
    }

    #[tokio::test]
    async fn test_dropped_response_still_recorded() {
        let (registry, router) = instrumented();

        let response = router
            .clone()
            .oneshot(get_request("/stream"))
            .await
            .unwrap();
        drop(response);

        let out = registry.render();
        assert_eq!(sample_total(&out, "test_requests_total"), 1.0);
        assert_eq!(sample_total(&out, "test_response_size_bytes_sum"), 0.0);
    }

    #[test]
    fn test_metrics_path_validation() {
        assert!(validate_metrics_path("/metrics").is_ok());
        assert!(validate_metrics_path("/internal/prometheus").is_ok());
        assert!(validate_metrics_path("/").is_ok());
        assert!(matches!(
            validate_metrics_path("metrics"),
            Err(Error::InvalidMetricsPath(_))
        ));
        assert!(validate_metrics_path("").is_err());
        assert!(validate_metrics_path("/metrics/:job").is_err());
        assert!(validate_metrics_path("/*rest").is_err());
    }

    #[test]
    fn test_attach_rejects_relative_path() {
        let registry = MetricsRegistry::new();
        let mut metrics = RequestMetrics::new(&registry, SUBSYSTEM).unwrap();
        metrics.metrics_path = "metrics".to_string();

        assert!(matches!(
            metrics.attach(app()),
            Err(Error::InvalidMetricsPath(path)) if path == "metrics"
        ));
    }
}
