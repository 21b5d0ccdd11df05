use std::net::SocketAddr;

use axum::{
    extract::Path,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use request_metrics::config::AppConfig;
use request_metrics::RequestMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "request_metrics=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting request-metrics demo v{}", env!("CARGO_PKG_VERSION"));

    // Registry doubles as the global recorder so `metrics::counter!` below is scraped too
    let registry = config.metrics.registry()?;
    registry.install_global()?;

    let mut request_metrics = RequestMetrics::new(&registry, &config.metrics.subsystem)?;
    request_metrics.metrics_path = config.metrics.path.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/hello/:name", get(hello))
        .route("/echo", post(echo));

    let app = match config.metrics.accounts()? {
        Some(accounts) => {
            tracing::info!("Scrape endpoint protected by basic auth");
            request_metrics.attach_with_auth(app, accounts)?
        }
        None => request_metrics.attach(app)?,
    };

    let app = app
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn hello(Path(name): Path<String>) -> Json<Value> {
    metrics::counter!("demo_greetings_total").increment(1);
    Json(json!({ "greeting": format!("hello, {}", name) }))
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}
