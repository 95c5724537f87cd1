//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::client::TimeSeriesSource;
use crate::exposition::{CONTENT_TYPE, render};
use crate::registry::SharedRegistry;
use crate::scraper::ScrapeContext;

/// Header Prometheus uses to announce its scrape timeout.
const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Per-request scrape parameters.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Upper bound for one scrape.
    pub timeout: Duration,
    /// Cluster scope passed to every module.
    pub scope: Option<String>,
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
    source: Arc<dyn TimeSeriesSource>,
    settings: ScrapeSettings,
}

/// Create the HTTP router.
fn create_router(
    registry: SharedRegistry,
    source: Arc<dyn TimeSeriesSource>,
    settings: ScrapeSettings,
    metrics_path: &str,
) -> Router {
    let state = AppState {
        registry,
        source,
        settings,
    };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Scrape deadline: the configured timeout, shortened if Prometheus asks.
fn scrape_timeout(headers: &HeaderMap, configured: Duration) -> Duration {
    headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| Duration::from_secs_f64(secs.min(configured.as_secs_f64())))
        .unwrap_or(configured)
}

/// Handler for the metrics endpoint: runs one scrape and renders it.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let timeout = scrape_timeout(&headers, state.settings.timeout);
    let cancel = CancellationToken::new();

    // Cancels the scrape if the client goes away before it finishes.
    let _guard = cancel.clone().drop_guard();
    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(timeout_ms = timeout.as_millis() as u64, "Scrape deadline reached");
            cancel.cancel();
        })
    };

    let ctx = ScrapeContext::new(cancel, state.settings.scope.clone());
    let report = state.registry.scrape(&ctx, state.source.clone()).await;
    deadline.abort();

    let body = render(state.registry.describe(), &report.samples);

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    let stats = state.registry.stats();

    if stats.scrapes == 0 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no scrape performed yet\n",
        )
            .into_response()
    } else if !stats.has_succeeded {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no query has succeeded yet\n",
        )
            .into_response()
    } else {
        (StatusCode::OK, "ready\n").into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    registry: SharedRegistry,
    source: Arc<dyn TimeSeriesSource>,
    settings: ScrapeSettings,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        registry: SharedRegistry,
        source: Arc<dyn TimeSeriesSource>,
        settings: ScrapeSettings,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            registry,
            source,
            settings,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(
            self.registry,
            self.source,
            self.settings,
            &self.metrics_path,
        );

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FetchError, TimeSeriesQuery};
    use crate::config::ExporterConfig;
    use crate::registry::ModuleRegistry;
    use crate::timeseries::TimeSeriesResponse;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    struct FixedSource {
        body: Option<&'static str>,
    }

    #[async_trait]
    impl TimeSeriesSource for FixedSource {
        async fn fetch(
            &self,
            _cancel: &CancellationToken,
            _query: &TimeSeriesQuery<'_>,
        ) -> Result<TimeSeriesResponse, FetchError> {
            match self.body {
                Some(body) => serde_json::from_str(body)
                    .map_err(|e| FetchError::MalformedResponse(e.to_string())),
                None => Err(FetchError::Upstream { status: 503 }),
            }
        }
    }

    /// Answers with `BODY` while `up` is set, fails otherwise.
    struct FlakySource {
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TimeSeriesSource for FlakySource {
        async fn fetch(
            &self,
            _cancel: &CancellationToken,
            _query: &TimeSeriesQuery<'_>,
        ) -> Result<TimeSeriesResponse, FetchError> {
            if self.up.load(Ordering::SeqCst) {
                serde_json::from_str(BODY).map_err(|e| FetchError::MalformedResponse(e.to_string()))
            } else {
                Err(FetchError::Upstream { status: 503 })
            }
        }
    }

    const BODY: &str = r#"{"items":[{"timeSeries":[{"metadata":{"attributes":{"clusterName":"c1","entityName":"zookeeper"}},"data":[{"value":7.0}]}]}]}"#;

    fn make_router(body: Option<&'static str>, path: &str) -> Router {
        let registry = Arc::new(ModuleRegistry::from_config(&ExporterConfig::default()).unwrap());
        let settings = ScrapeSettings {
            timeout: Duration::from_secs(5),
            scope: None,
        };
        create_router(registry, Arc::new(FixedSource { body }), settings, path)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_scrape_timeout_header() {
        let configured = Duration::from_secs(30);

        let mut headers = HeaderMap::new();
        assert_eq!(scrape_timeout(&headers, configured), configured);

        headers.insert(SCRAPE_TIMEOUT_HEADER, "10".parse().unwrap());
        assert_eq!(scrape_timeout(&headers, configured), Duration::from_secs(10));

        headers.insert(SCRAPE_TIMEOUT_HEADER, "120".parse().unwrap());
        assert_eq!(scrape_timeout(&headers, configured), configured);

        headers.insert(SCRAPE_TIMEOUT_HEADER, "garbage".parse().unwrap());
        assert_eq!(scrape_timeout(&headers, configured), configured);

        headers.insert(SCRAPE_TIMEOUT_HEADER, "1e300".parse().unwrap());
        assert_eq!(scrape_timeout(&headers, configured), configured);

        headers.insert(SCRAPE_TIMEOUT_HEADER, "-5".parse().unwrap());
        assert_eq!(scrape_timeout(&headers, configured), configured);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = make_router(Some(BODY), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = body_text(response).await;
        assert!(body.contains(
            "cloudera_zookeeper_current_xid{cluster=\"c1\",entityName=\"zookeeper\"} 7"
        ));
        assert!(body.contains("cloudera_zookeeper_alerts_rate_across_servers 7"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_upstream_down_still_ok() {
        let router = make_router(None, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(!body.contains("cloudera_zookeeper_current_xid"));
        assert!(body.contains("cloudera_exporter_queries_failed{module=\"zookeeper\"} 14"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = make_router(None, "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let router = make_router(Some(BODY), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready_after_scrape() {
        let router = make_router(Some(BODY), "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_stays_ready_after_failed_scrape() {
        let up = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(ModuleRegistry::from_config(&ExporterConfig::default()).unwrap());
        let settings = ScrapeSettings {
            timeout: Duration::from_secs(5),
            scope: None,
        };
        let router = create_router(
            registry,
            Arc::new(FlakySource { up: up.clone() }),
            settings,
            "/metrics",
        );

        let get = |uri: &'static str| {
            let router = router.clone();
            async move {
                router
                    .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                    .await
                    .unwrap()
                    .status()
            }
        };

        // Upstream down from the start: scraped, but never ready
        assert_eq!(get("/metrics").await, StatusCode::OK);
        assert_eq!(get("/ready").await, StatusCode::SERVICE_UNAVAILABLE);

        up.store(true, Ordering::SeqCst);
        assert_eq!(get("/metrics").await, StatusCode::OK);
        assert_eq!(get("/ready").await, StatusCode::OK);

        // Upstream goes away again: readiness is kept
        up.store(false, Ordering::SeqCst);
        assert_eq!(get("/metrics").await, StatusCode::OK);
        assert_eq!(get("/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = make_router(Some(BODY), "/cm/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/cm/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
