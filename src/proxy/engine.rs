// src/proxy/engine.rs
use super::error::ProxyError;
use crate::balancer::SelectionStrategy;
use crate::metrics::MetricsCollector;
use crate::registry::{BackendRecord, ServerRegistry};
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tunables the slowness-detection policy (folded into
/// [`BackendRecord::record_latency`]) needs on every sample.
#[derive(Debug, Clone, Copy)]
pub struct SlownessPolicy {
    pub slow_threshold_ms: i64,
    pub window_size: usize,
    pub threshold_ratio: f64,
}

/// Component H: selects a backend, proxies one request end-to-end,
/// classifies the outcome, and retries on transport failure.
pub struct ForwardingEngine {
    registry: Arc<ServerRegistry>,
    strategy: Arc<dyn SelectionStrategy>,
    client: reqwest::Client,
    request_timeout: Duration,
    cooldown: Duration,
    slowness: SlownessPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ForwardingEngine {
    pub fn new(
        registry: Arc<ServerRegistry>,
        strategy: Arc<dyn SelectionStrategy>,
        request_timeout: Duration,
        cooldown: Duration,
        slowness: SlownessPolicy,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to build forwarding HTTP client");
        Self {
            registry,
            strategy,
            client,
            request_timeout,
            cooldown,
            slowness,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn forward(&self, req: Request<Body>) -> Response<Body> {
        match self.try_forward(req).await {
            Ok(response) => response,
            Err(err) => err.into(),
        }
    }

    async fn try_forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let body_bytes = hyper::body::to_bytes(body)
            .await
            .unwrap_or_default();

        // Captured once: bounds the retry loop by the snapshot observed at
        // the top of this call, per SPEC_FULL §9 open question 4.
        let snapshot = self.registry.healthy_snapshot(self.cooldown).await;

        let mut attempt = 0usize;
        loop {
            if attempt >= snapshot.len() {
                self.record_outcome("unrouted", "no_route", Duration::ZERO);
                return Err(ProxyError::NoRouteAvailable);
            }

            let chosen = match self.strategy.select(&snapshot).await {
                Some(chosen) => chosen,
                None => {
                    self.record_outcome("unrouted", "no_route", Duration::ZERO);
                    return Err(ProxyError::NoHealthyAvailable);
                }
            };

            let target = build_target_url(&chosen.url, &parts.uri);

            let outbound = self
                .client
                .request(parts.method.clone(), &target)
                .headers(parts.headers.clone())
                .body(body_bytes.clone());

            let t0 = Instant::now();
            match outbound.send().await {
                Ok(response) => {
                    let dt = t0.elapsed();
                    return self.handle_response(&chosen, response, dt).await;
                }
                Err(e) => {
                    let dt = t0.elapsed();
                    warn!(url = %chosen.url, error = %e, elapsed_ms = dt.as_millis(), "transport error forwarding request, marking unhealthy and retrying");
                    self.registry.mark_unhealthy(&chosen.url, &e.to_string()).await;
                    self.record_outcome(&chosen.url, "transport_retry", dt);
                    attempt += 1;
                }
            }
        }
    }

    fn record_outcome(&self, backend: &str, outcome: &str, dt: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_forward_outcome(backend, outcome, dt);
        }
    }

    /// Step 6/7 classification once a response was actually received: 5xx
    /// is treated as the backend actively erroring (wrapped as 502, no
    /// retry, not marked unhealthy — see DESIGN.md open question 5); every
    /// other status (2xx/3xx/4xx) passes through verbatim.
    async fn handle_response(
        &self,
        chosen: &Arc<BackendRecord>,
        response: reqwest::Response,
        dt: Duration,
    ) -> Result<Response<Body>, ProxyError> {
        self.record_latency(chosen, dt).await;

        let status = response.status();
        if status.is_server_error() {
            let body_text = response.text().await.unwrap_or_default();
            debug!(url = %chosen.url, %status, "backend returned server error, wrapping as bad gateway");
            self.record_outcome(&chosen.url, "backend_error", dt);
            return Err(ProxyError::BackendError(format!(
                "{status} {body_text}"
            )));
        }

        let mut builder = Response::builder().status(status);
        for (name, value) in response.headers().iter() {
            builder = builder.header(name, value);
        }
        let bytes = response.bytes().await.unwrap_or_default();
        self.record_outcome(&chosen.url, "success", dt);
        Ok(builder
            .body(Body::from(bytes))
            .expect("backend status/headers are always a valid response"))
    }

    async fn record_latency(&self, chosen: &Arc<BackendRecord>, dt: Duration) {
        self.registry
            .record_latency(
                &chosen.url,
                dt.as_millis() as i64,
                self.slowness.slow_threshold_ms,
                self.slowness.window_size,
                self.slowness.threshold_ratio,
            )
            .await;
    }
}

/// `chosen.url + req.path`, then `?k1=v1&k2=v2…` verbatim — no encoding
/// beyond what the caller supplied (SPEC_FULL §4.H step 4, §9 open question
/// 3: deliberately left unencoded).
fn build_target_url(backend_url: &str, uri: &hyper::Uri) -> String {
    let base = backend_url.trim_end_matches('/');
    let path = uri.path();
    match uri.query() {
        Some(query) => format!("{base}{path}?{query}"),
        None => format!("{base}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::RoundRobinStrategy;
    use crate::registry::{RecordDefaults, StaticDiscovery};
    use mockito::Server;

    fn slowness() -> SlownessPolicy {
        SlownessPolicy {
            slow_threshold_ms: 1000,
            window_size: 5,
            threshold_ratio: 0.6,
        }
    }

    async fn build_engine(urls: Vec<String>) -> (Arc<ServerRegistry>, ForwardingEngine) {
        let discovery = Arc::new(StaticDiscovery::new(urls));
        let registry = Arc::new(ServerRegistry::new(
            discovery,
            RecordDefaults {
                initial_latency_ms: 200,
                window_time: Duration::from_secs(30),
                window_max_entries: 5,
            },
        ));
        registry.reconcile().await;
        let strategy = Arc::new(RoundRobinStrategy::new());
        let engine = ForwardingEngine::new(
            registry.clone(),
            strategy,
            Duration::from_secs(2),
            Duration::from_secs(60),
            slowness(),
        );
        (registry, engine)
    }

    fn get_request(path: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn passthrough_on_success() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/info")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let (_registry, engine) = build_engine(vec![server.url()]).await;
        let response = engine.forward(get_request("/api/info")).await;
        assert_eq!(response.status(), 200);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn client_error_passes_through_unwrapped() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("nope")
            .create_async()
            .await;

        let (registry, engine) = build_engine(vec![server.url()]).await;
        let response = engine.forward(get_request("/missing")).await;
        assert_eq!(response.status(), 404);

        let record = registry.get(&registry.all_snapshot().await[0].url).await.unwrap();
        assert!(record.healthy());
    }

    #[tokio::test]
    async fn server_error_wraps_as_bad_gateway_without_eviction() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/boom")
            .with_status(500)
            .with_body("kaboom")
            .create_async()
            .await;

        let (registry, engine) = build_engine(vec![server.url()]).await;
        let response = engine.forward(get_request("/boom")).await;
        assert_eq!(response.status(), 502);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).starts_with("Backend server error:"));

        let record = registry.get(&registry.all_snapshot().await[0].url).await.unwrap();
        assert!(record.healthy());
        assert_eq!(record.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn transport_failure_marks_unhealthy_and_returns_no_route() {
        let (registry, engine) = build_engine(vec!["http://127.0.0.1:1".to_string()]).await;
        let response = engine.forward(get_request("/anything")).await;
        assert_eq!(response.status(), 503);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"All backend servers are unavailable");

        let record = &registry.all_snapshot().await[0];
        assert!(!record.healthy());
    }

    #[tokio::test]
    async fn retries_next_backend_on_transport_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body("from-good-backend")
            .create_async()
            .await;

        let (_registry, engine) =
            build_engine(vec!["http://127.0.0.1:1".to_string(), server.url()]).await;
        let response = engine.forward(get_request("/ok")).await;
        assert_eq!(response.status(), 200);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"from-good-backend");
    }

    #[tokio::test]
    async fn empty_registry_returns_no_healthy_available() {
        let (_registry, engine) = build_engine(vec![]).await;
        let response = engine.forward(get_request("/x")).await;
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn query_parameters_forwarded_unencoded() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Exact("q=a,b&limit=5".to_string()))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let (_registry, engine) = build_engine(vec![server.url()]).await;
        let response = engine.forward(get_request("/search?q=a,b&limit=5")).await;
        assert_eq!(response.status(), 200);
    }
}
