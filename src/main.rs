// src/main.rs
use anyhow::Result;
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

mod balancer;
mod config;
mod health;
mod metrics;
mod proxy;
mod registry;
mod server;

use crate::{
    balancer::create_strategy,
    config::{Config, DiscoveryStrategyKind},
    health::HealthMonitor,
    metrics::{MetricsCollector, MetricsRegistry},
    proxy::{ForwardingEngine, SlownessPolicy},
    registry::{DiscoverySource, FileDiscovery, RecordDefaults, ServerRegistry, StaticDiscovery},
    server::{AdminHandlers, RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adaptive_reverse_proxy=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    let discovery: Arc<dyn DiscoverySource> = match config.server_discovery_strategy {
        DiscoveryStrategyKind::File => {
            Arc::new(FileDiscovery::new(config.server_discovery_file_path.clone()))
        }
        DiscoveryStrategyKind::Static | DiscoveryStrategyKind::Unknown => {
            Arc::new(StaticDiscovery::new(config.servers.clone()))
        }
    };

    let registry = Arc::new(ServerRegistry::new(
        discovery,
        RecordDefaults {
            initial_latency_ms: config.initial_latency_ms,
            window_time: Duration::from_millis(config.slowness_window_time_ms.max(0) as u64),
            window_max_entries: config.slowness_window_size,
        },
    ));
    registry.reconcile().await;

    let strategy = create_strategy(config.strategy);

    let health_monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        config.health_check_interval(),
        config.health_check_timeout(),
        config.slowness_cooldown(),
    ));
    let monitor_handle = tokio::spawn(health_monitor.clone().run());

    let engine = Arc::new(
        ForwardingEngine::new(
            registry.clone(),
            strategy.clone(),
            config.request_timeout(),
            config.slowness_cooldown(),
            SlownessPolicy {
                slow_threshold_ms: config.slow_threshold_ms,
                window_size: config.slowness_window_size,
                threshold_ratio: config.slowness_threshold_ratio,
            },
        )
        .with_metrics(metrics.clone()),
    );

    let admin = Arc::new(AdminHandlers::new(
        registry.clone(),
        strategy.clone(),
        config.slowness_cooldown(),
    ));

    tokio::spawn(sample_registry_metrics(
        registry.clone(),
        metrics.clone(),
        config.slowness_cooldown(),
    ));

    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, config.metrics.path.clone()).await?;
    }

    let handler = RequestHandler::new(engine, admin);

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Starting load balancer on {}", addr);

    let serve = ServerBuilder::new(addr).with_handler(handler).serve();

    tokio::select! {
        result = serve => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutting down health monitor");
            health_monitor.shutdown();
        }
    }

    monitor_handle.abort();
    Ok(())
}

/// Periodically projects registry state into the per-backend and
/// registry-wide gauges that the forwarding/health paths don't touch
/// directly (EMA, cooldown, consecutive failures, totals).
async fn sample_registry_metrics(
    registry: Arc<ServerRegistry>,
    metrics: Arc<MetricsCollector>,
    cooldown: Duration,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        ticker.tick().await;
        let all = registry.all_snapshot().await;
        let mut healthy_count = 0usize;
        for record in &all {
            let healthy = record.healthy() && !record.still_in_slow_cooldown(cooldown);
            if healthy {
                healthy_count += 1;
            }
            metrics.update_backend_health(&record.url, record.healthy());
            metrics.update_backend_ema_latency(&record.url, record.ema_latency_ms());
            metrics.update_backend_slow_cooldown(&record.url, record.in_slow_cooldown());
            metrics.update_backend_consecutive_failures(&record.url, record.consecutive_failures());
        }
        metrics.update_registry_counts(all.len(), healthy_count);
    }
}

async fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    path: String,
) -> Result<()> {
    let registry = Arc::new(registry);
    let metrics_path = Arc::new(path);
    let service_path = metrics_path.clone();

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();
        let path = service_path.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let path = path.clone();

                async move {
                    if req.uri().path() == path.as_str() {
                        let metrics = registry.gather();
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "text/plain; version=0.0.4")
                                .body(Body::from(metrics))
                                .unwrap(),
                        )
                    } else {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(Body::from("Not Found"))
                                .unwrap(),
                        )
                    }
                }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_service);

    info!(
        "Metrics server listening on http://{}{}",
        addr,
        metrics_path.as_str()
    );

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
