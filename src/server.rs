use anyhow::Result;
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::{Config, SinkKind},
    handlers,
    metrics::{PrometheusLatencyRecorder, DEFAULT_UPKEEP_INTERVAL},
    observability::{observe_requests, LogSink, RequestObserver, StreamSink, TracingSink},
    signals::shutdown_signal,
};

/// Start the demo service
///
/// This function:
/// 1. Builds the latency recorder (with its upkeep task) and the request log sink
/// 2. Builds the request observer around them
/// 3. Creates the Axum application
/// 4. Binds to the configured address
/// 5. Serves requests until SIGINT/SIGTERM, then drains
pub async fn start_server(config: Config) -> Result<()> {
    let obs = &config.observability;

    info!("Initializing Prometheus latency recorder...");
    let recorder = Arc::new(PrometheusLatencyRecorder::new(&obs.histogram_buckets)?);
    let upkeep = recorder.spawn_upkeep(DEFAULT_UPKEEP_INTERVAL);

    let sink: Arc<dyn LogSink> = match obs.sink {
        SinkKind::Tracing => Arc::new(TracingSink),
        SinkKind::Stream => Arc::new(StreamSink::stdout(
            obs.stream_capacity,
            obs.stream_batch_size,
            Duration::from_millis(obs.stream_flush_ms),
        )),
    };

    let observer = Arc::new(RequestObserver::new(
        obs.observer_config()?,
        sink,
        recorder.clone(),
    ));

    let app = create_router(observer, recorder.handle());

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting {} on {}", obs.service, addr);
    info!(
        "Observability: sink={:?}, header={}, buckets={:?}",
        obs.sink, obs.request_id_header, obs.histogram_buckets
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        shutdown_signal().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    upkeep.abort();
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
///
/// Layer order, outermost first: HTTP trace span, request observer, panic
/// catcher. The observer therefore sees handler panics as 500 responses.
pub fn create_router(observer: Arc<RequestObserver>, metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/", get(handlers::health::index))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(observer, observe_requests))
                .layer(CatchPanicLayer::new()),
        )
}
