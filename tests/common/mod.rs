use axum::{
    body::Body,
    extract::Path,
    middleware,
    routing::get,
    Extension, Router,
};
use request_observability::{
    metrics::REQUEST_DURATION_METRIC,
    observability::{observe_requests, MemorySink, ObserverConfig, RequestId, RequestObserver},
    PrometheusLatencyRecorder,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;

pub struct TestApp {
    pub router: Router,
    pub sink: MemorySink,
    pub recorder: Arc<PrometheusLatencyRecorder>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ObserverConfig::new("test-service"))
    }

    pub fn with_config(config: ObserverConfig) -> Self {
        let sink = MemorySink::new();
        let recorder = Arc::new(PrometheusLatencyRecorder::with_default_buckets().unwrap());
        let observer = Arc::new(RequestObserver::new(
            config,
            Arc::new(sink.clone()),
            recorder.clone(),
        ));

        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/sleep",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "slept"
                }),
            )
            .route("/hang", get(hang))
            .route("/stream", get(slow_stream))
            .route("/panic", get(panicking))
            .route("/users/:id", get(|Path(id): Path<String>| async move { id }))
            .route("/whoami", get(whoami))
            .route(
                "/own-id",
                get(|| async { ([("x-request-id", "set-by-handler")], "own") }),
            )
            .layer(CatchPanicLayer::new())
            .layer(middleware::from_fn_with_state(observer, observe_requests));

        Self {
            router,
            sink,
            recorder,
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        histogram_count(&self.recorder.render(), labels)
    }
}

async fn hang() -> &'static str {
    tokio::time::sleep(Duration::from_secs(30)).await;
    "never"
}

/// Handler returns at once; the only chunk arrives 300ms later
async fn slow_stream() -> Body {
    let chunk = futures::stream::once(async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok::<_, std::io::Error>("late chunk")
    });
    Body::from_stream(chunk)
}

async fn panicking() -> &'static str {
    panic!("handler fault")
}

async fn whoami(Extension(id): Extension<RequestId>) -> String {
    id.0
}

/// Sum of `_count` samples of the request histogram whose labels include all of `labels`
pub fn histogram_count(rendered: &str, labels: &[(&str, &str)]) -> u64 {
    let prefix = format!("{}_count", REQUEST_DURATION_METRIC);
    rendered
        .lines()
        .filter(|line| line.starts_with(&prefix))
        .filter(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{}=\"{}\"", k, v)))
        })
        .filter_map(|line| line.rsplit(' ').next())
        .filter_map(|value| value.parse::<u64>().ok())
        .sum()
}
